//! SQLite-backed persistence for positions, executions and skip-phase
//! counters. All writes go through a single `tokio::sync::Mutex`-guarded
//! connection, realizing the store's process-wide write mutex; reads use
//! the same guarded connection since `rusqlite::Connection` isn't `Sync`.

use crate::error::{EngineError, EngineResult};
use crate::models::{normalize_symbol, CloseReason, Execution, NewExecution, NewPosition, Position, PositionStatus, Side};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::{info, instrument};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS portfolio_positions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    token_address TEXT NOT NULL,
    symbol TEXT NOT NULL,
    chain TEXT NOT NULL,
    entry_price REAL NOT NULL,
    quantity_token REAL NOT NULL,
    notional_usd REAL NOT NULL,
    stop_price REAL NOT NULL,
    take_price REAL NOT NULL,
    highest_price REAL NOT NULL,
    opened_at TEXT NOT NULL,
    closed_at TEXT,
    exit_price REAL,
    realized_pnl_usd REAL,
    status TEXT NOT NULL,
    close_reason TEXT,
    dry_run INTEGER NOT NULL,
    momentum_score REAL,
    discovery_reasoning TEXT
);
CREATE INDEX IF NOT EXISTS idx_positions_status ON portfolio_positions(status);
CREATE INDEX IF NOT EXISTS idx_positions_token ON portfolio_positions(token_address);

CREATE TABLE IF NOT EXISTS portfolio_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    position_id INTEGER REFERENCES portfolio_positions(id) ON DELETE SET NULL,
    token_address TEXT NOT NULL,
    symbol TEXT NOT NULL,
    chain TEXT NOT NULL,
    action TEXT NOT NULL,
    requested_notional_usd REAL,
    executed_price REAL,
    quantity_token REAL,
    tx_hash TEXT,
    success INTEGER NOT NULL,
    error TEXT,
    metadata TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_executions_position ON portfolio_executions(position_id);

CREATE TABLE IF NOT EXISTS token_skip_phases (
    token_address TEXT NOT NULL,
    chain TEXT NOT NULL,
    skip_phases INTEGER NOT NULL DEFAULT 0,
    negative_sl_count INTEGER NOT NULL DEFAULT 0,
    skip_until TEXT,
    PRIMARY KEY (token_address, chain)
);
";

const NEGATIVE_SL_SKIP_THRESHOLD: i64 = 2;
const NEGATIVE_SL_SKIP_PHASES: i64 = 1;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    #[instrument(skip(path))]
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!(%path, "persistence store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub async fn add_position(&self, new: NewPosition) -> EngineResult<Position> {
        let chain = new.chain.to_lowercase();
        let symbol = normalize_symbol(&new.symbol);
        let now = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO portfolio_positions
                (token_address, symbol, chain, entry_price, quantity_token, notional_usd,
                 stop_price, take_price, highest_price, opened_at, status, dry_run,
                 momentum_score, discovery_reasoning)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?4, ?9, 'open', ?10, ?11, ?12)",
            params![
                new.token_address,
                symbol,
                chain,
                new.entry_price,
                new.quantity_token,
                new.notional_usd,
                new.stop_price,
                new.take_price,
                now.to_rfc3339(),
                new.dry_run as i64,
                new.momentum_score,
                new.discovery_reasoning,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_position(id).await?.ok_or_else(|| EngineError::DataShape("position vanished after insert".to_string()))
    }

    pub async fn get_position(&self, id: i64) -> EngineResult<Option<Position>> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM portfolio_positions WHERE id = ?1", params![id], row_to_position)
            .optional()
            .map_err(EngineError::from)
    }

    pub async fn get_open_position(&self, token_address: &str, chain: &str) -> EngineResult<Option<Position>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM portfolio_positions WHERE lower(token_address) = lower(?1) AND chain = ?2 AND status = 'open'",
            params![token_address, chain.to_lowercase()],
            row_to_position,
        )
        .optional()
        .map_err(EngineError::from)
    }

    pub async fn list_open_positions(&self, chain: &str) -> EngineResult<Vec<Position>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM portfolio_positions WHERE chain = ?1 AND status = 'open' ORDER BY opened_at ASC")?;
        let rows = stmt.query_map(params![chain.to_lowercase()], row_to_position)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(EngineError::from)
    }

    pub async fn list_closed_positions(&self, chain: &str, limit: i64) -> EngineResult<Vec<Position>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM portfolio_positions WHERE chain = ?1 AND status = 'closed' ORDER BY closed_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chain.to_lowercase(), limit], row_to_position)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(EngineError::from)
    }

    pub async fn count_open_positions(&self, chain: &str) -> EngineResult<i64> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM portfolio_positions WHERE chain = ?1 AND status = 'open'",
            params![chain.to_lowercase()],
            |row| row.get(0),
        )
        .map_err(EngineError::from)
    }

    pub async fn update_trailing_stop(&self, id: i64, highest_price: f64, stop_price: f64) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE portfolio_positions SET highest_price = ?1, stop_price = ?2 WHERE id = ?3",
            params![highest_price, stop_price, id],
        )?;
        Ok(())
    }

    /// Closes an open position. Conditional on `status = 'open'` so a
    /// second call is a no-op; returns whether a row actually closed.
    pub async fn close_position(
        &self,
        id: i64,
        exit_price: f64,
        realized_pnl_usd: f64,
        close_reason: CloseReason,
    ) -> EngineResult<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE portfolio_positions
             SET status = 'closed', closed_at = ?1, exit_price = ?2, realized_pnl_usd = ?3, close_reason = ?4
             WHERE id = ?5 AND status = 'open'",
            params![Utc::now().to_rfc3339(), exit_price, realized_pnl_usd, close_reason.to_string(), id],
        )?;
        Ok(changed > 0)
    }

    /// Sum of realized PnL for positions closed since UTC midnight today.
    pub async fn get_daily_pnl(&self, chain: &str) -> EngineResult<f64> {
        let midnight = Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap();
        let midnight_utc = Utc.from_utc_datetime(&midnight);
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT COALESCE(SUM(realized_pnl_usd), 0.0) FROM portfolio_positions
             WHERE chain = ?1 AND status = 'closed' AND closed_at >= ?2",
            params![chain.to_lowercase(), midnight_utc.to_rfc3339()],
            |row| row.get(0),
        )
        .map_err(EngineError::from)
    }

    pub async fn record_execution(&self, new: NewExecution) -> EngineResult<Execution> {
        let symbol = normalize_symbol(&new.symbol);
        let chain = new.chain.to_lowercase();
        let metadata = new.metadata.unwrap_or(serde_json::json!({}));
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO portfolio_executions
                (position_id, token_address, symbol, chain, action, requested_notional_usd,
                 executed_price, quantity_token, tx_hash, success, error, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                new.position_id,
                new.token_address,
                symbol,
                chain,
                new.action.to_string(),
                new.requested_notional_usd,
                new.executed_price,
                new.quantity_token,
                new.tx_hash,
                new.success as i64,
                new.error,
                metadata.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row("SELECT * FROM portfolio_executions WHERE id = ?1", params![id], row_to_execution)
            .map_err(EngineError::from)
    }

    pub async fn get_last_entry_time(&self, token_address: &str, chain: &str) -> EngineResult<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().await;
        let text: Option<String> = conn
            .query_row(
                "SELECT opened_at FROM portfolio_positions
                 WHERE lower(token_address) = lower(?1) AND chain = ?2
                 ORDER BY opened_at DESC LIMIT 1",
                params![token_address, chain.to_lowercase()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text.and_then(|t| parse_dt(&t)))
    }

    /// Increments the negative-stop-loss counter for `token_address` and
    /// returns the new total, creating the row on first occurrence. When
    /// the new total reaches [`NEGATIVE_SL_SKIP_THRESHOLD`], `skip_phases`
    /// is set to [`NEGATIVE_SL_SKIP_PHASES`] in the same write.
    pub async fn increment_negative_sl_count(&self, token_address: &str, chain: &str) -> EngineResult<i64> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "INSERT INTO token_skip_phases (token_address, chain, negative_sl_count, skip_phases)
             VALUES (?1, ?2, 1, 0)
             ON CONFLICT(token_address, chain) DO UPDATE SET
                 negative_sl_count = negative_sl_count + 1,
                 skip_phases = CASE WHEN negative_sl_count + 1 >= ?3 THEN ?4 ELSE skip_phases END
             RETURNING negative_sl_count",
            params![
                token_address.to_lowercase(),
                chain.to_lowercase(),
                NEGATIVE_SL_SKIP_THRESHOLD,
                NEGATIVE_SL_SKIP_PHASES
            ],
            |row| row.get(0),
        )
        .map_err(EngineError::from)
    }

    /// Current negative-stop-loss counter, 0 if the token has no row yet.
    pub async fn get_negative_sl_count(&self, token_address: &str, chain: &str) -> EngineResult<i64> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT negative_sl_count FROM token_skip_phases WHERE token_address = ?1 AND chain = ?2",
            params![token_address.to_lowercase(), chain.to_lowercase()],
            |row| row.get(0),
        )
        .optional()
        .map(|v| v.unwrap_or(0))
        .map_err(EngineError::from)
    }

    pub async fn get_skip_phases(&self, token_address: &str, chain: &str) -> EngineResult<i64> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT skip_phases FROM token_skip_phases WHERE token_address = ?1 AND chain = ?2",
            params![token_address.to_lowercase(), chain.to_lowercase()],
            |row| row.get(0),
        )
        .optional()
        .map(|v| v.unwrap_or(0))
        .map_err(EngineError::from)
    }

    pub async fn set_skip_phases(&self, token_address: &str, chain: &str, phases: i64) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO token_skip_phases (token_address, chain, skip_phases)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(token_address, chain) DO UPDATE SET skip_phases = ?3",
            params![token_address.to_lowercase(), chain.to_lowercase(), phases],
        )?;
        Ok(())
    }

    /// Decrements every token's skip-phase counter by one (floored at
    /// zero), run once per discovery cycle regardless of outcome. A
    /// counter that reaches zero also resets `negative_sl_count`.
    pub async fn decrement_all_skip_phases(&self) -> EngineResult<usize> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE token_skip_phases
             SET skip_phases = skip_phases - 1,
                 negative_sl_count = CASE WHEN skip_phases - 1 <= 0 THEN 0 ELSE negative_sl_count END
             WHERE skip_phases > 0",
            [],
        )?;
        conn.execute("UPDATE token_skip_phases SET skip_phases = 0 WHERE skip_phases < 0", [])?;
        Ok(changed)
    }

    pub async fn reset_skip_phases(&self, token_address: &str, chain: &str) -> EngineResult<()> {
        self.set_skip_phases(token_address, chain, 0).await
    }

    /// Deletes closed positions (and their executions, via FK cascade)
    /// older than `older_than`, a periodic housekeeping operation.
    pub async fn delete_closed_data(&self, older_than: DateTime<Utc>) -> EngineResult<usize> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM portfolio_positions WHERE status = 'closed' AND closed_at < ?1",
            params![older_than.to_rfc3339()],
        )?;
        Ok(deleted)
    }
}

fn parse_dt(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.with_timezone(&Utc))
}

fn row_to_position(row: &Row) -> rusqlite::Result<Position> {
    let status_text: String = row.get("status")?;
    let status = if status_text == "open" { PositionStatus::Open } else { PositionStatus::Closed };

    let close_reason_text: Option<String> = row.get("close_reason")?;
    let close_reason = close_reason_text.and_then(|t| match t.as_str() {
        "stop_loss" => Some(CloseReason::StopLoss),
        "take_profit" => Some(CloseReason::TakeProfit),
        "max_hold_time" => Some(CloseReason::MaxHoldTime),
        _ => None,
    });

    let opened_at: String = row.get("opened_at")?;
    let closed_at: Option<String> = row.get("closed_at")?;

    Ok(Position {
        id: row.get("id")?,
        token_address: row.get("token_address")?,
        symbol: row.get("symbol")?,
        chain: row.get("chain")?,
        entry_price: row.get("entry_price")?,
        quantity_token: row.get("quantity_token")?,
        notional_usd: row.get("notional_usd")?,
        stop_price: row.get("stop_price")?,
        take_price: row.get("take_price")?,
        highest_price: row.get("highest_price")?,
        opened_at: parse_dt(&opened_at).unwrap_or_else(Utc::now),
        closed_at: closed_at.and_then(|t| parse_dt(&t)),
        exit_price: row.get("exit_price")?,
        realized_pnl_usd: row.get("realized_pnl_usd")?,
        status,
        close_reason,
        dry_run: row.get::<_, i64>("dry_run")? != 0,
        momentum_score: row.get("momentum_score")?,
        discovery_reasoning: row.get("discovery_reasoning")?,
    })
}

fn row_to_execution(row: &Row) -> rusqlite::Result<Execution> {
    let action_text: String = row.get("action")?;
    let action = if action_text == "buy" { Side::Buy } else { Side::Sell };
    let created_at: String = row.get("created_at")?;
    let metadata_text: String = row.get("metadata")?;

    Ok(Execution {
        id: row.get("id")?,
        position_id: row.get("position_id")?,
        token_address: row.get("token_address")?,
        symbol: row.get("symbol")?,
        chain: row.get("chain")?,
        action,
        requested_notional_usd: row.get("requested_notional_usd")?,
        executed_price: row.get("executed_price")?,
        quantity_token: row.get("quantity_token")?,
        tx_hash: row.get("tx_hash")?,
        success: row.get::<_, i64>("success")? != 0,
        error: row.get("error")?,
        metadata: serde_json::from_str(&metadata_text).unwrap_or(serde_json::Value::Null),
        created_at: parse_dt(&created_at).unwrap_or_else(Utc::now),
    })
}
