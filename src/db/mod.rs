//! Ledger persistence: append-only trades and audit events, plus the
//! per-ticker hysteresis state consulted by the entry and exit policies.
//!
//! Portfolio state is never cached: active positions are derived by
//! aggregating the trade log, so the ledger stays the single source of
//! truth. Trades and audit events are insert-only; nothing updates or
//! deletes them.
//!
//! The hysteresis upsert is a read-modify-write and is not atomic under
//! concurrent writers on the same ticker. The design assumes a single
//! writer; callers that need concurrency must serialize per ticker.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{EventType, TradeSide};

/// Database connection pool over the trade ledger.
pub struct Database {
    pool: SqlitePool,
}

/// One immutable row of the trade log.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub ts_utc: String,
    pub ticker: String,
    pub side: String,
    pub qty: f64,
    pub price: f64,
    pub fees: f64,
    pub strategy_id: Option<String>,
    pub model_version: Option<String>,
    pub note: Option<String>,
    pub evidence_hash: String,
    pub decision_hash: String,
}

impl TradeRecord {
    pub fn side(&self) -> Option<TradeSide> {
        TradeSide::parse(&self.side)
    }

    /// Calendar date of the trade (UTC), used by the replay engine.
    pub fn trade_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.ts_utc.get(..10)?, "%Y-%m-%d").ok()
    }
}

/// One immutable row of the audit log.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: i64,
    pub ts_utc: String,
    pub event_type: String,
    pub ticker: Option<String>,
    pub evidence_hash: Option<String>,
    pub decision_hash: Option<String>,
    pub payload_json: String,
}

/// Mutable per-ticker gating state.
///
/// `consecutive_ok` counts entry-gate passes in a row, `peak_price` is the
/// monotone high-water mark the trailing stop hangs off, and
/// `downgrade_streak` counts consecutive sub-threshold signal scores.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HysteresisState {
    pub ticker: String,
    pub consecutive_ok: i64,
    pub last_ts_utc: String,
    pub peak_price: Option<f64>,
    pub downgrade_streak: i64,
}

/// Position derived from the trade log; only net-long tickers are returned.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActivePosition {
    pub ticker: String,
    pub net_qty: f64,
    pub avg_cost: f64,
}

fn utc_now_iso() -> String {
    Utc::now().to_rfc3339()
}

impl Database {
    /// Open the ledger and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// In-memory ledger for tests. One connection, so every query sees the
    /// same memory database.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts_utc TEXT NOT NULL,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL CHECK(side IN ('BUY','SELL')),
                qty REAL NOT NULL,
                price REAL NOT NULL,
                fees REAL NOT NULL DEFAULT 0.0,
                strategy_id TEXT,
                model_version TEXT,
                note TEXT,
                evidence_hash TEXT NOT NULL,
                decision_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts_utc TEXT NOT NULL,
                event_type TEXT NOT NULL,
                ticker TEXT,
                evidence_hash TEXT,
                decision_hash TEXT,
                payload_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hysteresis_state(
                ticker TEXT PRIMARY KEY,
                consecutive_ok INTEGER NOT NULL DEFAULT 0,
                last_ts_utc TEXT NOT NULL,
                peak_price REAL DEFAULT NULL,
                downgrade_streak INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_ticker_ts ON trades(ticker, ts_utc)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_ticker_event_ts ON audit_log(ticker, event_type, ts_utc)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Trades ====================

    /// Append a trade. Rows are never updated or deleted.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_trade(
        &self,
        ticker: &str,
        side: TradeSide,
        qty: f64,
        price: f64,
        fees: f64,
        evidence_hash: &str,
        decision_hash: &str,
        strategy_id: Option<&str>,
        model_version: Option<&str>,
        note: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades(
                ts_utc, ticker, side, qty, price, fees,
                strategy_id, model_version, note, evidence_hash, decision_hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(utc_now_iso())
        .bind(ticker.to_uppercase())
        .bind(side.as_str())
        .bind(qty)
        .bind(price)
        .bind(fees)
        .bind(strategy_id)
        .bind(model_version)
        .bind(note)
        .bind(evidence_hash)
        .bind(decision_hash)
        .execute(&self.pool)
        .await
        .context("Failed to insert trade")?;

        Ok(())
    }

    /// All trades, oldest first.
    pub async fn list_trades(&self) -> Result<Vec<TradeRecord>> {
        sqlx::query_as::<_, TradeRecord>("SELECT * FROM trades ORDER BY ts_utc ASC, id ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list trades")
    }

    /// Aggregate the trade log into net-long positions.
    ///
    /// The result depends only on the multiset of trades, not their
    /// insertion order. Cost basis counts buys and their fees only.
    pub async fn derive_active_positions(&self) -> Result<Vec<ActivePosition>> {
        sqlx::query_as::<_, ActivePosition>(
            r#"
            SELECT ticker,
                   SUM(CASE WHEN side='BUY' THEN qty ELSE -qty END) AS net_qty,
                   CASE WHEN SUM(CASE WHEN side='BUY' THEN qty ELSE 0 END) > 0
                        THEN SUM(CASE WHEN side='BUY' THEN qty*price+fees ELSE 0 END)
                             / SUM(CASE WHEN side='BUY' THEN qty ELSE 0 END)
                        ELSE 0.0
                   END AS avg_cost
            FROM trades
            GROUP BY ticker
            HAVING net_qty > 0
            ORDER BY ticker
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to derive positions")
    }

    // ==================== Audit log ====================

    /// Append an audit event. Best-effort logging; not transactional with
    /// the operation that triggered it.
    pub async fn insert_audit(
        &self,
        event_type: EventType,
        ticker: Option<&str>,
        evidence_hash: Option<&str>,
        decision_hash: Option<&str>,
        payload: &Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log(ts_utc, event_type, ticker, evidence_hash, decision_hash, payload_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(utc_now_iso())
        .bind(event_type.as_str())
        .bind(ticker.map(|t| t.to_uppercase()))
        .bind(evidence_hash)
        .bind(decision_hash)
        .bind(payload.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to insert audit event")?;

        Ok(())
    }

    /// Latest DECISION hashes for a ticker, used to bind a SELL to the
    /// analysis that justified the position when no fresh analysis runs.
    pub async fn most_recent_decision_hashes(
        &self,
        ticker: &str,
    ) -> Result<Option<(String, String)>> {
        let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT evidence_hash, decision_hash
            FROM audit_log
            WHERE ticker=? AND event_type='DECISION'
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(ticker.to_uppercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(e, d)| Some((e?, d?))))
    }

    /// Latest DECISION payload for a ticker at or after a cutoff.
    pub async fn most_recent_decision_payload(
        &self,
        ticker: &str,
        since_iso: &str,
    ) -> Result<Option<Value>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT payload_json
            FROM audit_log
            WHERE ticker=? AND event_type='DECISION' AND ts_utc >= ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(ticker.to_uppercase())
        .bind(since_iso)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((payload,)) => Ok(Some(
                serde_json::from_str(&payload).context("Corrupt audit payload")?,
            )),
            None => Ok(None),
        }
    }

    /// Audit events, newest first.
    pub async fn list_audit_events(&self, limit: i64) -> Result<Vec<AuditRecord>> {
        sqlx::query_as::<_, AuditRecord>("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list audit events")
    }

    // ==================== Hysteresis state ====================

    /// Per-ticker gating state, defaulted with zero counters on first read.
    pub async fn get_hysteresis(&self, ticker: &str) -> Result<HysteresisState> {
        let row = sqlx::query_as::<_, HysteresisState>(
            "SELECT ticker, consecutive_ok, last_ts_utc, peak_price, downgrade_streak
             FROM hysteresis_state WHERE ticker=?",
        )
        .bind(ticker.to_uppercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.unwrap_or_else(|| HysteresisState {
            ticker: ticker.to_uppercase(),
            consecutive_ok: 0,
            last_ts_utc: utc_now_iso(),
            peak_price: None,
            downgrade_streak: 0,
        }))
    }

    /// Write back gating state; `None` fields keep their current value.
    pub async fn upsert_hysteresis(
        &self,
        ticker: &str,
        consecutive_ok: Option<i64>,
        peak_price: Option<f64>,
        downgrade_streak: Option<i64>,
    ) -> Result<()> {
        let current = self.get_hysteresis(ticker).await?;
        let new_consecutive = consecutive_ok.unwrap_or(current.consecutive_ok);
        let new_peak = peak_price.or(current.peak_price);
        let new_downgrade = downgrade_streak.unwrap_or(current.downgrade_streak);

        sqlx::query(
            r#"
            INSERT INTO hysteresis_state(ticker, consecutive_ok, last_ts_utc, peak_price, downgrade_streak)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(ticker) DO UPDATE SET
                consecutive_ok=excluded.consecutive_ok,
                last_ts_utc=excluded.last_ts_utc,
                peak_price=excluded.peak_price,
                downgrade_streak=excluded.downgrade_streak
            "#,
        )
        .bind(ticker.to_uppercase())
        .bind(new_consecutive)
        .bind(utc_now_iso())
        .bind(new_peak)
        .bind(new_downgrade)
        .execute(&self.pool)
        .await
        .context("Failed to upsert hysteresis state")?;

        Ok(())
    }
}
