//! SQLite-backed trade log.
//!
//! Append-only record of every order submission and its outcome. Used by
//! the engine after each submission and by the `status` subcommand for a
//! quick look at what the bot has been doing.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::broker::OrderSide;

/// One submitted order and the broker's answer.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub price: Decimal,
    pub order_id: Option<String>,
    pub accepted: bool,
    pub message: String,
    pub strategy: String,
    pub reason: String,
}

/// Aggregate counts over the whole log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeSummary {
    pub total: u64,
    pub buys: u64,
    pub sells: u64,
    pub rejected: u64,
}

pub struct TradeLog {
    conn: Connection,
}

impl TradeLog {
    /// Open (and initialize if needed) the trade log database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {parent:?}"))?;
            }
        }
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let log = Self { conn };
        log.init_schema()?;

        info!("Trade log initialized at {:?}", db_path.as_ref());
        Ok(log)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price TEXT NOT NULL,
                order_id TEXT,
                accepted INTEGER NOT NULL,
                message TEXT NOT NULL,
                strategy TEXT NOT NULL,
                reason TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);
            CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol);
            "#,
        )?;
        debug!("Trade log schema initialized");
        Ok(())
    }

    /// Append one record. Never updates or deletes.
    pub fn append(&self, record: &TradeRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO trades (timestamp, symbol, side, quantity, price, order_id,
                                accepted, message, strategy, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.timestamp.to_rfc3339(),
                record.symbol,
                record.side.as_str(),
                record.quantity as i64,
                record.price.to_string(),
                record.order_id,
                record.accepted as i64,
                record.message,
                record.strategy,
                record.reason,
            ],
        )?;
        Ok(())
    }

    /// Most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, symbol, side, quantity, price, order_id,
                   accepted, message, strategy, reason
            FROM trades ORDER BY id DESC LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (timestamp, symbol, side, quantity, price, order_id, accepted, message, strategy, reason) =
                row?;
            records.push(TradeRecord {
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .context("bad timestamp in trade log")?
                    .with_timezone(&Utc),
                symbol,
                side: if side == "SELL" {
                    OrderSide::Sell
                } else {
                    OrderSide::Buy
                },
                quantity: quantity as u64,
                price: Decimal::from_str(&price).context("bad price in trade log")?,
                order_id,
                accepted: accepted != 0,
                message,
                strategy,
                reason,
            });
        }
        Ok(records)
    }

    pub fn summary(&self) -> Result<TradeSummary> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                COUNT(*),
                SUM(CASE WHEN side = 'BUY' THEN 1 ELSE 0 END),
                SUM(CASE WHEN side = 'SELL' THEN 1 ELSE 0 END),
                SUM(CASE WHEN accepted = 0 THEN 1 ELSE 0 END)
            FROM trades
            "#,
        )?;

        let summary = stmt.query_row([], |row| {
            Ok(TradeSummary {
                total: row.get::<_, i64>(0)? as u64,
                buys: row.get::<_, Option<i64>>(1)?.unwrap_or(0) as u64,
                sells: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                rejected: row.get::<_, Option<i64>>(3)?.unwrap_or(0) as u64,
            })
        })?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(symbol: &str, side: OrderSide, accepted: bool) -> TradeRecord {
        TradeRecord {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            side,
            quantity: 10,
            price: dec!(71000),
            order_id: accepted.then(|| "8841".to_string()),
            accepted,
            message: if accepted { String::new() } else { "rejected".into() },
            strategy: "momentum-volume".to_string(),
            reason: "test".to_string(),
        }
    }

    fn temp_log() -> (tempfile::TempDir, TradeLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = TradeLog::new(dir.path().join("trades.db")).unwrap();
        (dir, log)
    }

    #[test]
    fn test_append_and_read_back() {
        let (_dir, log) = temp_log();
        log.append(&record("005930", OrderSide::Buy, true)).unwrap();
        log.append(&record("005930", OrderSide::Sell, true)).unwrap();

        let recent = log.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        // Newest first.
        assert_eq!(recent[0].side, OrderSide::Sell);
        assert_eq!(recent[1].side, OrderSide::Buy);
        assert_eq!(recent[1].price, dec!(71000));
    }

    #[test]
    fn test_summary_counts() {
        let (_dir, log) = temp_log();
        log.append(&record("005930", OrderSide::Buy, true)).unwrap();
        log.append(&record("000660", OrderSide::Buy, false)).unwrap();
        log.append(&record("005930", OrderSide::Sell, true)).unwrap();

        let summary = log.summary().unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.buys, 2);
        assert_eq!(summary.sells, 1);
        assert_eq!(summary.rejected, 1);
    }

    #[test]
    fn test_empty_log_summary() {
        let (_dir, log) = temp_log();
        let summary = log.summary().unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.rejected, 0);
    }
}
