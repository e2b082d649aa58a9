//! Wire and domain types for the broker OpenAPI.
//!
//! Every response arrives as an `Envelope` whose `output` payload is typed
//! per operation. The client converts wire rows into the domain types below
//! at its boundary; raw JSON never crosses into the engine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Response envelope common to every broker operation.
///
/// `code == "0"` marks success; anything else carries a broker-side
/// rejection code and message.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub code: String,
    #[serde(default)]
    pub message: String,
    pub output: Option<T>,
}

impl<T> Envelope<T> {
    pub fn is_success(&self) -> bool {
        self.code == "0"
    }
}

/// Body of `POST /oauth2/token`.
#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    pub grant_type: &'static str,
    pub appkey: &'a str,
    pub appsecret: &'a str,
}

/// Successful grant from the auth endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    /// Server-side lifetime in seconds
    pub expires_in: i64,
}

// ==================== Account ====================

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceOutput {
    #[serde(with = "rust_decimal::serde::str")]
    pub available_cash: Decimal,
    #[serde(default)]
    pub holdings: Vec<HoldingRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoldingRow {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_price: Decimal,
}

/// Authoritative account state as reported by the broker.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub cash: Decimal,
    pub holdings: Vec<Holding>,
}

/// One held instrument from the broker's balance query.
#[derive(Debug, Clone)]
pub struct Holding {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_price: Decimal,
}

impl From<HoldingRow> for Holding {
    fn from(row: HoldingRow) -> Self {
        Self {
            symbol: row.symbol,
            quantity: row.quantity,
            avg_price: row.avg_price,
        }
    }
}

// ==================== Quotations ====================

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteOutput {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub prev_close: Decimal,
    /// Change versus previous close, as a fraction (0.05 = +5%)
    #[serde(with = "rust_decimal::serde::str")]
    pub change_rate: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

/// Current quote for one instrument.
#[derive(Debug, Clone)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub prev_close: Decimal,
    pub change_rate: Decimal,
    pub volume: Decimal,
}

impl From<QuoteOutput> for Quote {
    fn from(row: QuoteOutput) -> Self {
        Self {
            symbol: row.symbol,
            price: row.price,
            open: row.open,
            high: row.high,
            low: row.low,
            prev_close: row.prev_close,
            change_rate: row.change_rate,
            volume: row.volume,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailyPriceOutput {
    #[serde(default)]
    pub candles: Vec<CandleRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandleRow {
    pub date: NaiveDate,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

/// One historical daily bar, most recent last.
#[derive(Debug, Clone)]
pub struct DailyCandle {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl From<CandleRow> for DailyCandle {
    fn from(row: CandleRow) -> Self {
        Self {
            date: row.date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        }
    }
}

// ==================== Screening ====================

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeRankOutput {
    #[serde(default)]
    pub entries: Vec<RankingRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingRow {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub change_rate: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    pub rank: u32,
}

/// A screened instrument surfaced by the ranking query. Ephemeral, rebuilt
/// every cycle.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
    pub change_rate: Decimal,
    pub volume: Decimal,
    pub rank: u32,
}

impl From<RankingRow> for Candidate {
    fn from(row: RankingRow) -> Self {
        Self {
            symbol: row.symbol,
            name: row.name,
            price: row.price,
            change_rate: row.change_rate,
            volume: row.volume,
            rank: row.rank,
        }
    }
}

// ==================== Orders ====================

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }
}

/// Order submission parameters.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub order_type: OrderType,
    /// Required for limit orders, ignored for market orders
    pub limit_price: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderOutput {
    pub order_id: String,
}

/// The broker's synchronous answer to a submission. An unaccepted receipt
/// carries the rejection code and message; nothing further is guaranteed
/// about fills.
#[derive(Debug, Clone)]
pub struct OrderReceipt {
    pub order_id: Option<String>,
    pub accepted: bool,
    pub message: String,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_envelope_success_code() {
        let envelope: Envelope<OrderOutput> = serde_json::from_str(
            r#"{"code": "0", "message": "ok", "output": {"order_id": "8841"}}"#,
        )
        .unwrap();
        assert!(envelope.is_success());
        assert_eq!(envelope.output.unwrap().order_id, "8841");
    }

    #[test]
    fn test_envelope_rejection() {
        let envelope: Envelope<OrderOutput> = serde_json::from_str(
            r#"{"code": "40310000", "message": "insufficient funds", "output": null}"#,
        )
        .unwrap();
        assert!(!envelope.is_success());
        assert!(envelope.output.is_none());
    }

    #[test]
    fn test_quote_decimal_strings() {
        let row: QuoteOutput = serde_json::from_str(
            r#"{
                "symbol": "005930",
                "price": "71200",
                "open": "70500",
                "high": "71500",
                "low": "70100",
                "prev_close": "70000",
                "change_rate": "0.0171",
                "volume": "13804520"
            }"#,
        )
        .unwrap();
        assert_eq!(row.price, dec!(71200));
        assert_eq!(row.change_rate, dec!(0.0171));
    }

    #[test]
    fn test_candle_row_parses_date() {
        let row: CandleRow = serde_json::from_str(
            r#"{
                "date": "2026-08-05",
                "open": "100", "high": "110", "low": "95",
                "close": "105", "volume": "50000"
            }"#,
        )
        .unwrap();
        assert_eq!(row.date, NaiveDate::from_ymd_opt(2026, 8, 5).unwrap());
    }
}
