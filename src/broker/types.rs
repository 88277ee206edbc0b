//! Wire types for the broker's REST gateway.
//!
//! The gateway mirrors a gRPC API: int64 fields arrive as JSON strings and
//! decimal values as `units` + `nano` pairs that must be recombined.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// int64 fields come back as either a JSON string or a bare number
/// depending on the gateway version.
fn string_or_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Fixed-point decimal: `units` integer part plus `nano` billionths.
/// Both carry the sign for negative values.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Quotation {
    #[serde(default, deserialize_with = "string_or_i64")]
    pub units: i64,
    #[serde(default)]
    pub nano: i32,
}

impl Quotation {
    pub fn to_decimal(self) -> Decimal {
        Decimal::from(self.units) + Decimal::new(self.nano as i64, 9)
    }

    pub fn to_f64(self) -> f64 {
        self.to_decimal().to_f64().unwrap_or(0.0)
    }
}

/// A money amount: a quotation tagged with its currency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoneyValue {
    #[serde(default)]
    pub currency: String,
    #[serde(default, deserialize_with = "string_or_i64")]
    pub units: i64,
    #[serde(default)]
    pub nano: i32,
}

impl MoneyValue {
    pub fn to_f64(&self) -> f64 {
        Quotation {
            units: self.units,
            nano: self.nano,
        }
        .to_f64()
    }
}

/// Instrument row from the Etfs/Currencies listings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentPayload {
    pub ticker: String,
    pub figi: String,
    pub uid: String,
    #[serde(default)]
    pub asset_uid: Option<String>,
    #[serde(default)]
    pub lot: i32,
    #[serde(default)]
    pub currency: String,
    /// Only populated for currency instruments
    #[serde(default)]
    pub iso_currency_name: Option<String>,
    /// Only populated for some ETF listings
    #[serde(default)]
    pub num_shares: Option<Quotation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentsResponse {
    #[serde(default)]
    pub instruments: Vec<InstrumentPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentResponse {
    pub instrument: Option<InstrumentPayload>,
}

/// GetAssetBy response, trimmed to the ETF share count we need.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetResponse {
    pub asset: Option<AssetPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPayload {
    #[serde(default)]
    pub security: Option<AssetSecurityPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSecurityPayload {
    #[serde(default)]
    pub etf: Option<AssetEtfPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetEtfPayload {
    #[serde(default)]
    pub num_share: Option<Quotation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastPricesResponse {
    #[serde(default)]
    pub last_prices: Vec<LastPricePayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastPricePayload {
    #[serde(default)]
    pub instrument_uid: String,
    pub price: Option<Quotation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioResponse {
    #[serde(default)]
    pub positions: Vec<PortfolioPositionPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioPositionPayload {
    #[serde(default)]
    pub figi: String,
    #[serde(default)]
    pub instrument_uid: String,
    #[serde(default)]
    pub instrument_type: String,
    #[serde(default)]
    pub quantity: Quotation,
    #[serde(default)]
    pub quantity_lots: Quotation,
    #[serde(default)]
    pub current_price: MoneyValue,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingStatusResponse {
    #[serde(default)]
    pub trading_status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderRequest {
    pub figi: String,
    /// Lots, serialized as a string per the int64 convention
    pub quantity: String,
    pub direction: String,
    pub account_id: String,
    pub order_type: String,
    pub order_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderResponse {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub execution_report_status: String,
    #[serde(default, deserialize_with = "string_or_i64")]
    pub lots_requested: i64,
    #[serde(default, deserialize_with = "string_or_i64")]
    pub lots_executed: i64,
}
