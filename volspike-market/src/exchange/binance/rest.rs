//! REST models and fetchers: instrument metadata and the 24h ticker
//! warm-start.

use crate::{error::MarketError, store::TickerObservation, symbol::Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Subset of the `exchangeInfo` response needed for the allow-list and
/// precision table.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<InstrumentDef>,
}

/// One instrument definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentDef {
    pub symbol: String,
    #[serde(default)]
    pub contract_type: String,
    #[serde(default)]
    pub quote_asset: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub filters: Vec<InstrumentFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentFilter {
    #[serde(default)]
    pub filter_type: String,
    #[serde(default)]
    pub tick_size: Option<String>,
}

impl InstrumentDef {
    /// Active perpetual quoted in the reference currency.
    pub fn is_displayable(&self, reference_currency: &str) -> bool {
        self.contract_type == "PERPETUAL"
            && self.quote_asset == reference_currency
            && self.status == "TRADING"
    }

    /// Price tick size from the `PRICE_FILTER` entry, if parseable.
    pub fn tick_size(&self) -> Option<f64> {
        self.filters
            .iter()
            .find(|filter| filter.filter_type == "PRICE_FILTER")
            .and_then(|filter| filter.tick_size.as_deref())
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|tick| tick.is_finite() && *tick > 0.0)
    }
}

/// One row of the 24h ticker warm-start response. REST spells fields out
/// in full (unlike the stream's single-letter keys) and sends numbers as
/// strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub last_price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub quote_volume: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub price_change_percent: Option<f64>,
}

impl Ticker24h {
    /// Convert to a store observation. Rows missing a price or volume are
    /// unusable and yield `None`.
    pub fn into_observation(self, received_at: DateTime<Utc>) -> Option<(Symbol, TickerObservation)> {
        let last_price = self.last_price?;
        let quote_volume_24h = self.quote_volume?;
        Some((
            Symbol::new(&self.symbol),
            TickerObservation {
                last_price,
                quote_volume_24h,
                change_24h: self.price_change_percent,
                updated_at: received_at,
            },
        ))
    }
}

/// Fetch the instrument universe.
pub async fn fetch_exchange_info(
    client: &reqwest::Client,
    rest_base: &str,
) -> Result<ExchangeInfo, MarketError> {
    let url = format!("{}/fapi/v1/exchangeInfo", rest_base.trim_end_matches('/'));
    let info = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json::<ExchangeInfo>()
        .await?;
    Ok(info)
}

/// Fetch the full current 24h ticker array. Used once per connection to
/// avoid an empty table while the stream catches up.
pub async fn fetch_ticker_24h(
    client: &reqwest::Client,
    rest_base: &str,
) -> Result<Vec<Ticker24h>, MarketError> {
    let url = format!("{}/fapi/v1/ticker/24hr", rest_base.trim_end_matches('/'));
    let tickers = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json::<Vec<Ticker24h>>()
        .await?;
    Ok(tickers)
}

fn de_opt_str_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<&str> = Option::deserialize(deserializer)?;
    Ok(value
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|parsed| parsed.is_finite()))
}
