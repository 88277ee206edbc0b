//! REST client for the broker's gRPC-gateway API.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::models::{Instrument, OrderDirection};

use super::types::*;
use super::{Broker, Holding, OrderResult, TradingStatus};

const DEFAULT_BASE_URL: &str = "https://invest-public-api.tbank.ru/rest";
const SERVICE_PREFIX: &str = "tinkoff.public.invest.api.contract.v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Broker client over the REST gateway with bearer-token auth.
pub struct RestBroker {
    http: Client,
    base_url: String,
    token: String,
}

impl RestBroker {
    pub fn new(token: String) -> Result<Self> {
        Self::with_base_url(token, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(token: String, base_url: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    /// POST a JSON body to one gateway method and decode the response.
    async fn call<B: Serialize, R: DeserializeOwned>(
        &self,
        service: &str,
        method: &str,
        body: &B,
    ) -> Result<R> {
        let url = format!("{}/{}.{}/{}", self.base_url, SERVICE_PREFIX, service, method);

        debug!(url = %url, "Broker API call");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to call {service}/{method}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("{service}/{method} failed: {status} - {text}");
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {service}/{method} response"))
    }

    fn into_instrument(payload: InstrumentPayload) -> Instrument {
        Instrument {
            ticker: payload.ticker,
            figi: payload.figi,
            uid: payload.uid,
            asset_uid: payload.asset_uid,
            lot: payload.lot.max(1) as u64,
            currency: payload.currency.to_lowercase(),
            iso_currency: payload.iso_currency_name.map(|c| c.to_lowercase()),
            num_shares: payload.num_shares.map(Quotation::to_f64),
        }
    }
}

impl Broker for RestBroker {
    async fn list_etfs(&self) -> Result<Vec<Instrument>> {
        let response: InstrumentsResponse = self
            .call(
                "InstrumentsService",
                "Etfs",
                &json!({ "instrumentStatus": "INSTRUMENT_STATUS_BASE" }),
            )
            .await?;

        Ok(response
            .instruments
            .into_iter()
            .map(Self::into_instrument)
            .collect())
    }

    async fn list_currencies(&self) -> Result<Vec<Instrument>> {
        let response: InstrumentsResponse = self
            .call(
                "InstrumentsService",
                "Currencies",
                &json!({ "instrumentStatus": "INSTRUMENT_STATUS_BASE" }),
            )
            .await?;

        Ok(response
            .instruments
            .into_iter()
            .map(Self::into_instrument)
            .collect())
    }

    async fn last_price(&self, uid: &str) -> Result<Option<f64>> {
        let response: LastPricesResponse = self
            .call(
                "MarketDataService",
                "GetLastPrices",
                &json!({ "instrumentId": [uid] }),
            )
            .await?;

        Ok(response
            .last_prices
            .into_iter()
            .find(|p| p.instrument_uid == uid)
            .and_then(|p| p.price)
            .map(Quotation::to_f64))
    }

    async fn etf_num_shares(&self, uid: &str) -> Result<Option<f64>> {
        let response: InstrumentResponse = self
            .call(
                "InstrumentsService",
                "EtfBy",
                &json!({ "idType": "INSTRUMENT_ID_TYPE_UID", "id": uid }),
            )
            .await?;

        Ok(response
            .instrument
            .and_then(|i| i.num_shares)
            .map(Quotation::to_f64))
    }

    async fn asset_num_shares(&self, asset_uid: &str) -> Result<Option<f64>> {
        let response: AssetResponse = self
            .call("InstrumentsService", "GetAssetBy", &json!({ "id": asset_uid }))
            .await?;

        Ok(response
            .asset
            .and_then(|a| a.security)
            .and_then(|s| s.etf)
            .and_then(|e| e.num_share)
            .map(Quotation::to_f64))
    }

    async fn portfolio(&self, account_id: &str) -> Result<Vec<Holding>> {
        let response: PortfolioResponse = self
            .call(
                "OperationsService",
                "GetPortfolio",
                &json!({ "accountId": account_id }),
            )
            .await?;

        Ok(response
            .positions
            .into_iter()
            .map(|p| Holding {
                figi: p.figi,
                instrument_uid: p.instrument_uid,
                instrument_type: p.instrument_type.to_lowercase(),
                quantity: p.quantity.to_f64(),
                quantity_lots: p.quantity_lots.to_f64() as i64,
                current_price: p.current_price.to_f64(),
            })
            .collect())
    }

    async fn trading_status(&self, uid: &str) -> Result<TradingStatus> {
        let response: TradingStatusResponse = self
            .call(
                "MarketDataService",
                "GetTradingStatus",
                &json!({ "instrumentId": uid }),
            )
            .await?;

        let status = if response.trading_status == "SECURITY_TRADING_STATUS_NORMAL_TRADING" {
            TradingStatus::Open
        } else {
            TradingStatus::Closed
        };
        Ok(status)
    }

    async fn post_order(
        &self,
        account_id: &str,
        figi: &str,
        lots: u64,
        direction: OrderDirection,
        order_id: &str,
    ) -> Result<OrderResult> {
        let request = PostOrderRequest {
            figi: figi.to_string(),
            quantity: lots.to_string(),
            direction: match direction {
                OrderDirection::Buy => "ORDER_DIRECTION_BUY".to_string(),
                OrderDirection::Sell => "ORDER_DIRECTION_SELL".to_string(),
            },
            account_id: account_id.to_string(),
            order_type: "ORDER_TYPE_MARKET".to_string(),
            order_id: order_id.to_string(),
        };

        let response: PostOrderResponse = self
            .call("OrdersService", "PostOrder", &request)
            .await?;

        Ok(OrderResult {
            order_id: response.order_id,
            status: response.execution_report_status,
            lots_requested: response.lots_requested,
            lots_executed: response.lots_executed,
        })
    }
}
