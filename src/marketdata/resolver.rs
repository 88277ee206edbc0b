//! Market-cap resolution with ordered source fallback, plus FX rates.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::broker::Broker;
use crate::marketdata::MarketContext;
use crate::models::{MarketCapInfo, NumSharesSource, HOME_CURRENCY};

/// Resolves market caps against one iteration's context.
pub struct MarketCapResolver<'a, B> {
    broker: &'a B,
    ctx: &'a MarketContext,
}

impl<'a, B: Broker> MarketCapResolver<'a, B> {
    pub fn new(broker: &'a B, ctx: &'a MarketContext) -> Self {
        Self { broker, ctx }
    }

    /// Conversion rate from `currency` into the home currency.
    ///
    /// Returns `0.0` when no rate can be resolved; callers must treat that
    /// as "conversion unavailable", not as a worthless currency.
    pub async fn fx_rate(&self, currency: &str) -> f64 {
        if currency.eq_ignore_ascii_case(HOME_CURRENCY) {
            return 1.0;
        }

        let Some(instrument) = self.ctx.find_currency(currency) else {
            warn!(currency = %currency, "no currency instrument for FX rate");
            return 0.0;
        };

        match self.broker.last_price(&instrument.uid).await {
            Ok(Some(rate)) => rate,
            Ok(None) => {
                warn!(currency = %currency, "no last price for FX rate");
                0.0
            }
            Err(e) => {
                warn!(currency = %currency, error = %e, "FX rate lookup failed");
                0.0
            }
        }
    }

    /// Resolve market cap for one ticker, or `None` when any required
    /// input is missing. Failures are logged and never abort the batch.
    pub async fn resolve(&self, ticker: &str) -> Option<MarketCapInfo> {
        let instrument = match self.ctx.find_etf(ticker) {
            Some(i) => i,
            None => {
                warn!(ticker = %ticker, "instrument not found in listings");
                return None;
            }
        };

        // Price is the fail-closed gate: no price, no market cap.
        let raw_price = match self.broker.last_price(&instrument.uid).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                warn!(ticker = %ticker, "no last price, market cap unresolved");
                return None;
            }
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "price lookup failed");
                return None;
            }
        };

        let rate = self.fx_rate(&instrument.currency).await;
        if rate == 0.0 {
            warn!(ticker = %ticker, currency = %instrument.currency, "FX conversion unavailable");
            return None;
        }
        let last_price = raw_price * rate;

        // Outstanding shares: first tier that answers wins. An explicit
        // zero is a valid answer and yields a zero market cap.
        let chain = [
            NumSharesSource::Listing,
            NumSharesSource::EtfBy,
            NumSharesSource::Asset,
        ];
        for source in chain {
            let shares = match source {
                NumSharesSource::Listing => instrument.num_shares,
                NumSharesSource::EtfBy => self
                    .broker
                    .etf_num_shares(&instrument.uid)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(ticker = %ticker, error = %e, "etf-by lookup failed");
                        None
                    }),
                NumSharesSource::Asset => match &instrument.asset_uid {
                    Some(asset_uid) => self
                        .broker
                        .asset_num_shares(asset_uid)
                        .await
                        .unwrap_or_else(|e| {
                            warn!(ticker = %ticker, error = %e, "asset lookup failed");
                            None
                        }),
                    None => None,
                },
            };

            if let Some(num_shares) = shares {
                debug!(
                    ticker = %ticker,
                    num_shares = num_shares,
                    source = ?source,
                    "market cap resolved"
                );
                return Some(MarketCapInfo::new(
                    ticker.to_string(),
                    num_shares,
                    source,
                    last_price,
                ));
            }
        }

        warn!(ticker = %ticker, "outstanding shares unresolved in all tiers");
        None
    }

    /// Resolve a whole universe; unresolved tickers are simply absent.
    pub async fn resolve_all<'t, I>(&self, tickers: I) -> HashMap<String, MarketCapInfo>
    where
        I: IntoIterator<Item = &'t str>,
    {
        let mut result = HashMap::new();
        for ticker in tickers {
            if let Some(info) = self.resolve(ticker).await {
                result.insert(info.ticker.clone(), info);
            }
        }
        result
    }
}
