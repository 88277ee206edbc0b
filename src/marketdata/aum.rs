//! Fund AUM scraped from the management company's statistics page.
//!
//! The page is best-effort, non-authoritative data: any network or parse
//! failure degrades to an empty map so the caller can proceed with the
//! instruments that did resolve.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::models::{AumInfo, HOME_CURRENCY};

use super::MarketCapResolver;

const DEFAULT_STATS_URL: &str = "https://t-capital-funds.ru/statistics/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches and parses the fund statistics table.
pub struct AumProvider {
    http: Client,
    url: String,
}

impl AumProvider {
    pub fn new() -> Result<Self> {
        Self::with_url(DEFAULT_STATS_URL.to_string())
    }

    pub fn with_url(url: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { http, url })
    }

    /// Fetch the statistics page and return ticker -> AUM in home currency.
    ///
    /// Entries with a non-positive amount or an unconvertible currency are
    /// dropped. Never fails the batch: worst case is an empty map.
    pub async fn fetch<B: Broker>(
        &self,
        resolver: &MarketCapResolver<'_, B>,
    ) -> HashMap<String, AumInfo> {
        let html = match self.fetch_page().await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %self.url, error = %e, "AUM page fetch failed");
                return HashMap::new();
            }
        };

        let mut result = HashMap::new();
        for (ticker, amount, currency) in parse_statistics(&html) {
            if amount <= 0.0 {
                debug!(ticker = %ticker, amount = amount, "dropping non-positive AUM");
                continue;
            }

            let rate = resolver.fx_rate(&currency).await;
            if rate == 0.0 {
                warn!(ticker = %ticker, currency = %currency, "AUM currency unconvertible");
                continue;
            }

            result.insert(
                ticker,
                AumInfo {
                    amount: amount * rate,
                    currency,
                },
            );
        }

        debug!(funds = result.len(), "AUM table resolved");
        result
    }

    async fn fetch_page(&self) -> Result<String> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch AUM statistics page")?;

        if !response.status().is_success() {
            anyhow::bail!("AUM statistics request failed: {}", response.status());
        }

        response.text().await.context("Failed to read AUM page body")
    }
}

/// Extract (ticker, amount, currency) triples from the statistics table.
///
/// The table lays the fund ticker and its net asset value out in adjacent
/// cells; anything that does not fit that shape is skipped.
pub fn parse_statistics(html: &str) -> Vec<(String, f64, String)> {
    let cells = extract_cells(html);
    let mut out = Vec::new();

    let mut i = 0;
    while i + 1 < cells.len() {
        if let Some(ticker) = as_ticker(&cells[i]) {
            if let Some((amount, currency)) = parse_amount(&cells[i + 1]) {
                out.push((ticker, amount, currency));
                i += 2;
                continue;
            }
        }
        i += 1;
    }

    out
}

/// Text content of every `<td>` element, tags stripped.
fn extract_cells(html: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut rest = html;

    while let Some(start) = rest.find("<td") {
        rest = &rest[start..];
        let Some(open_end) = rest.find('>') else { break };
        rest = &rest[open_end + 1..];
        let Some(close) = rest.find("</td>") else { break };

        let inner = &rest[..close];
        cells.push(strip_tags(inner));
        rest = &rest[close + 5..];
    }

    cells
}

fn strip_tags(fragment: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for ch in fragment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace('\u{a0}', " ").trim().to_string()
}

/// The first whitespace token of a cell if it looks like a fund ticker.
fn as_ticker(cell: &str) -> Option<String> {
    let token = cell.split_whitespace().next()?;
    let looks_like_ticker = (2..=6).contains(&token.len())
        && token.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        && token.chars().next().is_some_and(|c| c.is_ascii_uppercase());
    looks_like_ticker.then(|| token.to_string())
}

/// Parse "1 234 567,89 ₽" style amounts, returning value and ISO currency.
fn parse_amount(cell: &str) -> Option<(f64, String)> {
    let currency = if cell.contains('$') || cell.to_uppercase().contains("USD") {
        "usd"
    } else if cell.contains('€') || cell.to_uppercase().contains("EUR") {
        "eur"
    } else if cell.contains('₽') || cell.to_uppercase().contains("RUB") {
        HOME_CURRENCY
    } else {
        HOME_CURRENCY
    };

    let digits: String = cell
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
        .collect();
    if digits.is_empty() {
        return None;
    }

    // When both separators appear the one that comes last is the decimal
    // point and the other marks thousands. A lone comma is a decimal
    // separator, which is the convention on the page.
    let normalized = match (digits.rfind(','), digits.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => {
            digits.replace('.', "").replace(',', ".")
        }
        (Some(_), Some(_)) => digits.replace(',', ""),
        (Some(_), None) => digits.replace(',', "."),
        _ => digits,
    };
    normalized.parse::<f64>().ok().map(|v| (v, currency.to_string()))
}
