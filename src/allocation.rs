//! Allocation strategies: turning a configured wallet plus market data
//! into normalized target weights.

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{AumInfo, DesiredWallet, MarketCapInfo};

/// How target weights are derived from the configured wallet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationMode {
    /// Use the configured weights as-is
    #[default]
    #[serde(rename = "manual", alias = "default")]
    Manual,
    /// Weight proportional to resolved market cap
    #[serde(rename = "marketcap")]
    MarketCap,
    /// Weight proportional to resolved AUM
    #[serde(rename = "aum")]
    Aum,
    /// Blend of market-cap and AUM shares
    #[serde(rename = "marketcap_aum")]
    MarketCapAum,
    /// Configured weight shifted against the market-cap/AUM premium
    #[serde(rename = "decorrelation")]
    Decorrelation,
}

impl AllocationMode {
    /// Strict parse, used at config load time.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "manual" | "default" => Ok(Self::Manual),
            "marketcap" => Ok(Self::MarketCap),
            "aum" => Ok(Self::Aum),
            "marketcap_aum" => Ok(Self::MarketCapAum),
            "decorrelation" => Ok(Self::Decorrelation),
            other => bail!("unknown desired_mode: {other:?}"),
        }
    }

    /// Whether this mode needs resolved market caps.
    pub fn needs_market_caps(&self) -> bool {
        matches!(self, Self::MarketCap | Self::MarketCapAum | Self::Decorrelation)
    }

    /// Whether this mode needs resolved AUM data.
    pub fn needs_aum(&self) -> bool {
        matches!(self, Self::Aum | Self::MarketCapAum | Self::Decorrelation)
    }
}

/// Compute normalized target weights (summing to 100 over the resolved
/// subset) for the configured universe.
///
/// Instruments the mode cannot resolve are dropped with a warning; their
/// weight redistributes implicitly through renormalization. An empty
/// universe yields an empty map.
pub fn compute_target_weights(
    mode: AllocationMode,
    desired: &DesiredWallet,
    caps: &HashMap<String, MarketCapInfo>,
    aums: &HashMap<String, AumInfo>,
) -> DesiredWallet {
    if desired.is_empty() {
        return DesiredWallet::new();
    }

    let weights = match mode {
        AllocationMode::Manual => desired.clone(),

        AllocationMode::MarketCap => {
            proportional(desired, |ticker| caps.get(ticker).map(|c| c.market_cap))
        }

        AllocationMode::Aum => proportional(desired, |ticker| aums.get(ticker).map(|a| a.amount)),

        AllocationMode::MarketCapAum => {
            let cap_share = proportional(desired, |ticker| {
                both_resolved(ticker, caps, aums).map(|(cap, _)| cap)
            });
            let aum_share = proportional(desired, |ticker| {
                both_resolved(ticker, caps, aums).map(|(_, aum)| aum)
            });

            cap_share
                .iter()
                .filter_map(|(ticker, cap_w)| {
                    aum_share.get(ticker).map(|aum_w| (ticker.clone(), (cap_w + aum_w) / 2.0))
                })
                .collect()
        }

        AllocationMode::Decorrelation => {
            let adjusted: DesiredWallet = desired
                .iter()
                .filter_map(|(ticker, &base)| {
                    let (cap, aum) = match both_resolved(ticker, caps, aums) {
                        Some(pair) => pair,
                        None => {
                            warn!(ticker = %ticker, "decorrelation input unresolved, dropping");
                            return None;
                        }
                    };
                    if aum <= 0.0 {
                        warn!(ticker = %ticker, "non-positive AUM, dropping");
                        return None;
                    }

                    // Premium to net asset value shifts the baseline weight
                    // in the opposite direction, clamped so the adjusted
                    // weight never goes negative.
                    let premium = (cap - aum) / aum;
                    let adjustment = (-premium).clamp(-1.0, 1.0);
                    let weight = base * (1.0 + adjustment);
                    debug!(
                        ticker = %ticker,
                        premium = premium,
                        weight = weight,
                        "decorrelation adjustment"
                    );
                    Some((ticker.clone(), weight))
                })
                .collect();
            normalize(adjusted)
        }
    };

    for ticker in desired.keys() {
        if !weights.contains_key(ticker) {
            warn!(ticker = %ticker, mode = ?mode, "ticker excluded from target weights");
        }
    }

    weights
}

/// Weights proportional to `metric` over the tickers where it resolves,
/// normalized to 100.
fn proportional<F>(desired: &DesiredWallet, metric: F) -> DesiredWallet
where
    F: Fn(&str) -> Option<f64>,
{
    let resolved: DesiredWallet = desired
        .keys()
        .filter_map(|ticker| metric(ticker).map(|v| (ticker.clone(), v)))
        .collect();
    normalize(resolved)
}

fn both_resolved(
    ticker: &str,
    caps: &HashMap<String, MarketCapInfo>,
    aums: &HashMap<String, AumInfo>,
) -> Option<(f64, f64)> {
    Some((caps.get(ticker)?.market_cap, aums.get(ticker)?.amount))
}

/// Scale weights so they sum to 100; degenerate totals yield an empty map.
fn normalize(weights: DesiredWallet) -> DesiredWallet {
    let total: f64 = weights.values().sum();
    if total <= 0.0 || !total.is_finite() {
        return DesiredWallet::new();
    }
    weights
        .into_iter()
        .map(|(ticker, w)| (ticker, w / total * 100.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NumSharesSource;

    fn cap(ticker: &str, market_cap: f64) -> (String, MarketCapInfo) {
        (
            ticker.to_string(),
            MarketCapInfo::new(ticker.to_string(), market_cap, NumSharesSource::Listing, 1.0),
        )
    }

    fn aum(ticker: &str, amount: f64) -> (String, AumInfo) {
        (
            ticker.to_string(),
            AumInfo {
                amount,
                currency: "rub".to_string(),
            },
        )
    }

    fn wallet(entries: &[(&str, f64)]) -> DesiredWallet {
        entries.iter().map(|(t, w)| (t.to_string(), *w)).collect()
    }

    #[test]
    fn manual_weights_pass_through_uncorrected() {
        let desired = wallet(&[("TRUR", 60.0), ("TMOS", 60.0)]);
        let weights = compute_target_weights(
            AllocationMode::Manual,
            &desired,
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(weights["TRUR"], 60.0);
        assert_eq!(weights["TMOS"], 60.0);
    }

    #[test]
    fn marketcap_renormalizes_over_resolved_subset() {
        let desired = wallet(&[("TRUR", 40.0), ("TMOS", 40.0), ("TGLD", 20.0)]);
        let caps: HashMap<_, _> = [cap("TRUR", 300.0), cap("TMOS", 100.0)].into();

        let weights =
            compute_target_weights(AllocationMode::MarketCap, &desired, &caps, &HashMap::new());

        assert_eq!(weights.len(), 2);
        assert!((weights["TRUR"] - 75.0).abs() < 1e-9);
        assert!((weights["TMOS"] - 25.0).abs() < 1e-9);
    }

    #[test]
    fn aum_mode_uses_aum_map() {
        let desired = wallet(&[("TRUR", 50.0), ("TMOS", 50.0)]);
        let aums: HashMap<_, _> = [aum("TRUR", 100.0), aum("TMOS", 300.0)].into();

        let weights =
            compute_target_weights(AllocationMode::Aum, &desired, &HashMap::new(), &aums);

        assert!((weights["TMOS"] - 75.0).abs() < 1e-9);
    }

    #[test]
    fn blend_requires_both_sources() {
        let desired = wallet(&[("TRUR", 50.0), ("TMOS", 50.0)]);
        let caps: HashMap<_, _> = [cap("TRUR", 100.0), cap("TMOS", 100.0)].into();
        let aums: HashMap<_, _> = [aum("TRUR", 100.0)].into();

        let weights = compute_target_weights(AllocationMode::MarketCapAum, &desired, &caps, &aums);

        // TMOS has no AUM, so only TRUR survives at 100%.
        assert_eq!(weights.len(), 1);
        assert!((weights["TRUR"] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn decorrelation_underweights_premium_overweights_discount() {
        let desired = wallet(&[("TRUR", 50.0), ("TMOS", 50.0)]);
        // TRUR trades at a 50% premium to AUM, TMOS at a 50% discount.
        let caps: HashMap<_, _> = [cap("TRUR", 150.0), cap("TMOS", 50.0)].into();
        let aums: HashMap<_, _> = [aum("TRUR", 100.0), aum("TMOS", 100.0)].into();

        let weights =
            compute_target_weights(AllocationMode::Decorrelation, &desired, &caps, &aums);

        assert!(weights["TMOS"] > weights["TRUR"]);
        let sum: f64 = weights.values().sum();
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn decorrelation_never_goes_negative() {
        let desired = wallet(&[("TRUR", 50.0), ("TMOS", 50.0)]);
        // 400% premium would push the raw adjustment past -1.
        let caps: HashMap<_, _> = [cap("TRUR", 500.0), cap("TMOS", 100.0)].into();
        let aums: HashMap<_, _> = [aum("TRUR", 100.0), aum("TMOS", 100.0)].into();

        let weights =
            compute_target_weights(AllocationMode::Decorrelation, &desired, &caps, &aums);

        assert_eq!(weights["TRUR"], 0.0);
        assert!((weights["TMOS"] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn empty_universe_is_empty_result() {
        let weights = compute_target_weights(
            AllocationMode::MarketCap,
            &DesiredWallet::new(),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!(weights.is_empty());
    }

    #[test]
    fn mode_parse_is_strict() {
        assert_eq!(AllocationMode::parse("manual").unwrap(), AllocationMode::Manual);
        assert_eq!(AllocationMode::parse("default").unwrap(), AllocationMode::Manual);
        assert_eq!(
            AllocationMode::parse("marketcap_aum").unwrap(),
            AllocationMode::MarketCapAum
        );
        assert!(AllocationMode::parse("sharpe").is_err());
    }
}
