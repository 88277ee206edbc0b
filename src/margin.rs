//! Margin-aware sizing of desired amounts.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::DesiredWallet;

/// What to do with excess margin exposure found in current holdings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancingStrategy {
    /// Unwind back toward the unlevered target
    #[default]
    Remove,
    /// Leave it untouched
    Keep,
    /// Leave it untouched only while it stays small
    KeepIfSmall,
}

/// Margin trading configuration for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Leverage multiplier, valid range [1, 4]
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Unlevered capital always kept free, home currency
    #[serde(default)]
    pub free_threshold: f64,

    /// Hard cap on margin exposure, home currency
    #[serde(default)]
    pub max_margin_size: f64,

    #[serde(default)]
    pub balancing_strategy: BalancingStrategy,
}

fn default_multiplier() -> f64 {
    1.0
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            multiplier: default_multiplier(),
            free_threshold: 0.0,
            max_margin_size: 0.0,
            balancing_strategy: BalancingStrategy::default(),
        }
    }
}

impl MarginConfig {
    /// Load-time validation; violations are fatal for the account.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1.0..=4.0).contains(&self.multiplier),
            "margin multiplier {} outside [1, 4]",
            self.multiplier
        );
        ensure!(
            self.free_threshold >= 0.0,
            "free_threshold must be non-negative"
        );
        ensure!(
            self.max_margin_size >= 0.0,
            "max_margin_size must be non-negative"
        );
        Ok(())
    }
}

/// A margin-adjusted desired amount for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredAmount {
    pub ticker: String,
    pub amount: f64,
    pub is_margin: bool,
}

/// Turn target weights into desired amounts.
///
/// With margin disabled each amount is exactly `weight * capital`. With
/// margin enabled the deployable total is scaled up by the multiplier,
/// bounded by `free_threshold` and `max_margin_size`; positions funded
/// beyond unlevered capital are flagged `is_margin`. Excess margin
/// already present in current holdings is handled per the balancing
/// strategy before sizing.
pub fn apply_margin(
    weights: &DesiredWallet,
    capital: f64,
    current_exposure: f64,
    config: &MarginConfig,
) -> Vec<DesiredAmount> {
    if !config.enabled {
        return weights
            .iter()
            .map(|(ticker, w)| DesiredAmount {
                ticker: ticker.clone(),
                amount: w / 100.0 * capital,
                is_margin: false,
            })
            .collect();
    }

    let own_budget = (capital - config.free_threshold).max(0.0);
    let margin_budget = (capital * (config.multiplier - 1.0)).min(config.max_margin_size);

    let excess = (current_exposure - capital).max(0.0);
    let unwind = excess > 0.0
        && match config.balancing_strategy {
            BalancingStrategy::Remove => true,
            BalancingStrategy::Keep => false,
            BalancingStrategy::KeepIfSmall => excess > config.free_threshold,
        };

    let deployable = if unwind {
        info!(excess = excess, "unwinding excess margin toward unlevered target");
        capital
    } else if excess > 0.0 {
        // Keeping existing excess: do not generate unwind sells.
        (own_budget + margin_budget).max(current_exposure)
    } else {
        own_budget + margin_budget
    };

    debug!(
        capital = capital,
        deployable = deployable,
        margin_budget = margin_budget,
        "margin sizing"
    );

    let mut amounts: Vec<DesiredAmount> = weights
        .iter()
        .map(|(ticker, w)| DesiredAmount {
            ticker: ticker.clone(),
            amount: w / 100.0 * deployable,
            is_margin: false,
        })
        .collect();

    // Mark the positions that spill past unlevered capital as margin
    // positions, largest first so the flag lands on the fewest rows.
    if !unwind {
        amounts.sort_by(|a, b| b.amount.total_cmp(&a.amount));
        let mut cumulative = 0.0;
        for entry in &mut amounts {
            cumulative += entry.amount;
            if cumulative > own_budget + 1e-9 {
                entry.is_margin = true;
            }
        }
    }

    amounts
}
