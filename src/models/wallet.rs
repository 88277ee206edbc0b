//! Desired wallet: the configured target universe and weights.

use std::collections::HashMap;

use tracing::warn;

/// Home currency for all amounts after conversion.
pub const HOME_CURRENCY: &str = "rub";

/// Ticker -> target weight (percent). Keys define the target universe.
pub type DesiredWallet = HashMap<String, f64>;

/// True for the cash row the broker reports alongside real positions.
pub fn is_home_cash(ticker: &str) -> bool {
    ticker.eq_ignore_ascii_case(HOME_CURRENCY)
}

/// Warn when configured weights stray from 100. Totals outside [99, 101]
/// are suspicious but never fatal: weights are renormalized downstream.
pub fn check_weight_sum(wallet: &DesiredWallet) -> f64 {
    let sum: f64 = wallet.values().sum();
    if !(99.0..=101.0).contains(&sum) {
        warn!(sum = sum, "desired wallet weights do not sum to 100");
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_cash_is_case_insensitive() {
        assert!(is_home_cash("rub"));
        assert!(is_home_cash("RUB"));
        assert!(!is_home_cash("TRUR"));
    }

    #[test]
    fn weight_sum_is_reported_not_corrected() {
        let mut wallet = DesiredWallet::new();
        wallet.insert("TRUR".to_string(), 60.0);
        wallet.insert("TMOS".to_string(), 60.0);
        assert_eq!(check_weight_sum(&wallet), 120.0);
    }
}
