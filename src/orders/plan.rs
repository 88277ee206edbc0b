//! Diff current vs. desired holdings into validated order intents.

use tracing::debug;

use crate::models::{OrderIntent, Position};

/// One intent per position that actually needs trading.
///
/// Skip rules and floor-toward-zero rounding live in
/// [`OrderIntent::from_position`]; this is the batch wrapper that logs
/// what was skipped.
pub fn build_orders(positions: &[Position]) -> Vec<OrderIntent> {
    let mut intents = Vec::new();

    for position in positions {
        match OrderIntent::from_position(position) {
            Some(intent) => intents.push(intent),
            None => {
                debug!(
                    ticker = %position.ticker,
                    to_buy_lots = position.to_buy_lots,
                    "no order for position"
                );
            }
        }
    }

    intents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderDirection;

    fn position(ticker: &str, to_buy_lots: f64) -> Position {
        Position {
            ticker: ticker.to_string(),
            figi: Some(format!("FIGI-{ticker}")),
            to_buy_lots,
            ..Position::default()
        }
    }

    #[test]
    fn emits_only_actionable_intents() {
        let positions = vec![
            position("TRUR", 2.9),
            position("TMOS", -3.2),
            position("TGLD", 0.4),
            position("RUB", 100.0),
        ];

        let intents = build_orders(&positions);
        assert_eq!(intents.len(), 2);
        assert!(intents.iter().all(|i| i.lots >= 1));
        assert!(intents.iter().all(|i| i.ticker != "RUB"));
    }

    #[test]
    fn fresh_portfolio_scenario() {
        // 10,000 RUB cash, 50/50 TRUR/TMOS, 100 RUB per lot: two buys of
        // ~50 lots each and no sells.
        let capital = 10_000.0;
        let lot_price = 100.0;
        let positions: Vec<Position> = ["TRUR", "TMOS"]
            .iter()
            .map(|ticker| Position {
                ticker: ticker.to_string(),
                figi: Some(format!("FIGI-{ticker}")),
                lot: 1,
                lot_price,
                desired_amount: capital * 0.5,
                desired_pct: 50.0,
                to_buy_lots: capital * 0.5 / lot_price,
                ..Position::default()
            })
            .collect();

        let intents = build_orders(&positions);
        assert_eq!(intents.len(), 2);
        for intent in intents {
            assert_eq!(intent.direction, OrderDirection::Buy);
            assert_eq!(intent.lots, 50);
        }
    }
}
