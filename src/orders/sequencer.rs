//! Exchange-closure policy and phased, paced order submission.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, TradingStatus};
use crate::models::{OrderDirection, OrderIntent};

/// What to do with an iteration when the exchange is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExchangeClosureMode {
    /// Terminate the iteration without computing anything
    #[default]
    SkipIteration,
    /// Submit anyway; the broker rejects what it cannot take
    ForceOrders,
    /// Compute the full plan for observability, submit nothing
    DryRun,
}

impl ExchangeClosureMode {
    /// Lenient parse: an unrecognized mode must not crash the iteration,
    /// it degrades to the safest behavior with a warning.
    pub fn parse(s: &str) -> Self {
        match s {
            "skip_iteration" => Self::SkipIteration,
            "force_orders" => Self::ForceOrders,
            "dry_run" => Self::DryRun,
            other => {
                warn!(mode = %other, "unknown exchange closure mode, using skip_iteration");
                Self::SkipIteration
            }
        }
    }
}

/// Closure policy as configured per account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeClosureBehavior {
    #[serde(default = "default_closure_mode")]
    pub mode: String,

    /// Whether a closed-market dry run still records the computed
    /// allocation as the current snapshot for reporting
    #[serde(default)]
    pub update_iteration_result: bool,
}

fn default_closure_mode() -> String {
    "skip_iteration".to_string()
}

impl Default for ExchangeClosureBehavior {
    fn default() -> Self {
        Self {
            mode: default_closure_mode(),
            update_iteration_result: false,
        }
    }
}

impl ExchangeClosureBehavior {
    pub fn mode(&self) -> ExchangeClosureMode {
        ExchangeClosureMode::parse(&self.mode)
    }
}

/// Whether the instrument's exchange currently accepts orders.
///
/// Fails open: a transport error during the check reports the exchange
/// as open, since every downstream submission still validates and can
/// fail safely on its own.
pub async fn is_exchange_open_now<B: Broker>(broker: &B, uid: &str) -> bool {
    match broker.trading_status(uid).await {
        Ok(status) => status == TradingStatus::Open,
        Err(e) => {
            warn!(error = %e, "trading status check failed, assuming open");
            true
        }
    }
}

/// Submits an order plan sequentially with inter-order pacing.
pub struct OrderSequencer<'a, B> {
    broker: &'a B,
    account_id: &'a str,
    pause: Duration,
}

impl<'a, B: Broker> OrderSequencer<'a, B> {
    pub fn new(broker: &'a B, account_id: &'a str, pause: Duration) -> Self {
        Self {
            broker,
            account_id,
            pause,
        }
    }

    /// Submit the plan and return the intents that went through.
    ///
    /// When `marginal_sell_tickers` is non-empty the account requires
    /// sells to complete before margin-funded buys: phase 1 submits all
    /// sells, phase 2 the non-margin buys, phase 3 everything left. The
    /// selling-collateral-first order is a financial precondition, not an
    /// optimization. With the feature off the plan runs as one sequence.
    ///
    /// Orders are strictly sequential; each failure is logged and
    /// isolated so the rest of the batch still runs.
    pub async fn execute(
        &self,
        intents: &[OrderIntent],
        marginal_sell_tickers: &[String],
    ) -> Vec<OrderIntent> {
        let mut submitted = Vec::new();

        if marginal_sell_tickers.is_empty() {
            for intent in intents {
                self.submit_one(intent, &mut submitted).await;
            }
            return submitted;
        }

        let needs_prior_sell = |intent: &OrderIntent| {
            intent.is_margin || marginal_sell_tickers.iter().any(|t| *t == intent.ticker)
        };

        let sells: Vec<&OrderIntent> = intents
            .iter()
            .filter(|i| i.direction == OrderDirection::Sell)
            .collect();
        let plain_buys: Vec<&OrderIntent> = intents
            .iter()
            .filter(|i| i.direction == OrderDirection::Buy && !needs_prior_sell(i))
            .collect();
        let remaining: Vec<&OrderIntent> = intents
            .iter()
            .filter(|i| i.direction == OrderDirection::Buy && needs_prior_sell(i))
            .collect();

        info!(
            sells = sells.len(),
            buys = plain_buys.len(),
            deferred = remaining.len(),
            "phased submission"
        );

        // Each phase completes before the next begins.
        for intent in sells {
            self.submit_one(intent, &mut submitted).await;
        }
        for intent in plain_buys {
            self.submit_one(intent, &mut submitted).await;
        }
        for intent in remaining {
            self.submit_one(intent, &mut submitted).await;
        }

        submitted
    }

    async fn submit_one(&self, intent: &OrderIntent, submitted: &mut Vec<OrderIntent>) {
        let order_id = Uuid::new_v4().to_string();

        match self
            .broker
            .post_order(
                self.account_id,
                &intent.figi,
                intent.lots,
                intent.direction,
                &order_id,
            )
            .await
        {
            Ok(result) => {
                info!(
                    ticker = %intent.ticker,
                    direction = ?intent.direction,
                    lots = intent.lots,
                    executed = result.lots_executed,
                    status = %result.status,
                    "order submitted"
                );
                if result.lots_executed < result.lots_requested {
                    warn!(
                        ticker = %intent.ticker,
                        requested = result.lots_requested,
                        executed = result.lots_executed,
                        "order partially filled"
                    );
                }
                submitted.push(intent.clone());
            }
            Err(e) => {
                error!(
                    ticker = %intent.ticker,
                    direction = ?intent.direction,
                    lots = intent.lots,
                    error = %e,
                    "order failed"
                );
            }
        }

        // Rate-limit courtesy toward the broker.
        if !self.pause.is_zero() {
            tokio::time::sleep(self.pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;

    fn intent(ticker: &str, direction: OrderDirection, lots: u64, is_margin: bool) -> OrderIntent {
        OrderIntent {
            ticker: ticker.to_string(),
            figi: format!("FIGI-{ticker}"),
            direction,
            lots,
            is_margin,
        }
    }

    #[test]
    fn malformed_mode_degrades_to_skip() {
        assert_eq!(
            ExchangeClosureMode::parse("definitely_not_a_mode"),
            ExchangeClosureMode::SkipIteration
        );
        assert_eq!(ExchangeClosureMode::parse("dry_run"), ExchangeClosureMode::DryRun);
        assert_eq!(
            ExchangeClosureMode::parse("force_orders"),
            ExchangeClosureMode::ForceOrders
        );
    }

    #[tokio::test]
    async fn status_check_error_fails_open() {
        let broker = MockBroker {
            status_check_fails: true,
            ..MockBroker::default()
        };
        assert!(is_exchange_open_now(&broker, "uid-TRUR").await);
    }

    #[tokio::test]
    async fn closed_status_reports_closed() {
        let broker = MockBroker {
            exchange_open: false,
            ..MockBroker::default()
        };
        assert!(!is_exchange_open_now(&broker, "uid-TRUR").await);
    }

    #[tokio::test]
    async fn phases_submit_in_dependency_order() {
        let broker = MockBroker::default();
        let sequencer = OrderSequencer::new(&broker, "acc-1", Duration::ZERO);

        let intents = vec![
            intent("TGLD", OrderDirection::Buy, 2, true),
            intent("TMOS", OrderDirection::Buy, 3, false),
            intent("TRUR", OrderDirection::Sell, 5, false),
            intent("TLCB", OrderDirection::Buy, 1, false),
            intent("TPAY", OrderDirection::Sell, 4, false),
        ];

        let submitted = sequencer
            .execute(&intents, &["TGLD".to_string()])
            .await;
        assert_eq!(submitted.len(), 5);

        let order: Vec<String> = broker.submitted().iter().map(|o| o.figi.clone()).collect();
        let pos = |figi: &str| order.iter().position(|f| f == figi).unwrap();

        // All sells precede every non-margin buy, which precede the rest.
        assert!(pos("FIGI-TRUR") < pos("FIGI-TMOS"));
        assert!(pos("FIGI-TPAY") < pos("FIGI-TMOS"));
        assert!(pos("FIGI-TMOS") < pos("FIGI-TGLD"));
        assert!(pos("FIGI-TLCB") < pos("FIGI-TGLD"));
    }

    #[tokio::test]
    async fn unphased_plan_runs_in_given_order() {
        let broker = MockBroker::default();
        let sequencer = OrderSequencer::new(&broker, "acc-1", Duration::ZERO);

        let intents = vec![
            intent("TGLD", OrderDirection::Buy, 2, true),
            intent("TRUR", OrderDirection::Sell, 5, false),
        ];

        sequencer.execute(&intents, &[]).await;

        let order: Vec<String> = broker.submitted().iter().map(|o| o.figi.clone()).collect();
        assert_eq!(order, vec!["FIGI-TGLD", "FIGI-TRUR"]);
    }

    #[tokio::test]
    async fn one_rejection_does_not_abort_the_batch() {
        let mut broker = MockBroker::default();
        broker.rejected_figis.insert("FIGI-TMOS".to_string());
        let sequencer = OrderSequencer::new(&broker, "acc-1", Duration::ZERO);

        let intents = vec![
            intent("TMOS", OrderDirection::Buy, 3, false),
            intent("TRUR", OrderDirection::Buy, 2, false),
        ];

        let submitted = sequencer.execute(&intents, &[]).await;
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].ticker, "TRUR");
        assert_eq!(broker.submitted().len(), 1);
    }
}
