//! Per-account iteration driver: resolve, allocate, diff, execute.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::allocation::compute_target_weights;
use crate::broker::{Broker, Holding};
use crate::config::AccountConfig;
use crate::margin::apply_margin;
use crate::marketdata::{AumProvider, MarketCapResolver, MarketContext};
use crate::models::{
    canonical_ticker, DesiredWallet, Instrument, OrderIntent, Position, HOME_CURRENCY,
};
use crate::orders::{build_orders, is_exchange_open_now, ExchangeClosureMode, OrderSequencer};

/// What one `run_iteration` call produced.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub orders_submitted: Vec<OrderIntent>,
    pub skipped: bool,
    pub reason: Option<String>,
}

impl IterationOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            orders_submitted: Vec::new(),
            skipped: true,
            reason: Some(reason.into()),
        }
    }
}

/// The allocation computed by the latest iteration, kept for reporting.
#[derive(Debug, Clone)]
pub struct AllocationSnapshot {
    pub computed_at: DateTime<Utc>,
    pub positions: Vec<Position>,
    /// False when the snapshot comes from a dry run
    pub executed: bool,
}

/// Rebalancing engine for one account. All state is recomputed fresh
/// every iteration from broker state plus static config; only the last
/// snapshot is kept, and only for reporting.
pub struct Rebalancer<B> {
    broker: B,
    account: AccountConfig,
    aum_url: Option<String>,
    /// Suppress all submissions regardless of exchange state (CLI flag)
    dry_run: bool,
    last_snapshot: Option<AllocationSnapshot>,
}

impl<B: Broker> Rebalancer<B> {
    pub fn new(broker: B, account: AccountConfig) -> Self {
        Self {
            broker,
            account,
            aum_url: None,
            dry_run: false,
            last_snapshot: None,
        }
    }

    pub fn with_aum_url(mut self, url: Option<String>) -> Self {
        self.aum_url = url;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account.account_id
    }

    pub fn last_snapshot(&self) -> Option<&AllocationSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// One full rebalancing iteration.
    pub async fn run_iteration(&mut self) -> Result<IterationOutcome> {
        let ctx = MarketContext::build(&self.broker).await?;
        let wallet = self.normalized_wallet();

        let open = match self.status_instrument(&ctx, &wallet) {
            Some(uid) => is_exchange_open_now(&self.broker, &uid).await,
            None => true,
        };

        let closure = self.account.exchange_closure.clone();
        let mut suppress: Option<String> = None;
        if !open {
            match closure.mode() {
                ExchangeClosureMode::SkipIteration => {
                    info!(account = %self.account.account_id, "exchange closed, skipping iteration");
                    return Ok(IterationOutcome::skipped("exchange closed"));
                }
                ExchangeClosureMode::DryRun => {
                    info!(account = %self.account.account_id, "exchange closed, dry run only");
                    suppress = Some("exchange closed (dry run)".to_string());
                }
                ExchangeClosureMode::ForceOrders => {
                    warn!(account = %self.account.account_id, "exchange closed, forcing orders");
                }
            }
        }

        let positions = self.compute_plan(&ctx, &wallet).await?;
        log_plan(&self.account.account_id, &positions);

        if let Some(reason) = suppress {
            if closure.update_iteration_result {
                self.record_snapshot(positions, false);
            }
            return Ok(IterationOutcome::skipped(reason));
        }

        if self.dry_run {
            self.record_snapshot(positions, false);
            return Ok(IterationOutcome::skipped("dry run"));
        }

        let intents = build_orders(&positions);
        let sequencer = OrderSequencer::new(
            &self.broker,
            &self.account.account_id,
            self.account.order_pause(),
        );
        let submitted = sequencer
            .execute(&intents, &self.account.total_marginal_sell)
            .await;

        info!(
            account = %self.account.account_id,
            planned = intents.len(),
            submitted = submitted.len(),
            "iteration complete"
        );
        self.record_snapshot(positions, true);

        Ok(IterationOutcome {
            orders_submitted: submitted,
            skipped: false,
            reason: None,
        })
    }

    /// Compute the allocation table without touching the order path.
    /// Backs the `plan` subcommand.
    pub async fn plan(&self) -> Result<Vec<Position>> {
        let ctx = MarketContext::build(&self.broker).await?;
        let wallet = self.normalized_wallet();
        self.compute_plan(&ctx, &wallet).await
    }

    /// Configured wallet with tickers normalized to canonical aliases;
    /// duplicate keys that collapse onto one alias have their weights
    /// merged.
    fn normalized_wallet(&self) -> DesiredWallet {
        let mut wallet = DesiredWallet::new();
        for (ticker, weight) in &self.account.desired_wallet {
            *wallet.entry(canonical_ticker(ticker).to_string()).or_insert(0.0) += weight;
        }
        wallet
    }

    /// Instrument whose trading status stands in for the exchange check.
    fn status_instrument(&self, ctx: &MarketContext, wallet: &DesiredWallet) -> Option<String> {
        wallet
            .keys()
            .find_map(|ticker| ctx.find_etf(ticker).map(|i| i.uid.clone()))
    }

    async fn compute_plan(
        &self,
        ctx: &MarketContext,
        wallet: &DesiredWallet,
    ) -> Result<Vec<Position>> {
        let holdings = self.broker.portfolio(&self.account.account_id).await?;
        let resolver = MarketCapResolver::new(&self.broker, ctx);

        // Current state, keyed by canonical ticker.
        let mut cash = 0.0;
        let mut current_amounts: HashMap<String, f64> = HashMap::new();
        let mut current_lots: HashMap<String, i64> = HashMap::new();
        let mut exposure = 0.0;

        for holding in &holdings {
            let instrument = ctx
                .find_by_id(&holding.figi)
                .or_else(|| ctx.find_by_id(&holding.instrument_uid));

            // Broker reports are denominated per instrument; every row is
            // brought into home-currency terms before it touches the budget.
            let rate = holding_rate(&resolver, holding, instrument).await;
            if rate == 0.0 {
                warn!(figi = %holding.figi, "FX conversion unavailable, holding valued at zero");
            }
            let amount = holding.amount() * rate;

            if holding.is_cash() {
                cash += amount;
                continue;
            }
            exposure += amount;

            match instrument {
                Some(instrument) => {
                    let ticker = canonical_ticker(&instrument.ticker).to_string();
                    *current_amounts.entry(ticker.clone()).or_insert(0.0) += amount;
                    *current_lots.entry(ticker).or_insert(0) += holding.quantity_lots;
                }
                None => {
                    debug!(figi = %holding.figi, "holding not in listings, ignored");
                }
            }
        }

        // Capital available to the target universe: cash plus whatever the
        // universe positions are worth today. Holdings outside the
        // universe are not for sale and stay out of the budget.
        let universe_value: f64 = wallet
            .keys()
            .map(|t| current_amounts.get(t).copied().unwrap_or(0.0))
            .sum();
        let capital = cash + universe_value;

        // Resolve only the data the mode actually needs.
        let mode = self.account.mode();
        let caps = if mode.needs_market_caps() {
            resolver
                .resolve_all(wallet.keys().map(String::as_str))
                .await
        } else {
            HashMap::new()
        };
        let aums = if mode.needs_aum() {
            match self.aum_provider() {
                Ok(provider) => provider.fetch(&resolver).await,
                Err(e) => {
                    warn!(error = %e, "AUM provider unavailable");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        let weights = compute_target_weights(mode, wallet, &caps, &aums);
        let desired = apply_margin(&weights, capital, exposure, &self.account.margin);

        let mut positions = Vec::with_capacity(desired.len() + 1);
        for entry in desired {
            let instrument = ctx.find_etf(&entry.ticker);

            let (figi, lot, price) = match instrument {
                Some(i) => {
                    let raw_price = self.broker.last_price(&i.uid).await.unwrap_or_else(|e| {
                        warn!(ticker = %entry.ticker, error = %e, "price lookup failed");
                        None
                    });
                    let rate = resolver.fx_rate(&i.currency).await;
                    let price = raw_price.map(|p| p * rate);
                    (Some(i.figi.clone()), i.lot_size(), price)
                }
                None => {
                    warn!(ticker = %entry.ticker, "instrument unresolved, order will be skipped");
                    (None, 1, None)
                }
            };

            let lot_price = price.map(|p| p * lot as f64).unwrap_or(0.0);
            let current_amount = current_amounts.get(&entry.ticker).copied().unwrap_or(0.0);

            let to_buy_lots = if lot_price > 0.0 {
                (entry.amount - current_amount) / lot_price
            } else {
                f64::NAN
            };

            positions.push(Position {
                ticker: entry.ticker.clone(),
                figi,
                lot,
                lot_price,
                current_lots: current_lots.get(&entry.ticker).copied().unwrap_or(0),
                current_amount,
                current_pct: pct(current_amount, capital),
                desired_amount: entry.amount,
                desired_pct: weights.get(&entry.ticker).copied().unwrap_or(0.0),
                to_buy_lots,
                is_margin: entry.is_margin,
            });
        }

        // Cash row, reported but never traded.
        positions.push(Position {
            ticker: HOME_CURRENCY.to_uppercase(),
            current_amount: cash,
            current_pct: pct(cash, capital),
            ..Position::default()
        });

        Ok(positions)
    }

    fn aum_provider(&self) -> Result<AumProvider> {
        match &self.aum_url {
            Some(url) => AumProvider::with_url(url.clone()),
            None => AumProvider::new(),
        }
    }

    fn record_snapshot(&mut self, positions: Vec<Position>, executed: bool) {
        self.last_snapshot = Some(AllocationSnapshot {
            computed_at: Utc::now(),
            positions,
            executed,
        });
    }
}

/// Conversion rate into home terms for one portfolio row. Cash rows are
/// denominated in the currency they represent, instrument rows in the
/// currency they trade in. Rows the listings cannot identify carry no
/// currency marker and are taken at face value; home cash lands here too.
async fn holding_rate<B: Broker>(
    resolver: &MarketCapResolver<'_, B>,
    holding: &Holding,
    instrument: Option<&Instrument>,
) -> f64 {
    match instrument {
        Some(i) if holding.is_cash() => match &i.iso_currency {
            Some(iso) => resolver.fx_rate(iso).await,
            None => 1.0,
        },
        Some(i) => resolver.fx_rate(&i.currency).await,
        None => 1.0,
    }
}

fn pct(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

fn log_plan(account_id: &str, positions: &[Position]) {
    for p in positions {
        info!(
            account = %account_id,
            ticker = %p.ticker,
            current_pct = format!("{:.2}", p.current_pct),
            desired_pct = format!("{:.2}", p.desired_pct),
            to_buy_lots = format!("{:.2}", p.to_buy_lots),
            is_margin = p.is_margin,
            "allocation"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::{MockBroker, RecordedOrder};
    use crate::models::OrderDirection;
    use crate::orders::ExchangeClosureBehavior;

    fn usd_instrument() -> Instrument {
        Instrument {
            ticker: "USD000UTSTOM".to_string(),
            figi: "BBG0013HGFT4".to_string(),
            uid: "uid-usd".to_string(),
            asset_uid: None,
            lot: 1000,
            currency: "rub".to_string(),
            iso_currency: Some("usd".to_string()),
            num_shares: None,
        }
    }

    fn cash_holding(amount: f64) -> Holding {
        Holding {
            figi: "RUB000UTSTOM".to_string(),
            instrument_uid: "uid-rub".to_string(),
            instrument_type: "currency".to_string(),
            quantity: amount,
            quantity_lots: 0,
            current_price: 1.0,
        }
    }

    fn scenario_broker(open: bool) -> MockBroker {
        let mut broker = MockBroker {
            etfs: vec![MockBroker::etf("TRUR", 1, None), MockBroker::etf("TMOS", 1, None)],
            holdings: vec![cash_holding(10_000.0)],
            exchange_open: open,
            ..MockBroker::default()
        };
        broker.prices.insert("uid-TRUR".to_string(), 100.0);
        broker.prices.insert("uid-TMOS".to_string(), 100.0);
        broker
    }

    fn account(closure_mode: &str) -> AccountConfig {
        AccountConfig {
            account_id: "acc-1".to_string(),
            token_env: "BROKER_TOKEN".to_string(),
            desired_wallet: [("TRUR".to_string(), 50.0), ("TMOS".to_string(), 50.0)]
                .into_iter()
                .collect(),
            desired_mode: "manual".to_string(),
            margin: Default::default(),
            exchange_closure: ExchangeClosureBehavior {
                mode: closure_mode.to_string(),
                update_iteration_result: false,
            },
            sleep_between_orders_ms: 0,
            total_marginal_sell: Vec::new(),
        }
    }

    #[tokio::test]
    async fn fresh_portfolio_buys_both_funds() {
        let mut bot = Rebalancer::new(scenario_broker(true), account("skip_iteration"));
        let outcome = bot.run_iteration().await.unwrap();

        assert!(!outcome.skipped);
        assert_eq!(outcome.orders_submitted.len(), 2);

        let orders = bot.broker.submitted();
        assert_eq!(orders.len(), 2);
        for RecordedOrder { direction, lots, .. } in orders {
            assert_eq!(direction, OrderDirection::Buy);
            assert_eq!(lots, 50);
        }
    }

    #[tokio::test]
    async fn closed_exchange_with_skip_mode_submits_nothing() {
        let mut bot = Rebalancer::new(scenario_broker(false), account("skip_iteration"));
        let outcome = bot.run_iteration().await.unwrap();

        assert!(outcome.skipped);
        assert!(outcome.orders_submitted.is_empty());
        assert!(bot.broker.submitted().is_empty());
        assert!(bot.last_snapshot().is_none());
    }

    #[tokio::test]
    async fn closed_exchange_with_force_mode_still_submits() {
        let mut bot = Rebalancer::new(scenario_broker(false), account("force_orders"));
        let outcome = bot.run_iteration().await.unwrap();

        assert!(!outcome.skipped);
        assert_eq!(outcome.orders_submitted.len(), 2);
    }

    #[tokio::test]
    async fn closed_exchange_dry_run_records_snapshot_when_asked() {
        let mut acc = account("dry_run");
        acc.exchange_closure.update_iteration_result = true;

        let mut bot = Rebalancer::new(scenario_broker(false), acc);
        let outcome = bot.run_iteration().await.unwrap();

        assert!(outcome.skipped);
        assert!(bot.broker.submitted().is_empty());

        let snapshot = bot.last_snapshot().unwrap();
        assert!(!snapshot.executed);
        assert!(snapshot.positions.iter().any(|p| p.ticker == "TRUR"));
    }

    #[tokio::test]
    async fn malformed_closure_mode_behaves_as_skip() {
        let mut bot = Rebalancer::new(scenario_broker(false), account("not_a_real_mode"));
        let outcome = bot.run_iteration().await.unwrap();

        assert!(outcome.skipped);
        assert!(bot.broker.submitted().is_empty());
    }

    #[tokio::test]
    async fn status_check_failure_fails_open() {
        let mut broker = scenario_broker(false);
        broker.status_check_fails = true;

        // skip_iteration would normally stop here, but the failed check
        // reports open, so the iteration proceeds.
        let mut bot = Rebalancer::new(broker, account("skip_iteration"));
        let outcome = bot.run_iteration().await.unwrap();

        assert!(!outcome.skipped);
        assert_eq!(outcome.orders_submitted.len(), 2);
    }

    #[tokio::test]
    async fn cli_dry_run_suppresses_submission() {
        let mut bot =
            Rebalancer::new(scenario_broker(true), account("skip_iteration")).with_dry_run(true);
        let outcome = bot.run_iteration().await.unwrap();

        assert!(outcome.skipped);
        assert!(bot.broker.submitted().is_empty());
        assert!(bot.last_snapshot().is_some());
    }

    #[tokio::test]
    async fn overweight_position_is_sold_down() {
        let mut broker = scenario_broker(true);
        // 100 lots of TRUR at 100 RUB plus 0 cash: target is 50/50.
        broker.holdings = vec![
            cash_holding(0.0),
            Holding {
                figi: "FIGI-TRUR".to_string(),
                instrument_uid: "uid-TRUR".to_string(),
                instrument_type: "etf".to_string(),
                quantity: 100.0,
                quantity_lots: 100,
                current_price: 100.0,
            },
        ];

        let mut bot = Rebalancer::new(broker, account("skip_iteration"));
        let outcome = bot.run_iteration().await.unwrap();

        assert!(!outcome.skipped);
        let sells: Vec<_> = outcome
            .orders_submitted
            .iter()
            .filter(|o| o.direction == OrderDirection::Sell)
            .collect();
        let buys: Vec<_> = outcome
            .orders_submitted
            .iter()
            .filter(|o| o.direction == OrderDirection::Buy)
            .collect();

        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].ticker, "TRUR");
        assert_eq!(sells[0].lots, 50);
        assert_eq!(buys.len(), 1);
        assert_eq!(buys[0].ticker, "TMOS");
        assert_eq!(buys[0].lots, 50);
    }

    #[tokio::test]
    async fn foreign_holdings_are_converted_before_budgeting() {
        let mut broker = scenario_broker(true);
        let mut tspx = MockBroker::etf("TSPX", 1, None);
        tspx.currency = "usd".to_string();
        broker.etfs.push(tspx);
        broker.currencies = vec![usd_instrument()];
        broker.prices.insert("uid-TSPX".to_string(), 10.0);
        broker.prices.insert("uid-usd".to_string(), 90.0);
        broker.holdings = vec![
            cash_holding(9_000.0),
            Holding {
                figi: "FIGI-TSPX".to_string(),
                instrument_uid: "uid-TSPX".to_string(),
                instrument_type: "etf".to_string(),
                quantity: 10.0,
                quantity_lots: 10,
                current_price: 10.0,
            },
        ];

        let mut acc = account("skip_iteration");
        acc.desired_wallet = [("TSPX".to_string(), 50.0), ("TRUR".to_string(), 50.0)]
            .into_iter()
            .collect();

        let mut bot = Rebalancer::new(broker, acc);
        let outcome = bot.run_iteration().await.unwrap();

        // 10 units at 10 USD with the ruble at 90 is 9,000 in home terms,
        // exactly half of the 18,000 total. TSPX is already on target.
        assert!(outcome.orders_submitted.iter().all(|o| o.ticker != "TSPX"));

        let trur = outcome
            .orders_submitted
            .iter()
            .find(|o| o.ticker == "TRUR")
            .unwrap();
        assert_eq!(trur.direction, OrderDirection::Buy);
        assert_eq!(trur.lots, 90);
    }

    #[tokio::test]
    async fn foreign_cash_is_converted_before_budgeting() {
        let mut broker = scenario_broker(true);
        broker.currencies = vec![usd_instrument()];
        broker.prices.insert("uid-usd".to_string(), 90.0);
        // 100 USD on top of the 10,000 RUB: 19,000 of capital at rate 90.
        broker.holdings.push(Holding {
            figi: "BBG0013HGFT4".to_string(),
            instrument_uid: "uid-usd".to_string(),
            instrument_type: "currency".to_string(),
            quantity: 100.0,
            quantity_lots: 0,
            current_price: 90.0,
        });

        let mut bot = Rebalancer::new(broker, account("skip_iteration"));
        let outcome = bot.run_iteration().await.unwrap();

        assert_eq!(outcome.orders_submitted.len(), 2);
        for order in &outcome.orders_submitted {
            assert_eq!(order.lots, 95);
        }
    }

    #[tokio::test]
    async fn marketcap_mode_weights_by_resolved_caps() {
        let mut broker = scenario_broker(true);
        broker.etfs[0].num_shares = Some(300.0); // TRUR cap 30,000
        broker.etfs[1].num_shares = Some(100.0); // TMOS cap 10,000

        let mut acc = account("skip_iteration");
        acc.desired_mode = "marketcap".to_string();

        let mut bot = Rebalancer::new(broker, acc);
        let outcome = bot.run_iteration().await.unwrap();

        let trur = outcome
            .orders_submitted
            .iter()
            .find(|o| o.ticker == "TRUR")
            .unwrap();
        let tmos = outcome
            .orders_submitted
            .iter()
            .find(|o| o.ticker == "TMOS")
            .unwrap();

        // 75/25 split of 10,000 at 100 RUB per lot.
        assert_eq!(trur.lots, 75);
        assert_eq!(tmos.lots, 25);
    }
}
