//! Position lifecycle controller.
//!
//! Drives the hedged position through `Uninitialized -> Active <-> Rebalancing`
//! with `Faulted` as the resting state for any partial failure. Every operation
//! takes the current `Position` by value and returns the next one; each
//! transition is committed to the `PositionStore` before the next external call.

use crate::config::Config;
use crate::error::{HedgeError, Result};
use crate::exchange::{HedgeVenue, PriceOracle};
use crate::notify::{Alert, AlertSeverity, AlertSink};
use crate::persistence::PositionStore;
use crate::pool::{DepositRequest, PoolLedger};
use crate::position::{FailedStep, LegState, Position, PositionStatus};
use crate::strategy::range::{compute_range, RangePlan};
use crate::strategy::report::{HedgeSizeSource, StatusReport};
use chrono::Utc;
use rust_decimal::Decimal;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Parameters the controller reads on every operation.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub pair_symbol: String,
    pub base_capital: Decimal,
    pub price_range_fraction: Decimal,
    pub rebalance_threshold_fraction: Decimal,
    pub slippage_tolerance: Decimal,
    /// Bound on every oracle, ledger and venue call
    pub call_timeout: Duration,
    /// Bound on alert delivery
    pub alert_timeout: Duration,
}

impl ControllerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pair_symbol: config.strategy.pair_symbol.clone(),
            base_capital: config.strategy.base_capital,
            price_range_fraction: config.strategy.price_range_fraction,
            rebalance_threshold_fraction: config.strategy.rebalance_threshold_fraction,
            slippage_tolerance: config.strategy.slippage_tolerance,
            call_timeout: config.execution.call_timeout(),
            alert_timeout: config.execution.alert_timeout(),
        }
    }
}

/// Clears the in-flight flag when a rebalance returns, however it returns.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates both legs of the hedged position.
pub struct RebalanceController {
    config: ControllerConfig,
    oracle: Arc<dyn PriceOracle>,
    ledger: Arc<dyn PoolLedger>,
    venue: Arc<dyn HedgeVenue>,
    alerts: Arc<dyn AlertSink>,
    store: Arc<dyn PositionStore>,
    in_flight: AtomicBool,
}

impl RebalanceController {
    pub fn new(
        config: ControllerConfig,
        oracle: Arc<dyn PriceOracle>,
        ledger: Arc<dyn PoolLedger>,
        venue: Arc<dyn HedgeVenue>,
        alerts: Arc<dyn AlertSink>,
        store: Arc<dyn PositionStore>,
    ) -> Self {
        Self {
            config,
            oracle,
            ledger,
            venue,
            alerts,
            store,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Fetch the current price of the hedged pair.
    pub async fn current_price(&self) -> Result<Decimal> {
        let price = self
            .bounded(
                "price fetch",
                self.oracle.get_price(&self.config.pair_symbol),
                HedgeError::Oracle,
            )
            .await?;

        if price <= Decimal::ZERO {
            return Err(HedgeError::Oracle(format!(
                "non-positive price {} for {}",
                price, self.config.pair_symbol
            )));
        }
        Ok(price)
    }

    /// Open the pool leg and its hedge around the current price.
    ///
    /// Fails without side effects if the price cannot be read or the range is
    /// invalid. Once the deposit is attempted, failures are reported through a
    /// `Faulted` position rather than an error.
    pub async fn initialize_position(&self, position: Position) -> Result<Position> {
        if position.status != PositionStatus::Uninitialized {
            return Err(HedgeError::InvalidInput(format!(
                "cannot initialize a {} position",
                position.status
            )));
        }

        let price = self.current_price().await?;
        let plan = compute_range(
            price,
            self.config.base_capital,
            self.config.price_range_fraction,
        )?;

        info!(
            %price,
            lower = %plan.lower_price,
            upper = %plan.upper_price,
            pool_asset = %plan.pool_asset_amount,
            paired_asset = %plan.paired_asset_amount,
            "Initializing hedged position"
        );

        Ok(self.open_legs(position, price, plan).await)
    }

    /// Whether `price` has come within the rebalance threshold of either boundary.
    ///
    /// Only an `Active` position can drift.
    pub fn check_drift_condition(&self, position: &Position, price: Decimal) -> bool {
        if !position.is_active() {
            return false;
        }

        let t = self.config.rebalance_threshold_fraction;
        let lower_threshold = position.lower_price * (Decimal::ONE + t);
        let upper_threshold = position.upper_price * (Decimal::ONE - t);

        let drifted = price <= lower_threshold || price >= upper_threshold;
        debug!(
            %price,
            %lower_threshold,
            %upper_threshold,
            drifted,
            "Drift check"
        );
        drifted
    }

    /// Tear down both legs and recreate them around the current price.
    ///
    /// Order: withdraw pool leg, recompute range, close hedge, recreate. A
    /// failed step leaves the position `Faulted` and nothing after it runs.
    pub async fn rebalance(&self, position: Position) -> Result<Position> {
        if position.status != PositionStatus::Active {
            return Err(HedgeError::RebalanceRejected(position.status.to_string()));
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(HedgeError::RebalanceRejected(
                PositionStatus::Rebalancing.to_string(),
            ));
        }
        let _guard = InFlightGuard(&self.in_flight);

        Ok(self.run_rebalance(position).await)
    }

    async fn run_rebalance(&self, position: Position) -> Position {
        let old_lower = position.lower_price;
        let old_upper = position.upper_price;
        let mut position = position.with_status(PositionStatus::Rebalancing);
        self.commit(&position);

        info!(
            lower = %old_lower,
            upper = %old_upper,
            hedge_size = %position.hedge_size,
            "Rebalance started"
        );

        // 1. Pool leg
        if let Some(handle) = position.pool_handle.clone() {
            match self
                .bounded(
                    "remove_liquidity",
                    self.ledger.remove_liquidity(&handle),
                    HedgeError::LedgerSubmit,
                )
                .await
            {
                Ok(withdrawal) => {
                    info!(
                        position_id = %handle.id,
                        pool_asset = %withdrawal.pool_asset_amount,
                        paired_asset = %withdrawal.paired_asset_amount,
                        "Pool leg withdrawn"
                    );
                    position = position.clear_pool_leg();
                    self.commit(&position);
                }
                Err(e) => {
                    return self
                        .enter_fault(position, FailedStep::PoolWithdraw, LegState::Unknown, &e)
                        .await;
                }
            }
        } else {
            warn!("Active position had no pool handle; skipping withdrawal");
        }

        // 2. New range. A failure here still closes the hedge below.
        let next = match self.current_price().await {
            Ok(price) => compute_range(
                price,
                self.config.base_capital,
                self.config.price_range_fraction,
            )
            .map(|plan| (price, plan)),
            Err(e) => Err(e),
        };
        if let Err(e) = &next {
            warn!(error = %e, "Range recompute failed; closing hedge without recreating");
        }

        // 3. Hedge leg
        if let Some(order) = position.hedge_order_ref.clone() {
            match self
                .bounded(
                    "close_short",
                    self.venue.close_short(&order),
                    HedgeError::VenueSubmit,
                )
                .await
            {
                Ok(closed) => {
                    if closed < order.filled_quantity {
                        warn!(
                            order_id = %order.order_id,
                            filled = %order.filled_quantity,
                            %closed,
                            "Hedge close bought back less than the recorded short"
                        );
                    }
                    info!(order_id = %order.order_id, %closed, "Hedge leg closed");
                    position = position.clear_hedge_leg();
                    self.commit(&position);
                }
                Err(e) => {
                    return self
                        .enter_fault(position, FailedStep::HedgeClose, LegState::Unknown, &e)
                        .await;
                }
            }
        } else {
            position = position.clear_hedge_leg();
        }

        // 4. Recreate
        match next {
            Ok((price, plan)) => {
                info!(
                    %price,
                    lower = %plan.lower_price,
                    upper = %plan.upper_price,
                    "Recreating legs at new range"
                );
                self.open_legs(position, price, plan).await
            }
            Err(e) => {
                self.enter_fault(position, FailedStep::RangeRecompute, LegState::Closed, &e)
                    .await
            }
        }
    }

    /// Deposit the pool leg, then hedge it. `base` must have no open legs.
    async fn open_legs(&self, base: Position, price: Decimal, plan: RangePlan) -> Position {
        let rebalancing = base.status == PositionStatus::Rebalancing;
        let request = DepositRequest {
            pool_asset_amount: plan.pool_asset_amount,
            paired_asset_amount: plan.paired_asset_amount,
            lower_price: plan.lower_price,
            upper_price: plan.upper_price,
            slippage_tolerance: self.config.slippage_tolerance,
        };

        let handle = match self
            .bounded(
                "add_liquidity",
                self.ledger.add_liquidity(request),
                HedgeError::LedgerSubmit,
            )
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                return self
                    .enter_fault(base, FailedStep::PoolDeposit, LegState::Closed, &e)
                    .await;
            }
        };

        info!(position_id = %handle.id, "Pool leg opened");

        let mut position = base;
        position.lower_price = plan.lower_price;
        position.upper_price = plan.upper_price;
        position.pool_asset_amount = plan.pool_asset_amount;
        position.paired_asset_amount = plan.paired_asset_amount;
        position.entry_price = price;
        position.pool_handle = Some(handle);
        position.updated_at = Utc::now();
        self.commit(&position);

        let order = match self
            .bounded(
                "open_short",
                self.venue.open_short(plan.pool_asset_amount),
                HedgeError::VenueSubmit,
            )
            .await
        {
            Ok(order) => order,
            Err(e) => {
                return self
                    .enter_fault(position, FailedStep::HedgeOpen, LegState::Unhedged, &e)
                    .await;
            }
        };

        if order.is_partial_fill() {
            warn!(
                order_id = %order.order_id,
                requested = %order.requested_quantity,
                filled = %order.filled_quantity,
                "Hedge partially filled; position carries residual delta"
            );
        }

        position.hedge_size = order.filled_quantity;
        position.hedge_order_ref = Some(order);
        position.fault = None;
        if position.opened_at.is_none() {
            position.opened_at = Some(Utc::now());
        }
        if rebalancing {
            position.rebalance_count += 1;
        }
        let position = position.with_status(PositionStatus::Active);
        self.commit(&position);

        info!(
            lower = %position.lower_price,
            upper = %position.upper_price,
            hedge_size = %position.hedge_size,
            net_delta = %position.net_delta(),
            "Position active"
        );
        position
    }

    /// Read-only snapshot of the position at the current price.
    ///
    /// The hedge size is queried live and falls back to the recorded size when
    /// the venue does not answer.
    pub async fn generate_report(&self, position: &Position) -> Result<StatusReport> {
        let price = self.current_price().await?;

        let (hedge_size, source) = match self
            .bounded("query_short", self.venue.query_short(), HedgeError::VenueSubmit)
            .await
        {
            Ok(size) => (size, HedgeSizeSource::Venue),
            Err(e) => {
                warn!(error = %e, "Hedge query failed; reporting recorded size");
                (position.hedge_size, HedgeSizeSource::Recorded)
            }
        };

        Ok(StatusReport::build(position, price, hedge_size, source))
    }

    /// Push a report through the alert sink.
    pub async fn send_report(&self, report: &StatusReport) {
        self.deliver(&report.render()).await;
    }

    /// Reset a `Faulted` position to `Uninitialized`.
    ///
    /// Without `force`, both legs must be confirmed closed. With `force` the
    /// operator asserts the legs were reconciled by hand.
    pub async fn recover(&self, position: Position, force: bool) -> Result<Position> {
        if position.status != PositionStatus::Faulted {
            return Err(HedgeError::InvalidInput(format!(
                "only a FAULTED position can be recovered, got {}",
                position.status
            )));
        }

        if !position.is_idle_fault() {
            if !force {
                let legs = position
                    .fault
                    .as_ref()
                    .map(|f| format!("{:?}", f.legs))
                    .unwrap_or_else(|| "Unknown".to_string());
                return Err(HedgeError::InvalidInput(format!(
                    "legs are {}; reconcile manually and recover with force",
                    legs
                )));
            }
            warn!(
                pool_handle = ?position.pool_handle,
                hedge_order = ?position.hedge_order_ref,
                "Forcing recovery of a position with legs not confirmed closed"
            );
        }

        let reset = Position {
            rebalance_count: position.rebalance_count,
            ..Position::uninitialized()
        };
        self.commit(&reset);

        self.alert(Alert::new(
            AlertSeverity::Info,
            "Position recovered",
            format!(
                "Faulted position reset to {}; it will be redeployed on the next iteration",
                reset.status
            ),
        ))
        .await;

        Ok(reset)
    }

    /// Settle a record loaded at startup.
    ///
    /// A `Rebalancing` record, or an `Uninitialized` one with legs attached,
    /// means the process stopped mid-saga; neither leg can be trusted.
    pub async fn reconcile_on_startup(&self, position: Position) -> Position {
        let interrupted = position.status == PositionStatus::Rebalancing
            || (position.status == PositionStatus::Uninitialized && position.has_open_legs());

        if !interrupted {
            return position;
        }

        let reason = format!("process stopped while position was {}", position.status);
        self.enter_fault(position, FailedStep::Interrupted, LegState::Unknown, reason)
            .await
    }

    async fn enter_fault(
        &self,
        position: Position,
        step: FailedStep,
        legs: LegState,
        err: impl fmt::Display,
    ) -> Position {
        error!(%step, legs = ?legs, error = %err, "Position faulted");

        let faulted = position.into_faulted(step, legs, err.to_string());
        self.commit(&faulted);

        if let Some(fault) = &faulted.fault {
            self.alert(Alert::for_fault(&faulted, fault)).await;
        }
        faulted
    }

    fn commit(&self, position: &Position) {
        if let Err(e) = self.store.save(position) {
            warn!(status = %position.status, error = %e, "Failed to persist position");
        }
    }

    async fn alert(&self, alert: Alert) {
        alert.emit();
        self.deliver(&alert.render()).await;
    }

    async fn deliver(&self, text: &str) {
        match timeout(self.config.alert_timeout, self.alerts.notify(text)).await {
            Ok(Ok(())) => debug!("Notification delivered"),
            Ok(Err(e)) => warn!(error = %e, "Notification delivery failed"),
            Err(_) => warn!(
                timeout = ?self.config.alert_timeout,
                "Notification delivery timed out"
            ),
        }
    }

    async fn bounded<T, F>(
        &self,
        what: &str,
        call: F,
        on_timeout: fn(String) -> HedgeError,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(format!(
                "{} timed out after {:?}",
                what, self.config.call_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokensConfig;
    use crate::exchange::traits::{MockHedgeVenue, MockPriceOracle};
    use crate::exchange::{PaperHedgeVenue, PaperPriceOracle};
    use crate::notify::{AlertError, MockAlertSink};
    use crate::persistence::MemoryPositionStore;
    use crate::pool::{MockPoolLedger, PaperPoolLedger, Withdrawal};
    use crate::position::{OrderRef, PositionHandle};
    use rust_decimal_macros::dec;

    fn test_config() -> ControllerConfig {
        ControllerConfig {
            pair_symbol: "SUIUSDC".to_string(),
            base_capital: dec!(1000),
            price_range_fraction: dec!(0.05),
            rebalance_threshold_fraction: dec!(0.01),
            slippage_tolerance: dec!(0.005),
            call_timeout: Duration::from_secs(5),
            alert_timeout: Duration::from_secs(1),
        }
    }

    fn fixed_price(price: Decimal) -> MockPriceOracle {
        let mut oracle = MockPriceOracle::new();
        oracle.expect_get_price().returning(move |_| Ok(price));
        oracle
    }

    fn quiet_alerts() -> MockAlertSink {
        let mut alerts = MockAlertSink::new();
        alerts.expect_notify().returning(|_| Ok(()));
        alerts
    }

    fn filled(quantity: Decimal) -> OrderRef {
        OrderRef {
            order_id: "42".to_string(),
            symbol: "SUIUSDC".to_string(),
            requested_quantity: quantity,
            filled_quantity: quantity,
        }
    }

    fn active_position() -> Position {
        Position {
            lower_price: dec!(0.95),
            upper_price: dec!(1.05),
            pool_asset_amount: dec!(500),
            paired_asset_amount: dec!(500),
            hedge_size: dec!(500),
            pool_handle: Some(PositionHandle::new("0xpos")),
            hedge_order_ref: Some(filled(dec!(500))),
            status: PositionStatus::Active,
            entry_price: dec!(1.00),
            ..Position::uninitialized()
        }
    }

    fn build(
        config: ControllerConfig,
        oracle: impl PriceOracle + 'static,
        ledger: impl PoolLedger + 'static,
        venue: impl HedgeVenue + 'static,
        alerts: impl AlertSink + 'static,
    ) -> (RebalanceController, Arc<MemoryPositionStore>) {
        let store = Arc::new(MemoryPositionStore::new());
        let controller = RebalanceController::new(
            config,
            Arc::new(oracle),
            Arc::new(ledger),
            Arc::new(venue),
            Arc::new(alerts),
            store.clone(),
        );
        (controller, store)
    }

    fn paper_stack(
        price: Decimal,
    ) -> (Arc<PaperPriceOracle>, Arc<PaperPoolLedger>, Arc<PaperHedgeVenue>) {
        let oracle = Arc::new(PaperPriceOracle::new(price));
        let tokens = TokensConfig::default();
        let ledger = Arc::new(PaperPoolLedger::new(tokens.pool_asset, tokens.paired_asset));
        let venue = Arc::new(PaperHedgeVenue::new("SUIUSDC", oracle.clone()));
        (oracle, ledger, venue)
    }

    fn paper_controller(
        config: ControllerConfig,
        oracle: &Arc<PaperPriceOracle>,
        ledger: &Arc<PaperPoolLedger>,
        venue: &Arc<PaperHedgeVenue>,
    ) -> (RebalanceController, Arc<MemoryPositionStore>) {
        let store = Arc::new(MemoryPositionStore::new());
        let controller = RebalanceController::new(
            config,
            oracle.clone(),
            ledger.clone(),
            venue.clone(),
            Arc::new(quiet_alerts()),
            store.clone(),
        );
        (controller, store)
    }

    #[tokio::test]
    async fn test_initialize_reference_scenario() {
        let mut ledger = MockPoolLedger::new();
        ledger
            .expect_add_liquidity()
            .withf(|req| {
                req.lower_price == dec!(0.95)
                    && req.upper_price == dec!(1.05)
                    && req.pool_asset_amount == dec!(500)
                    && req.paired_asset_amount == dec!(500)
            })
            .times(1)
            .returning(|_| Ok(PositionHandle::new("0xpos")));

        let mut venue = MockHedgeVenue::new();
        venue
            .expect_open_short()
            .withf(|qty| *qty == dec!(500))
            .times(1)
            .returning(|qty| Ok(filled(qty)));

        let (controller, store) =
            build(test_config(), fixed_price(dec!(1.00)), ledger, venue, quiet_alerts());

        let position = controller
            .initialize_position(Position::uninitialized())
            .await
            .unwrap();

        assert_eq!(position.status, PositionStatus::Active);
        assert_eq!(position.hedge_size, dec!(500));
        assert_eq!(position.net_delta(), Decimal::ZERO);
        assert_eq!(position.entry_price, dec!(1.00));
        assert!(position.opened_at.is_some());
        assert_eq!(store.load().unwrap(), Some(position.clone()));

        assert!(!controller.check_drift_condition(&position, dec!(1.00)));
    }

    #[tokio::test]
    async fn test_failed_deposit_leaves_position_inactive() {
        let mut ledger = MockPoolLedger::new();
        ledger
            .expect_add_liquidity()
            .times(1)
            .returning(|_| Err(HedgeError::LedgerSubmit("insufficient balance".to_string())));

        let mut venue = MockHedgeVenue::new();
        venue.expect_open_short().never();

        let mut alerts = MockAlertSink::new();
        alerts
            .expect_notify()
            .withf(|msg| msg.contains("pool deposit"))
            .times(1)
            .returning(|_| Ok(()));

        let (controller, store) =
            build(test_config(), fixed_price(dec!(1.00)), ledger, venue, alerts);

        let position = controller
            .initialize_position(Position::uninitialized())
            .await
            .unwrap();

        assert_ne!(position.status, PositionStatus::Active);
        assert_eq!(position.status, PositionStatus::Faulted);
        assert!(position.is_idle_fault());
        assert_eq!(
            store.load().unwrap().map(|p| p.status),
            Some(PositionStatus::Faulted)
        );
    }

    #[tokio::test]
    async fn test_failed_hedge_open_is_unhedged_critical() {
        let mut ledger = MockPoolLedger::new();
        ledger
            .expect_add_liquidity()
            .times(1)
            .returning(|_| Ok(PositionHandle::new("0xpos")));

        let mut venue = MockHedgeVenue::new();
        venue
            .expect_open_short()
            .times(1)
            .returning(|_| Err(HedgeError::VenueSubmit("margin insufficient".to_string())));

        let mut alerts = MockAlertSink::new();
        alerts
            .expect_notify()
            .withf(|msg| msg.contains("UNHEDGED") && msg.contains("CRITICAL"))
            .times(1)
            .returning(|_| Ok(()));

        let (controller, _store) =
            build(test_config(), fixed_price(dec!(1.00)), ledger, venue, alerts);

        let position = controller
            .initialize_position(Position::uninitialized())
            .await
            .unwrap();

        assert_eq!(position.status, PositionStatus::Faulted);
        assert!(position.pool_handle.is_some());
        assert!(position.hedge_order_ref.is_none());
        assert_eq!(position.net_delta(), dec!(500));

        let fault = position.fault.as_ref().unwrap();
        assert_eq!(fault.step, FailedStep::HedgeOpen);
        assert_eq!(fault.legs, LegState::Unhedged);
        assert!(!controller.check_drift_condition(&position, dec!(0.90)));
    }

    #[tokio::test]
    async fn test_oracle_failure_before_init_has_no_side_effects() {
        let mut oracle = MockPriceOracle::new();
        oracle
            .expect_get_price()
            .returning(|_| Err(HedgeError::Oracle("503".to_string())));

        let mut ledger = MockPoolLedger::new();
        ledger.expect_add_liquidity().never();
        let mut alerts = MockAlertSink::new();
        alerts.expect_notify().never();

        let (controller, store) =
            build(test_config(), oracle, ledger, MockHedgeVenue::new(), alerts);

        let result = controller.initialize_position(Position::uninitialized()).await;
        assert!(matches!(result, Err(HedgeError::Oracle(_))));
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drift_thresholds() {
        let (controller, _) = build(
            test_config(),
            MockPriceOracle::new(),
            MockPoolLedger::new(),
            MockHedgeVenue::new(),
            MockAlertSink::new(),
        );
        let position = active_position();

        assert!(!controller.check_drift_condition(&position, dec!(1.00)));
        assert!(!controller.check_drift_condition(&position, dec!(1.038)));
        assert!(!controller.check_drift_condition(&position, dec!(0.96)));
        assert!(controller.check_drift_condition(&position, dec!(1.0395)));
        assert!(controller.check_drift_condition(&position, dec!(0.9595)));
        assert!(controller.check_drift_condition(&position, dec!(1.10)));
        assert!(controller.check_drift_condition(&position, dec!(0.80)));

        let wider = ControllerConfig {
            rebalance_threshold_fraction: dec!(0.02),
            ..test_config()
        };
        let (controller, _) = build(
            wider,
            MockPriceOracle::new(),
            MockPoolLedger::new(),
            MockHedgeVenue::new(),
            MockAlertSink::new(),
        );
        assert!(controller.check_drift_condition(&position, dec!(1.038)));
    }

    #[tokio::test]
    async fn test_drift_ignores_non_active_positions() {
        let (controller, _) = build(
            test_config(),
            MockPriceOracle::new(),
            MockPoolLedger::new(),
            MockHedgeVenue::new(),
            MockAlertSink::new(),
        );
        for status in [
            PositionStatus::Uninitialized,
            PositionStatus::Rebalancing,
            PositionStatus::Faulted,
        ] {
            let position = active_position().with_status(status);
            assert!(!controller.check_drift_condition(&position, dec!(2.00)));
        }
    }

    #[tokio::test]
    async fn test_rebalance_recreates_at_new_price() {
        let mut ledger = MockPoolLedger::new();
        ledger.expect_remove_liquidity().times(1).returning(|_| {
            Ok(Withdrawal {
                pool_asset_amount: dec!(510),
                paired_asset_amount: dec!(470),
            })
        });
        ledger
            .expect_add_liquidity()
            .withf(|req| req.lower_price == dec!(0.988) && req.upper_price == dec!(1.092))
            .times(1)
            .returning(|_| Ok(PositionHandle::new("0xnew")));

        let mut venue = MockHedgeVenue::new();
        venue
            .expect_close_short()
            .times(1)
            .returning(|order| Ok(order.filled_quantity));
        venue
            .expect_open_short()
            .times(1)
            .returning(|qty| Ok(filled(qty)));

        let (controller, store) =
            build(test_config(), fixed_price(dec!(1.04)), ledger, venue, quiet_alerts());

        let position = controller.rebalance(active_position()).await.unwrap();

        assert_eq!(position.status, PositionStatus::Active);
        assert_eq!(position.entry_price, dec!(1.04));
        assert_eq!(position.rebalance_count, 1);
        assert_eq!(position.pool_handle, Some(PositionHandle::new("0xnew")));
        assert_eq!(position.hedge_size, position.pool_asset_amount);
        assert_eq!(store.load().unwrap(), Some(position));
    }

    #[tokio::test]
    async fn test_failed_close_faults_without_recreation() {
        let mut ledger = MockPoolLedger::new();
        ledger
            .expect_remove_liquidity()
            .times(1)
            .returning(|_| Ok(Withdrawal::default()));
        ledger.expect_add_liquidity().never();

        let mut venue = MockHedgeVenue::new();
        venue
            .expect_close_short()
            .times(1)
            .returning(|_| Err(HedgeError::VenueSubmit("venue rejected".to_string())));
        venue.expect_open_short().never();

        let mut alerts = MockAlertSink::new();
        alerts
            .expect_notify()
            .withf(|msg| msg.contains("hedge close"))
            .times(1)
            .returning(|_| Ok(()));

        let (controller, store) =
            build(test_config(), fixed_price(dec!(1.04)), ledger, venue, alerts);

        let position = controller.rebalance(active_position()).await.unwrap();

        assert_eq!(position.status, PositionStatus::Faulted);
        let fault = position.fault.as_ref().unwrap();
        assert_eq!(fault.step, FailedStep::HedgeClose);
        assert_eq!(fault.legs, LegState::Unknown);
        assert!(position.pool_handle.is_none());
        assert!(position.hedge_order_ref.is_some());
        assert_eq!(store.load().unwrap(), Some(position));
    }

    #[tokio::test]
    async fn test_failed_withdraw_leaves_hedge_untouched() {
        let mut ledger = MockPoolLedger::new();
        ledger
            .expect_remove_liquidity()
            .times(1)
            .returning(|_| Err(HedgeError::LedgerSubmit("rpc error".to_string())));
        ledger.expect_add_liquidity().never();

        let mut venue = MockHedgeVenue::new();
        venue.expect_close_short().never();
        venue.expect_open_short().never();

        let (controller, _) =
            build(test_config(), fixed_price(dec!(1.04)), ledger, venue, quiet_alerts());

        let position = controller.rebalance(active_position()).await.unwrap();

        assert_eq!(position.status, PositionStatus::Faulted);
        assert_eq!(position.fault.as_ref().unwrap().step, FailedStep::PoolWithdraw);
        assert_eq!(position.hedge_order_ref, Some(filled(dec!(500))));
        assert_eq!(position.hedge_size, dec!(500));
    }

    #[tokio::test]
    async fn test_range_recompute_failure_still_closes_hedge() {
        let mut oracle = MockPriceOracle::new();
        oracle
            .expect_get_price()
            .returning(|_| Err(HedgeError::Oracle("stale".to_string())));

        let mut ledger = MockPoolLedger::new();
        ledger
            .expect_remove_liquidity()
            .times(1)
            .returning(|_| Ok(Withdrawal::default()));
        ledger.expect_add_liquidity().never();

        let mut venue = MockHedgeVenue::new();
        venue
            .expect_close_short()
            .times(1)
            .returning(|order| Ok(order.filled_quantity));
        venue.expect_open_short().never();

        let (controller, _) = build(test_config(), oracle, ledger, venue, quiet_alerts());

        let position = controller.rebalance(active_position()).await.unwrap();

        assert_eq!(position.status, PositionStatus::Faulted);
        assert_eq!(position.fault.as_ref().unwrap().step, FailedStep::RangeRecompute);
        assert!(position.is_idle_fault());
        assert_eq!(position.hedge_size, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_rebalance_rejects_non_active() {
        let (controller, _) = build(
            test_config(),
            MockPriceOracle::new(),
            MockPoolLedger::new(),
            MockHedgeVenue::new(),
            MockAlertSink::new(),
        );

        let rebalancing = active_position().with_status(PositionStatus::Rebalancing);
        assert_eq!(
            controller.rebalance(rebalancing).await,
            Err(HedgeError::RebalanceRejected("REBALANCING".to_string()))
        );

        let faulted = active_position().with_status(PositionStatus::Faulted);
        assert!(matches!(
            controller.rebalance(faulted).await,
            Err(HedgeError::RebalanceRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_withdraw_timeout_faults_and_keeps_hedge() {
        let (oracle, ledger, venue) = paper_stack(dec!(1.00));
        let config = ControllerConfig {
            call_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let (controller, _) = paper_controller(config, &oracle, &ledger, &venue);

        let position = controller
            .initialize_position(Position::uninitialized())
            .await
            .unwrap();
        assert!(position.is_active());

        ledger.set_latency(Duration::from_millis(500)).await;
        oracle.set_price(dec!(1.05)).await;

        let position = controller.rebalance(position).await.unwrap();

        assert_eq!(position.status, PositionStatus::Faulted);
        let fault = position.fault.as_ref().unwrap();
        assert_eq!(fault.step, FailedStep::PoolWithdraw);
        assert!(fault.error.contains("timed out"));

        assert!(position.hedge_order_ref.is_some());
        assert_eq!(venue.query_short().await.unwrap(), dec!(500));
        let (orders, _) = venue.stats().await;
        assert_eq!(orders, 1);
    }

    #[tokio::test]
    async fn test_close_timeout_faults_without_recreation() {
        let (oracle, ledger, venue) = paper_stack(dec!(1.00));
        let config = ControllerConfig {
            call_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let (controller, store) = paper_controller(config, &oracle, &ledger, &venue);

        let position = controller
            .initialize_position(Position::uninitialized())
            .await
            .unwrap();
        assert!(position.is_active());

        venue.set_latency(Duration::from_millis(500)).await;
        oracle.set_price(dec!(1.05)).await;

        let position = controller.rebalance(position).await.unwrap();

        assert_eq!(position.status, PositionStatus::Faulted);
        let fault = position.fault.as_ref().unwrap();
        assert_eq!(fault.step, FailedStep::HedgeClose);
        assert_eq!(fault.legs, LegState::Unknown);
        assert!(fault.error.contains("timed out"));
        assert!(position.pool_handle.is_none());
        assert!(position.hedge_order_ref.is_some());
        assert_eq!(position.rebalance_count, 0);
        assert_eq!(store.load().unwrap(), Some(position));

        // Pool withdrawn once, nothing redeployed, original short still open
        assert_eq!(ledger.call_counts().await, (1, 1));
        assert_eq!(ledger.open_positions().await, 0);
        venue.set_latency(Duration::ZERO).await;
        assert_eq!(venue.query_short().await.unwrap(), dec!(500));
        assert_eq!(venue.stats().await.0, 1);
    }

    #[tokio::test]
    async fn test_paper_round_trip_rebalance() {
        let (oracle, ledger, venue) = paper_stack(dec!(1.00));
        let (controller, _) = paper_controller(test_config(), &oracle, &ledger, &venue);

        let position = controller
            .initialize_position(Position::uninitialized())
            .await
            .unwrap();

        oracle.set_price(dec!(1.04)).await;
        assert!(controller.check_drift_condition(&position, dec!(1.04)));

        let position = controller.rebalance(position).await.unwrap();
        assert!(position.is_active());
        assert_eq!(position.rebalance_count, 1);
        assert_eq!(ledger.open_positions().await, 1);
        assert_eq!(ledger.call_counts().await, (2, 1));
        assert_eq!(venue.query_short().await.unwrap(), position.hedge_size);
        assert!(!controller.check_drift_condition(&position, dec!(1.04)));
    }

    #[tokio::test]
    async fn test_report_falls_back_to_recorded_hedge_size() {
        let mut venue = MockHedgeVenue::new();
        venue
            .expect_query_short()
            .returning(|| Err(HedgeError::VenueSubmit("418".to_string())));

        let (controller, _) = build(
            test_config(),
            fixed_price(dec!(0.969)),
            MockPoolLedger::new(),
            venue,
            MockAlertSink::new(),
        );

        let position = active_position();
        let report = controller.generate_report(&position).await.unwrap();

        assert_eq!(report.hedge_size, dec!(500));
        assert_eq!(report.hedge_size_source, HedgeSizeSource::Recorded);
        assert_eq!(report.deviation, dec!(-0.02));
        assert_eq!(report.status, PositionStatus::Active);
    }

    #[tokio::test]
    async fn test_recover_requires_closed_legs_unless_forced() {
        let (controller, store) = build(
            test_config(),
            MockPriceOracle::new(),
            MockPoolLedger::new(),
            MockHedgeVenue::new(),
            quiet_alerts(),
        );

        let unknown =
            active_position().into_faulted(FailedStep::HedgeClose, LegState::Unknown, "timeout");
        assert!(matches!(
            controller.recover(unknown.clone(), false).await,
            Err(HedgeError::InvalidInput(_))
        ));

        let forced = controller.recover(unknown, true).await.unwrap();
        assert_eq!(forced.status, PositionStatus::Uninitialized);
        assert!(!forced.has_open_legs());

        let idle = Position::uninitialized().into_faulted(
            FailedStep::PoolDeposit,
            LegState::Closed,
            "rejected",
        );
        let reset = controller.recover(idle, false).await.unwrap();
        assert_eq!(reset.status, PositionStatus::Uninitialized);
        assert_eq!(store.load().unwrap().map(|p| p.status), Some(PositionStatus::Uninitialized));

        assert!(controller.recover(active_position(), false).await.is_err());
    }

    #[tokio::test]
    async fn test_interrupted_rebalance_is_faulted_on_startup() {
        let (controller, _) = build(
            test_config(),
            MockPriceOracle::new(),
            MockPoolLedger::new(),
            MockHedgeVenue::new(),
            quiet_alerts(),
        );

        let stuck = active_position().with_status(PositionStatus::Rebalancing);
        let settled = controller.reconcile_on_startup(stuck).await;
        assert_eq!(settled.status, PositionStatus::Faulted);
        assert_eq!(settled.fault.as_ref().unwrap().step, FailedStep::Interrupted);

        let active = controller.reconcile_on_startup(active_position()).await;
        assert_eq!(active.status, PositionStatus::Active);
    }

    #[tokio::test]
    async fn test_alert_delivery_failure_does_not_change_outcome() {
        let mut ledger = MockPoolLedger::new();
        ledger
            .expect_add_liquidity()
            .returning(|_| Err(HedgeError::LedgerSubmit("rejected".to_string())));

        let mut alerts = MockAlertSink::new();
        alerts
            .expect_notify()
            .times(1)
            .returning(|_| Err(AlertError::Transport("connection reset".to_string())));

        let (controller, store) = build(
            test_config(),
            fixed_price(dec!(1.00)),
            ledger,
            MockHedgeVenue::new(),
            alerts,
        );

        let position = controller
            .initialize_position(Position::uninitialized())
            .await
            .unwrap();
        assert_eq!(position.status, PositionStatus::Faulted);
        assert_eq!(store.load().unwrap().map(|p| p.status), Some(PositionStatus::Faulted));
    }
}
