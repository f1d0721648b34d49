use crate::config::{StrategyParams, TraderConfig};
use crate::core::error::EngineError;
use crate::core::events::{AccountSnapshot, FillEvent, FillKind, TradeIntent};
use crate::exchanges::error::{log_best_effort, VenueError};
use crate::market_data::MarketBuffer;
use crate::monitoring::{Category, Notifier, Severity};
use crate::replication::ReplicationManager;
use crate::strategy::signals::SignalSnapshot;
use crate::strategy::state::{BearAction, FillAction, StrategyState, Transition};
use crate::traits::MasterExecution;
use crate::types::Price;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Polling control loop: reads the bar buffer, drives [`StrategyState`] and
/// turns its transitions into master orders and slave replication.
///
/// The state lock is only held for flag updates; every network call runs
/// after it is released so fills are never blocked behind an order.
pub struct Orchestrator {
    master: Arc<dyn MasterExecution>,
    replication: Arc<ReplicationManager>,
    buffer: Arc<MarketBuffer>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<StrategyState>,
    params: StrategyParams,
    capital_pct: f64,
    min_bars: usize,
    poll_interval: Duration,
}

impl Orchestrator {
    pub fn new(
        master: Arc<dyn MasterExecution>,
        replication: Arc<ReplicationManager>,
        buffer: Arc<MarketBuffer>,
        notifier: Arc<dyn Notifier>,
        config: &TraderConfig,
    ) -> Self {
        Self {
            master,
            replication,
            buffer,
            notifier,
            state: Mutex::new(StrategyState::new(&config.strategy)),
            params: config.strategy.clone(),
            capital_pct: config.percentage_of_capital,
            min_bars: config.engine.min_bars,
            poll_interval: Duration::from_millis(config.engine.poll_interval_ms),
        }
    }

    /// Copy of the current strategy state
    pub fn state(&self) -> StrategyState {
        self.lock_state().clone()
    }

    /// Mutate the strategy state under its lock
    pub fn with_state<R>(&self, f: impl FnOnce(&mut StrategyState) -> R) -> R {
        f(&mut self.lock_state())
    }

    fn lock_state(&self) -> MutexGuard<'_, StrategyState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// One iteration. `Ok(None)` while the buffer is still warming up.
    pub async fn tick(&self) -> Result<Option<Transition>, EngineError> {
        let account = self.master.fetch_balance().await?;
        let in_long = account.in_long();
        if !account.in_position() {
            self.lock_state().reset_on_flat();
        }

        let bars = self.buffer.snapshot();
        if bars.len() < self.min_bars {
            log::debug!("Waiting for bars: {}/{}", bars.len(), self.min_bars);
            return Ok(None);
        }
        let snapshot = SignalSnapshot::compute(&bars, &self.params).ok_or_else(|| {
            EngineError::Data(format!(
                "{} bars cannot cover the configured averages ({} needed)",
                bars.len(),
                SignalSnapshot::required_bars(&self.params)
            ))
        })?;

        let transition = {
            let mut state = self.lock_state();
            state.observe_bar(snapshot.bar_time);
            let transition = state.step(&snapshot, in_long, &self.params, self.capital_pct);
            log::debug!(
                "fast {:.2} slow {:.2} signal {} dip {} spike {} | mode {} lev {}x failed_l1 {} l2 {} tp {}",
                snapshot.fast_sma,
                snapshot.slow_sma,
                snapshot.signal_cur,
                snapshot.dip,
                snapshot.spike,
                state.active_strategy,
                state.leverage,
                state.failed_l1,
                state.l2_order,
                state.take_profit
            );
            transition
        };

        self.execute(&transition, &account).await?;
        Ok(Some(transition))
    }

    async fn execute(&self, transition: &Transition, account: &AccountSnapshot) -> Result<(), EngineError> {
        match transition {
            Transition::Hold => {}
            Transition::TrendEntry(intent) | Transition::TrendReentry(intent) => {
                self.enter(intent, account.available_balance, Category::Trend).await?;
            }
            Transition::ScalpEntry(intent) => {
                self.enter(intent, account.available_balance, Category::Scalp).await?;
            }
            Transition::VolatilityEntry(intent) => {
                self.notifier
                    .notify("High volatility detected", Severity::Info, Category::Volatility);
                self.enter(intent, account.available_balance, Category::Volatility).await?;
            }
            Transition::UpgradeTakeProfit { price } => {
                self.move_take_profit(account, *price, "Trend turned bullish, scalp TP upgraded")
                    .await?;
            }
            Transition::BearEvent(action) => match action {
                BearAction::Exit => self.exit_all(Category::Trend, false).await?,
                BearAction::RestoreTakeProfit(price) => {
                    self.move_take_profit(account, *price, "Bearish crossover, scalp TP restored")
                        .await?;
                }
                BearAction::Ignored => log::info!("Bear signal ignored (volatility mode active)"),
                BearAction::NoPosition | BearAction::Hold => {}
            },
            Transition::VolatilityExit => {
                log::info!("Bar closed: volatility exit");
                self.exit_all(Category::Volatility, true).await?;
            }
        }
        Ok(())
    }

    /// Master entry and its protective orders first; slaves only once the
    /// master is covered
    async fn enter(&self, intent: &TradeIntent, balance: f64, category: Category) -> Result<(), VenueError> {
        if intent.cancel_resting {
            self.master.cancel_all_orders().await?;
        }
        let leverage_result = self.master.set_leverage(intent.leverage).await;
        log_best_effort("master set leverage", &leverage_result);

        let amount = self.master.amount_to_precision(intent.master_quantity(balance));
        if !amount.is_positive() {
            return Err(VenueError::Rejected(format!(
                "{} size rounds to zero (balance {:.2})",
                intent.tag, balance
            )));
        }

        self.master.enter_long(amount, intent.leverage).await?;
        log::info!(
            "{} entry: {} @ {:.2} ({}x)",
            intent.tag,
            amount,
            intent.reference_price,
            intent.leverage
        );
        self.notifier.notify(
            &format!(
                "{} entry: {} @ {:.2} ({}x)",
                intent.tag, amount, intent.reference_price, intent.leverage
            ),
            Severity::Trade,
            category,
        );

        // Slaves follow even when a protective order fails; that error is
        // returned afterwards.
        let mut protection_error = None;
        if let Some(stop_loss) = intent.stop_loss {
            if let Err(e) = self.master.place_stop_loss(amount, Price::from_f64(stop_loss)).await {
                protection_error = Some(e);
            }
        }
        if let Some(take_profit) = intent.take_profit {
            if let Err(e) = self.master.place_take_profit(amount, Price::from_f64(take_profit)).await {
                protection_error.get_or_insert(e);
            }
        }

        let pct = Decimal::from_f64(intent.capital_pct).unwrap_or(Decimal::ZERO);
        let report = self.replication.enter_long(pct, intent.leverage).await;
        log::info!(
            "Replication: {} submitted, {} skipped, {} failed",
            report.submitted(),
            report.skipped(),
            report.failed()
        );
        match protection_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close the master and every slave. Slaves are closed even when the
    /// master exit fails; the master error is returned afterwards.
    async fn exit_all(&self, category: Category, cancel_resting: bool) -> Result<(), VenueError> {
        let mut first_error = None;
        if cancel_resting {
            if let Err(e) = self.master.cancel_all_orders().await {
                first_error = Some(e);
            }
        }
        match self.master.exit_long().await {
            Ok(Some(receipt)) => self.notifier.notify(
                &format!("Position closed: {} {}", receipt.side, receipt.quantity),
                Severity::Trade,
                category,
            ),
            Ok(None) => log::info!("Master already flat"),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }

        self.replication.exit_long().await;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn move_take_profit(&self, account: &AccountSnapshot, price: f64, message: &str) -> Result<(), VenueError> {
        let amount = account.long_size().abs();
        self.master
            .modify_take_profit(amount, Price::from_f64(price))
            .await?;
        log::info!("{} -> {:.2}", message, price);
        self.notifier.notify(
            &format!("{} -> {:.2}", message, price),
            Severity::Trade,
            Category::Scalp,
        );
        Ok(())
    }

    /// Apply a fill to the strategy flags and report it. Never touches a
    /// venue; the returned action says whether the slaves need closing.
    pub fn record_fill(&self, fill: &FillEvent) -> FillAction {
        let action = self.lock_state().apply_fill(fill.kind);
        if let FillAction::CloseSlaves(mode) = action {
            let label = match fill.kind {
                FillKind::StopLoss => "STOP LOSS",
                _ => "TAKE PROFIT",
            };
            log::info!("Master {} hit ({}) -> closing slaves", label, mode);
            self.notifier.notify(
                &format!("{} triggered ({})", label, mode),
                Severity::Trade,
                mode.category(),
            );
        }
        action
    }

    /// Route a fill: update flags under the lock, then close the slaves with
    /// the lock released.
    pub async fn on_fill(&self, fill: &FillEvent) -> FillAction {
        let action = self.record_fill(fill);
        if let FillAction::CloseSlaves(_) = action {
            self.replication.exit_long().await;
        }
        action
    }

    /// Consume fills from the user-data stream until cancelled. Flags are
    /// updated in arrival order; each slave close runs on its own task so a
    /// slow venue never holds back the next fill.
    pub fn spawn_fill_listener(
        self: &Arc<Self>,
        mut fills: mpsc::UnboundedReceiver<FillEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    fill = fills.recv() => match fill {
                        Some(fill) => {
                            if let FillAction::CloseSlaves(_) = orchestrator.record_fill(&fill) {
                                let replication = Arc::clone(&orchestrator.replication);
                                tokio::spawn(async move {
                                    replication.exit_long().await;
                                });
                            }
                        }
                        None => break,
                    },
                }
            }
            log::info!("Fill listener stopped");
        })
    }

    /// Tick every poll interval until cancelled. Errors end the iteration,
    /// never the loop.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.tick().await {
                log::error!("Loop Error: {}", e);
                self.notifier
                    .notify(&format!("Loop Error: {}", e), Severity::Error, Category::Engine);
            }
        }
        log::info!("Orchestrator stopped");
    }
}
