use crate::config::StrategyParams;
use crate::core::events::{FillKind, IntentSide, Timestamp, TradeIntent};
use crate::monitoring::Category;
use crate::strategy::signals::SignalSnapshot;
use serde::{Deserialize, Serialize};

/// Mode owning the current position. At most one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActiveStrategy {
    #[default]
    None,
    Trend,
    Scalp,
    Volatility,
}

impl ActiveStrategy {
    pub fn category(&self) -> Category {
        match self {
            ActiveStrategy::None => Category::Engine,
            ActiveStrategy::Trend => Category::Trend,
            ActiveStrategy::Scalp => Category::Scalp,
            ActiveStrategy::Volatility => Category::Volatility,
        }
    }
}

impl std::fmt::Display for ActiveStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActiveStrategy::None => write!(f, "NONE"),
            ActiveStrategy::Trend => write!(f, "TREND"),
            ActiveStrategy::Scalp => write!(f, "SCALP"),
            ActiveStrategy::Volatility => write!(f, "VOLATILITY"),
        }
    }
}

/// Response to a bearish crossover
#[derive(Debug, Clone, PartialEq)]
pub enum BearAction {
    /// Flat, only the latch and leverage changed
    NoPosition,
    /// Long under VOLATILITY; closes on bar completion only
    Ignored,
    /// Close master and slaves
    Exit,
    /// Adaptive scalp below its safe level: pull a boosted take-profit back
    RestoreTakeProfit(f64),
    /// Long but nothing to do
    Hold,
}

/// The single decision of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Hold,
    TrendEntry(TradeIntent),
    /// Bull crossover while long in adaptive SCALP: widen the take-profit
    UpgradeTakeProfit { price: f64 },
    TrendReentry(TradeIntent),
    BearEvent(BearAction),
    ScalpEntry(TradeIntent),
    VolatilityEntry(TradeIntent),
    VolatilityExit,
}

impl Transition {
    pub fn intent(&self) -> Option<&TradeIntent> {
        match self {
            Transition::TrendEntry(i)
            | Transition::TrendReentry(i)
            | Transition::ScalpEntry(i)
            | Transition::VolatilityEntry(i) => Some(i),
            _ => None,
        }
    }
}

/// Effect of a fill on the slaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillAction {
    /// Protective order filled under this mode; slaves must be closed
    CloseSlaves(ActiveStrategy),
    Ignore,
}

/// Strategy flags and carry-over risk state.
///
/// Only the orchestrator tick and the fill listener touch it, both under the
/// same lock. Every method is synchronous and does no I/O.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    pub active_strategy: ActiveStrategy,
    pub failed_l1: bool,
    pub l2_order: bool,
    pub take_profit: bool,
    pub trend_up: bool,
    pub trend_down: bool,
    pub scalp_long: bool,
    pub adaptive_tp: bool,
    pub tp_boosted: bool,
    pub sl_hv_triggered: bool,
    /// Entries and bear-event closes, oldest first; never truncated
    pub entry_price_history: Vec<f64>,
    pub scalp_entry_history: Vec<f64>,
    pub leverage: u32,
    /// Bar of the last volatility entry
    pub hv_traded_bar: Option<Timestamp>,
    last_bar_time: Option<Timestamp>,
    bar_boundary_pending: bool,
}

impl StrategyState {
    pub fn new(params: &StrategyParams) -> Self {
        Self {
            active_strategy: ActiveStrategy::None,
            failed_l1: false,
            l2_order: false,
            take_profit: false,
            trend_up: false,
            trend_down: false,
            scalp_long: false,
            adaptive_tp: false,
            tp_boosted: false,
            sl_hv_triggered: false,
            entry_price_history: params.initial_entry_prices.clone(),
            scalp_entry_history: Vec::new(),
            leverage: params.min_leverage,
            hv_traded_bar: None,
            last_bar_time: None,
            bar_boundary_pending: false,
        }
    }

    pub fn bar_boundary_pending(&self) -> bool {
        self.bar_boundary_pending
    }

    /// Record the open time of the newest bar. Returns true when a new bar
    /// started since the previous call.
    pub fn observe_bar(&mut self, open_time: Timestamp) -> bool {
        let crossed = matches!(self.last_bar_time, Some(prev) if prev != open_time);
        self.last_bar_time = Some(open_time);
        if crossed {
            self.bar_boundary_pending = true;
            self.sl_hv_triggered = false;
        }
        crossed
    }

    /// Mode-local flags back to their initial values once the master is flat
    pub fn reset_on_flat(&mut self) {
        self.active_strategy = ActiveStrategy::None;
        self.scalp_long = false;
        self.adaptive_tp = false;
        self.tp_boosted = false;
    }

    /// Evaluate one snapshot and return exactly one transition, in priority
    /// order: trend bull, L2, trend bear, scalp, volatility entry, volatility
    /// exit.
    pub fn step(
        &mut self,
        snapshot: &SignalSnapshot,
        in_long: bool,
        params: &StrategyParams,
        capital_pct: f64,
    ) -> Transition {
        let transition = self.decide(snapshot, in_long, params, capital_pct);
        // Keep the boundary until a volatility long can consume it
        if !(self.active_strategy == ActiveStrategy::Volatility && in_long) {
            self.bar_boundary_pending = false;
        }
        transition
    }

    fn decide(
        &mut self,
        snapshot: &SignalSnapshot,
        in_long: bool,
        params: &StrategyParams,
        capital_pct: f64,
    ) -> Transition {
        let price = snapshot.current_price;

        if snapshot.bull_cross() && !self.failed_l1 && !self.trend_up {
            self.trend_up = true;
            self.trend_down = false;
            self.take_profit = false;

            if !in_long {
                if snapshot.drawdown() > params.drawdown_threshold {
                    self.leverage = params
                        .leverage_boost_tier
                        .clamp(params.min_leverage, params.max_leverage);
                }
                self.entry_price_history.push(price);
                self.active_strategy = ActiveStrategy::Trend;
                self.scalp_long = false;
                self.adaptive_tp = false;
                self.tp_boosted = false;

                return Transition::TrendEntry(TradeIntent {
                    side: IntentSide::Long,
                    capital_pct,
                    master_fraction: capital_pct / 100.0,
                    leverage: self.leverage,
                    reference_price: price,
                    stop_loss: Some(price * params.stop_loss),
                    take_profit: Some(price * params.take_profit),
                    cancel_resting: true,
                    tag: "TREND_L1".to_string(),
                });
            }

            if self.active_strategy == ActiveStrategy::Scalp
                && self.scalp_long
                && self.adaptive_tp
                && !self.tp_boosted
            {
                if let Some(&last_entry) = self.entry_price_history.last() {
                    self.tp_boosted = true;
                    return Transition::UpgradeTakeProfit {
                        price: last_entry * params.scalp_boosted_tp,
                    };
                }
            }
            return Transition::Hold;
        }

        if snapshot.signal_cur > 0
            && self.failed_l1
            && !self.l2_order
            && !in_long
            && !self.take_profit
            && matches!(
                self.active_strategy,
                ActiveStrategy::None | ActiveStrategy::Trend | ActiveStrategy::Scalp
            )
        {
            if let Some(&failed_entry) = self.entry_price_history.last() {
                let trigger = failed_entry * params.l2_trigger;
                if price >= trigger {
                    self.l2_order = true;
                    self.active_strategy = ActiveStrategy::Trend;
                    return Transition::TrendReentry(TradeIntent {
                        side: IntentSide::Long,
                        capital_pct,
                        master_fraction: capital_pct / 100.0,
                        leverage: self.leverage,
                        reference_price: trigger,
                        stop_loss: Some(failed_entry * params.l2_stop_loss),
                        take_profit: None,
                        cancel_resting: false,
                        tag: "TREND_L2".to_string(),
                    });
                }
            }
        }

        if snapshot.bear_cross() && !self.trend_down {
            self.trend_up = false;
            self.trend_down = true;
            self.entry_price_history.push(price);

            let action = if !in_long {
                BearAction::NoPosition
            } else {
                match self.active_strategy {
                    ActiveStrategy::Volatility => BearAction::Ignored,
                    ActiveStrategy::Scalp if self.adaptive_tp => {
                        match self.scalp_entry_history.last().map(|e| e * params.scalp_safe_tp) {
                            Some(safe_tp) if price > safe_tp => BearAction::Exit,
                            Some(safe_tp) if self.tp_boosted => {
                                self.tp_boosted = false;
                                BearAction::RestoreTakeProfit(safe_tp)
                            }
                            _ => BearAction::Hold,
                        }
                    }
                    ActiveStrategy::Trend | ActiveStrategy::Scalp => BearAction::Exit,
                    // Long not opened by this process
                    ActiveStrategy::None => BearAction::Hold,
                }
            };

            self.adapt_leverage(params);
            self.failed_l1 = false;
            self.l2_order = false;
            self.take_profit = false;
            return Transition::BearEvent(action);
        }

        if snapshot.dip && !in_long && self.active_strategy == ActiveStrategy::None {
            let low = snapshot.bar_low;
            self.scalp_long = true;
            self.adaptive_tp = params.scalp_adaptive_tp;
            self.tp_boosted = false;
            self.active_strategy = ActiveStrategy::Scalp;
            self.scalp_entry_history.push(low);
            self.entry_price_history.push(low);

            return Transition::ScalpEntry(TradeIntent {
                side: IntentSide::Long,
                capital_pct,
                master_fraction: capital_pct / params.scalp_capital_divisor,
                leverage: params.scalp_leverage,
                reference_price: low,
                stop_loss: Some(low * params.scalp_stop_loss),
                take_profit: Some(low * params.scalp_take_profit),
                cancel_resting: false,
                tag: "SCALP".to_string(),
            });
        }

        if snapshot.spike
            && !in_long
            && self.active_strategy == ActiveStrategy::None
            && self.hv_traded_bar != Some(snapshot.bar_time)
            && !self.sl_hv_triggered
        {
            self.active_strategy = ActiveStrategy::Volatility;
            self.hv_traded_bar = Some(snapshot.bar_time);

            return Transition::VolatilityEntry(TradeIntent {
                side: IntentSide::Long,
                capital_pct,
                master_fraction: capital_pct / 100.0,
                leverage: params.volatility_leverage,
                reference_price: price,
                stop_loss: Some(snapshot.bar_open * params.volatility_stop_loss),
                take_profit: Some(snapshot.bar_open * params.volatility_take_profit),
                cancel_resting: true,
                tag: "VOLATILITY".to_string(),
            });
        }

        if self.active_strategy == ActiveStrategy::Volatility && in_long && self.bar_boundary_pending {
            self.bar_boundary_pending = false;
            self.active_strategy = ActiveStrategy::None;
            return Transition::VolatilityExit;
        }

        Transition::Hold
    }

    /// Ratchet leverage on the last two recorded prices: strong win resets to
    /// the boost tier, a win steps down by 3, a loss steps up by 1.
    pub fn adapt_leverage(&mut self, params: &StrategyParams) {
        let n = self.entry_price_history.len();
        if n < 2 {
            return;
        }
        let (prev, last) = (self.entry_price_history[n - 2], self.entry_price_history[n - 1]);
        let next = if last >= prev * params.profit_threshold {
            params.leverage_boost_tier
        } else if last >= prev {
            self.leverage.saturating_sub(3).max(params.min_leverage)
        } else {
            self.leverage.saturating_add(1).min(params.max_leverage)
        };
        self.leverage = next.clamp(params.min_leverage, params.max_leverage);
    }

    /// Apply a protective-order fill
    pub fn apply_fill(&mut self, kind: FillKind) -> FillAction {
        let mode = self.active_strategy;
        match kind {
            FillKind::StopLoss => {
                match mode {
                    ActiveStrategy::Volatility => self.sl_hv_triggered = true,
                    ActiveStrategy::Trend | ActiveStrategy::Scalp => {
                        self.failed_l1 = true;
                        self.take_profit = false;
                        self.l2_order = false;
                    }
                    ActiveStrategy::None => {}
                }
                FillAction::CloseSlaves(mode)
            }
            FillKind::TakeProfit => {
                if matches!(mode, ActiveStrategy::Trend | ActiveStrategy::Scalp) {
                    self.failed_l1 = false;
                    self.take_profit = true;
                    self.l2_order = false;
                }
                FillAction::CloseSlaves(mode)
            }
            FillKind::Other => FillAction::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StrategyParams {
        StrategyParams::default()
    }

    fn snapshot(cur: i8, prev: i8, price: f64) -> SignalSnapshot {
        SignalSnapshot {
            signal_cur: cur,
            signal_prev: prev,
            current_price: price,
            bar_open: price,
            bar_low: price * 0.99,
            bar_time: 1_000,
            fast_sma: price,
            slow_sma: price,
            volume_sma: 1.0,
            highest_high: price,
            lowest_low: price,
            dip: false,
            spike: false,
        }
    }

    #[test]
    fn test_trend_entry_from_flat() {
        let mut state = StrategyState::new(&params());
        let t = state.step(&snapshot(1, -1, 100.0), false, &params(), 99.0);
        let Transition::TrendEntry(intent) = t else {
            panic!("expected trend entry, got {:?}", t);
        };
        assert_eq!(intent.leverage, 1);
        assert!((intent.stop_loss.unwrap() - 97.0).abs() < 1e-9);
        assert!((intent.take_profit.unwrap() - 110.0).abs() < 1e-9);
        assert!(intent.cancel_resting);
        assert_eq!(state.active_strategy, ActiveStrategy::Trend);
        assert!(state.trend_up);
        assert_eq!(state.entry_price_history, vec![100.0]);

        // Latched: the same crossover does not enter twice
        assert_eq!(state.step(&snapshot(1, -1, 100.0), false, &params(), 99.0), Transition::Hold);
    }

    #[test]
    fn test_drawdown_boosts_entry_leverage() {
        let mut state = StrategyState::new(&params());
        let mut snap = snapshot(1, -1, 100.0);
        snap.highest_high = 200.0;
        snap.lowest_low = 100.0;
        let t = state.step(&snap, false, &params(), 99.0);
        assert_eq!(t.intent().unwrap().leverage, 2);
    }

    #[test]
    fn test_adaptive_scalp_upgrade_on_bull() {
        let p = StrategyParams {
            scalp_adaptive_tp: true,
            ..params()
        };
        let mut state = StrategyState::new(&p);
        let mut dip = snapshot(-1, -1, 90.0);
        dip.dip = true;
        assert!(matches!(state.step(&dip, false, &p, 99.0), Transition::ScalpEntry(_)));
        assert!(state.adaptive_tp);

        let t = state.step(&snapshot(1, -1, 95.0), true, &p, 99.0);
        let Transition::UpgradeTakeProfit { price } = t else {
            panic!("expected upgrade, got {:?}", t);
        };
        assert!((price - 90.0 * 0.99 * 1.70).abs() < 1e-9);
        assert!(state.tp_boosted);
    }

    #[test]
    fn test_adaptive_scalp_bear_restores_safe_tp() {
        let p = StrategyParams {
            scalp_adaptive_tp: true,
            ..params()
        };
        let mut state = StrategyState::new(&p);
        state.active_strategy = ActiveStrategy::Scalp;
        state.adaptive_tp = true;
        state.tp_boosted = true;
        state.scalp_entry_history.push(100.0);

        let t = state.step(&snapshot(-1, 1, 110.0), true, &p, 99.0);
        assert_eq!(t, Transition::BearEvent(BearAction::RestoreTakeProfit(125.0)));
        assert!(!state.tp_boosted);
    }

    #[test]
    fn test_adaptive_scalp_bear_exits_above_safe_tp() {
        let mut state = StrategyState::new(&params());
        state.active_strategy = ActiveStrategy::Scalp;
        state.adaptive_tp = true;
        state.scalp_entry_history.push(100.0);
        let t = state.step(&snapshot(-1, 1, 130.0), true, &params(), 99.0);
        assert_eq!(t, Transition::BearEvent(BearAction::Exit));
    }

    #[test]
    fn test_bear_exit_resets_episode_flags() {
        let mut state = StrategyState::new(&params());
        state.active_strategy = ActiveStrategy::Trend;
        state.take_profit = true;
        state.entry_price_history.push(100.0);

        let t = state.step(&snapshot(-1, 1, 90.0), true, &params(), 99.0);
        assert_eq!(t, Transition::BearEvent(BearAction::Exit));
        assert!(state.trend_down && !state.trend_up);
        assert!(!state.take_profit && !state.failed_l1 && !state.l2_order);
        // Loss: leverage steps up
        assert_eq!(state.leverage, 2);
    }

    #[test]
    fn test_leverage_adaptation_rules() {
        let p = params();
        let mut state = StrategyState::new(&p);
        state.leverage = 7;

        state.entry_price_history = vec![100.0, 106.0];
        state.adapt_leverage(&p);
        assert_eq!(state.leverage, 2);

        state.leverage = 7;
        state.entry_price_history = vec![100.0, 101.0];
        state.adapt_leverage(&p);
        assert_eq!(state.leverage, 4);

        state.leverage = 10;
        state.entry_price_history = vec![100.0, 99.0];
        state.adapt_leverage(&p);
        assert_eq!(state.leverage, 10);

        state.leverage = 2;
        state.entry_price_history = vec![100.0, 101.0];
        state.adapt_leverage(&p);
        assert_eq!(state.leverage, 1);
    }

    #[test]
    fn test_volatility_lockout_per_bar() {
        let mut state = StrategyState::new(&params());
        let mut spike = snapshot(-1, -1, 100.0);
        spike.spike = true;
        state.observe_bar(spike.bar_time);

        let t = state.step(&spike, false, &params(), 99.0);
        let Transition::VolatilityEntry(intent) = t else {
            panic!("expected volatility entry, got {:?}", t);
        };
        assert_eq!(intent.leverage, 3);
        assert_eq!(state.hv_traded_bar, Some(1_000));

        // Stopped out on the same bar: flat again, but locked out
        state.reset_on_flat();
        assert_eq!(state.step(&spike, false, &params(), 99.0), Transition::Hold);
    }

    #[test]
    fn test_volatility_stop_blocks_reentry_until_next_bar() {
        let mut state = StrategyState::new(&params());
        state.observe_bar(1_000);
        state.active_strategy = ActiveStrategy::Volatility;
        assert_eq!(state.apply_fill(FillKind::StopLoss), FillAction::CloseSlaves(ActiveStrategy::Volatility));
        assert!(state.sl_hv_triggered);

        state.reset_on_flat();
        let mut spike = snapshot(-1, -1, 100.0);
        spike.spike = true;
        spike.bar_time = 2_000;
        assert_eq!(state.step(&spike, false, &params(), 99.0), Transition::Hold);

        assert!(state.observe_bar(2_000));
        assert!(!state.sl_hv_triggered);
        assert!(matches!(state.step(&spike, false, &params(), 99.0), Transition::VolatilityEntry(_)));
    }

    #[test]
    fn test_volatility_exit_on_bar_boundary() {
        let mut state = StrategyState::new(&params());
        state.active_strategy = ActiveStrategy::Volatility;
        state.observe_bar(1_000);
        assert_eq!(state.step(&snapshot(-1, -1, 100.0), true, &params(), 99.0), Transition::Hold);

        assert!(state.observe_bar(2_000));
        let mut snap = snapshot(-1, -1, 100.0);
        snap.bar_time = 2_000;
        assert_eq!(state.step(&snap, true, &params(), 99.0), Transition::VolatilityExit);
        assert_eq!(state.active_strategy, ActiveStrategy::None);
        assert!(!state.bar_boundary_pending());
    }

    #[test]
    fn test_boundary_survives_higher_priority_transition() {
        let mut state = StrategyState::new(&params());
        state.active_strategy = ActiveStrategy::Volatility;
        state.observe_bar(1_000);
        state.observe_bar(2_000);

        // Bull crossover takes this evaluation; the latch survives it
        let mut snap = snapshot(1, -1, 100.0);
        snap.bar_time = 2_000;
        assert_eq!(state.step(&snap, true, &params(), 99.0), Transition::Hold);
        assert!(state.bar_boundary_pending());

        assert_eq!(state.step(&snap, true, &params(), 99.0), Transition::VolatilityExit);
    }

    #[test]
    fn test_fill_routing() {
        let mut state = StrategyState::new(&params());
        state.active_strategy = ActiveStrategy::Trend;
        state.l2_order = true;

        assert_eq!(state.apply_fill(FillKind::StopLoss), FillAction::CloseSlaves(ActiveStrategy::Trend));
        assert!(state.failed_l1 && !state.take_profit && !state.l2_order);

        assert_eq!(state.apply_fill(FillKind::TakeProfit), FillAction::CloseSlaves(ActiveStrategy::Trend));
        assert!(!state.failed_l1 && state.take_profit);

        assert_eq!(state.apply_fill(FillKind::Other), FillAction::Ignore);
    }

    #[test]
    fn test_l2_requires_recovery_to_trigger() {
        let mut state = StrategyState::new(&params());
        state.failed_l1 = true;
        state.trend_up = true;
        state.entry_price_history.push(100.0);

        assert_eq!(state.step(&snapshot(1, 1, 100.5), false, &params(), 99.0), Transition::Hold);

        let t = state.step(&snapshot(1, 1, 101.0), false, &params(), 99.0);
        let Transition::TrendReentry(intent) = t else {
            panic!("expected L2, got {:?}", t);
        };
        assert!((intent.reference_price - 101.0).abs() < 1e-9);
        assert!((intent.stop_loss.unwrap() - 98.0).abs() < 1e-9);
        assert!(intent.take_profit.is_none());
        assert!(state.l2_order);
    }
}
