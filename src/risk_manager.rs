//! C5 — position registration and the staged SL/TP ratchet keyed to
//! realized R (risk-reward multiple of the position's initial stop
//! distance).

use std::collections::HashMap;

use crate::broker::BrokerAdapter;
use crate::log_ctx;
use crate::telemetry::Telemetry;
use crate::types::{BrokerPosition, OrderSide, PositionState, StageSpec, SymbolInfo};

/// Fallback commission-trigger R applied when the money-risk calculation
/// can't be completed (missing symbol info or zero risk money).
const COMMISSION_TRIGGER_FALLBACK_R: f64 = 0.1;

/// Tracks every open ticket from first sighting until it vanishes from the
/// broker's position set.
#[derive(Default)]
pub struct PositionRegistry {
    positions: HashMap<u64, PositionState>,
}

impl PositionRegistry {
    pub fn new() -> Self {
        PositionRegistry::default()
    }

    /// Registers any broker position not yet tracked, then purges tracked
    /// tickets absent from `live`. Returns newly registered tickets.
    fn sync(&mut self, live: &[BrokerPosition], info: &SymbolInfo, commission_per_lot: f64, buffer_r: f64, base_tp_r: f64) {
        let live_tickets: std::collections::HashSet<u64> = live.iter().map(|p| p.ticket).collect();
        self.positions.retain(|ticket, _| live_tickets.contains(ticket));

        for pos in live {
            if self.positions.contains_key(&pos.ticket) {
                continue;
            }
            if let Some(state) = register(pos, info, commission_per_lot, buffer_r, base_tp_r) {
                log_ctx!(info, "position registered ticket={} commission_trigger_r={:.3}", pos.ticket, state.commission_trigger_r);
                self.positions.insert(pos.ticket, state);
            }
        }
    }

    /// Runs one tick of stage evaluation for every tracked, still-live
    /// position, applying at most the stages whose trigger is met and
    /// whose SL change strictly improves over the broker's current SL.
    pub async fn manage<B: BrokerAdapter + ?Sized>(
        &mut self,
        broker: &B,
        symbol: &str,
        stages: &[StageSpec],
        commission_per_lot: f64,
        buffer_r: f64,
        base_tp_r: f64,
        telemetry: &Telemetry,
    ) -> Result<(), String> {
        let live = broker.get_positions(symbol).await.map_err(|e| e.to_string())?;
        let info = broker.symbol_info(symbol).await.map_err(|e| e.to_string())?;
        self.sync(&live, &info, commission_per_lot, buffer_r, base_tp_r);

        let tick = broker.symbol_info_tick(symbol).await.map_err(|e| e.to_string())?;
        let cur_price_by_ticket: HashMap<u64, f64> = live
            .iter()
            .map(|p| (p.ticket, if p.side == OrderSide::Buy { tick.bid } else { tick.ask }))
            .collect();
        let live_by_ticket: HashMap<u64, &BrokerPosition> = live.iter().map(|p| (p.ticket, p)).collect();

        for (ticket, state) in self.positions.iter_mut() {
            let Some(&cur_price) = cur_price_by_ticket.get(ticket) else { continue };
            let Some(&pos) = live_by_ticket.get(ticket) else { continue };

            let price_profit = match state.direction {
                OrderSide::Buy => cur_price - state.entry,
                OrderSide::Sell => state.entry - cur_price,
            };
            let profit_r = if state.risk_abs != 0.0 { price_profit / state.risk_abs } else { 0.0 };

            for stage in stages {
                if state.done_stages.contains(&stage.id) {
                    continue;
                }
                let trigger_r = stage.trigger_r.resolve(state.commission_trigger_r);
                let sl_lock_r = stage.sl_lock_r.resolve(state.commission_trigger_r);
                if profit_r < trigger_r {
                    continue;
                }

                let new_sl = match state.direction {
                    OrderSide::Buy => state.entry + sl_lock_r * state.risk_abs,
                    OrderSide::Sell => state.entry - sl_lock_r * state.risk_abs,
                };
                let new_tp = stage.tp_r.map(|tp_r| match state.direction {
                    OrderSide::Buy => state.entry + tp_r * state.risk_abs,
                    OrderSide::Sell => state.entry - tp_r * state.risk_abs,
                });

                let improves = match state.direction {
                    OrderSide::Buy => new_sl > pos.sl,
                    OrderSide::Sell => new_sl < pos.sl,
                };
                if !improves {
                    continue;
                }

                let applied_tp = new_tp.unwrap_or(pos.tp);
                if broker.modify_sl_tp(*ticket, new_sl, applied_tp).await.is_ok() {
                    state.done_stages.insert(stage.id.clone());
                    telemetry.log_position_event(state, &stage.id, new_sl, applied_tp);
                    log_ctx!(info, "stage {} applied ticket={} profit_r={:.3} sl={:.5}", stage.id, ticket, profit_r, new_sl);
                }
            }
        }
        Ok(())
    }
}

/// Builds the initial `PositionState` for a freshly-seen broker position.
/// Returns `None` when risk is zero or undefined (no SL yet attached).
fn register(pos: &BrokerPosition, info: &SymbolInfo, commission_per_lot: f64, buffer_r: f64, base_tp_r: f64) -> Option<PositionState> {
    let risk_abs = (pos.price_open - pos.sl).abs();
    if risk_abs == 0.0 {
        return None;
    }

    let commission_trigger_r = commission_trigger_r(risk_abs, pos.volume, info, commission_per_lot, buffer_r);

    Some(PositionState {
        ticket: pos.ticket,
        direction: pos.side,
        entry: pos.price_open,
        risk_abs,
        base_tp_r,
        volume: pos.volume,
        done_stages: Default::default(),
        commission_trigger_r,
    })
}

fn commission_trigger_r(risk_abs: f64, volume: f64, info: &SymbolInfo, commission_per_lot: f64, buffer_r: f64) -> f64 {
    let pip_size = info.pip_size();
    if pip_size == 0.0 {
        return COMMISSION_TRIGGER_FALLBACK_R;
    }
    let risk_pips = risk_abs / pip_size;
    let risk_money = risk_pips * info.pip_value() * volume;
    if risk_money <= 0.0 {
        return COMMISSION_TRIGGER_FALLBACK_R;
    }
    commission_per_lot / risk_money + buffer_r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBrokerAdapter;
    use crate::telemetry::{LogSink, Telemetry};
    use crate::types::Tick;

    fn eurusd_info() -> SymbolInfo {
        SymbolInfo { point: 0.00001, digits: 5, trade_stops_level: 0.0, trade_tick_value: 1.0 }
    }

    #[test]
    fn registration_skips_zero_risk_positions() {
        let pos = BrokerPosition { ticket: 1, side: OrderSide::Buy, price_open: 1.1000, sl: 1.1000, tp: 1.1100, volume: 0.01 };
        assert!(register(&pos, &eurusd_info(), 4.5, 0.15, 2.0).is_none());
    }

    #[test]
    fn commission_trigger_falls_back_when_money_risk_is_zero() {
        let info = SymbolInfo { point: 0.00001, digits: 5, trade_stops_level: 0.0, trade_tick_value: 0.0 };
        let r = commission_trigger_r(0.0030, 0.01, &info, 4.5, 0.15);
        assert_eq!(r, COMMISSION_TRIGGER_FALLBACK_R);
    }

    #[test]
    fn commission_trigger_includes_buffer() {
        let info = eurusd_info();
        // risk_abs=0.0030 -> risk_pips=30, pip_value=10 (5-digit), volume=0.01 -> risk_money=3.0
        let r = commission_trigger_r(0.0030, 0.01, &info, 4.5, 0.15);
        assert!((r - (4.5 / 3.0 + 0.15)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn monotonicity_guard_blocks_non_improving_sl() {
        let mut registry = PositionRegistry::new();
        let info = eurusd_info();
        let broker = MockBrokerAdapter::new(vec![], info, Tick { bid: 1.1100, ask: 1.1101 });
        broker.positions.lock().unwrap().push(BrokerPosition {
            ticket: 7,
            side: OrderSide::Buy,
            price_open: 1.1000,
            sl: 1.0950,
            tp: 1.1300,
            volume: 0.01,
        });
        let telemetry = Telemetry::spawn(vec![Box::new(LogSink)]);
        let stage_2r = StageSpec {
            id: "stage_2R".into(),
            trigger_r: crate::types::TriggerSpec::Fixed(2.0),
            sl_lock_r: crate::types::TriggerSpec::Fixed(2.0),
            tp_r: Some(3.0),
        };
        // First tick: profit_R = (1.1100-1.1000)/0.0050 = 2.0, stage_2R fires,
        // locking SL to entry + 2.0*risk = 1.1100.
        registry.manage(&broker, "EURUSD", &[stage_2r.clone()], 4.5, 0.15, 2.0, &telemetry).await.unwrap();
        assert!((broker.positions.lock().unwrap()[0].sl - 1.1100).abs() < 1e-9);

        // Second tick: a lower-order stage (never fired before) computes a
        // less favorable SL than what's already locked in. The guard must
        // refuse to regress it.
        let stage_1_5r = StageSpec {
            id: "stage_1_5R".into(),
            trigger_r: crate::types::TriggerSpec::Fixed(1.5),
            sl_lock_r: crate::types::TriggerSpec::Fixed(1.5),
            tp_r: None,
        };
        registry.manage(&broker, "EURUSD", &[stage_1_5r], 4.5, 0.15, 2.0, &telemetry).await.unwrap();
        assert!((broker.positions.lock().unwrap()[0].sl - 1.1100).abs() < 1e-9, "SL must not regress");
    }

    #[tokio::test]
    async fn stage_fires_once_profit_crosses_trigger() {
        let mut registry = PositionRegistry::new();
        let info = eurusd_info();
        let broker = MockBrokerAdapter::new(vec![], info, Tick { bid: 1.1100, ask: 1.1101 });
        broker.positions.lock().unwrap().push(BrokerPosition {
            ticket: 9,
            side: OrderSide::Buy,
            price_open: 1.1000,
            sl: 1.0950,
            tp: 1.1300,
            volume: 0.01,
        });
        let telemetry = Telemetry::spawn(vec![Box::new(LogSink)]);
        let stages = vec![StageSpec {
            id: "stage_2R".into(),
            trigger_r: crate::types::TriggerSpec::Fixed(2.0),
            sl_lock_r: crate::types::TriggerSpec::Fixed(2.0),
            tp_r: Some(3.0),
        }];
        registry.manage(&broker, "EURUSD", &stages, 4.5, 0.15, 2.0, &telemetry).await.unwrap();

        let positions = broker.positions.lock().unwrap();
        let expected_sl = 1.1000 + 2.0 * 0.0050;
        assert!((positions[0].sl - expected_sl).abs() < 1e-9);
    }
}
