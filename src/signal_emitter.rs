//! C4 — turns a confirmed touch into an `OrderIntent` and hands it to the
//! broker, unconditionally resetting detector state afterward.

use crate::broker::BrokerAdapter;
use crate::log_ctx;
use crate::telemetry::Telemetry;
use crate::types::{BotState, OrderIntent, OrderSide, SwingType, SymbolInfo};

/// `max(2 pips, broker min-stop-distance)`, where the broker floor is
/// itself `max(trade_stops_level * point, 3 * point)` — the nested max
/// mirrors the source's fallback-to-3-points-if-stops_level-is-zero shape.
fn min_stop_distance(info: &SymbolInfo) -> f64 {
    let broker_floor = (info.trade_stops_level * info.point).max(3.0 * info.point);
    (2.0 * info.pip_size()).max(broker_floor)
}

/// Attempts to emit a signal from a confirmed `BotState`. Always resets
/// `state` before returning, win or lose — a confirmed touch is consumed
/// exactly once regardless of outcome.
pub async fn try_emit<B: BrokerAdapter + ?Sized>(
    state: &mut BotState,
    broker: &B,
    telemetry: &Telemetry,
    symbol: &str,
    win_ratio: f64,
) {
    let result = emit(state, broker, symbol, win_ratio).await;
    state.reset();

    match result {
        Ok(intent) => {
            telemetry.log_signal(symbol, intent.side, intent.entry, intent.sl, intent.tp);
            telemetry.send_trade_email_async(
                &format!("NEW {:?} ORDER {}", intent.side, symbol),
                &format!("Entry: {}\nSL: {}\nTP: {}\n{}", intent.entry, intent.sl, intent.tp, intent.comment),
            );
        }
        Err(reason) => {
            log_ctx!(info, "signal withheld: {}", reason);
        }
    }
}

async fn emit<B: BrokerAdapter + ?Sized>(
    state: &BotState,
    broker: &B,
    symbol: &str,
    win_ratio: f64,
) -> Result<OrderIntent, String> {
    if !state.is_confirmed() {
        return Err("touch not confirmed".to_string());
    }
    let fib = state.fib.ok_or("confirmed state with no fib snapshot")?;
    let swing = state.last_swing.ok_or("confirmed state with no swing")?;

    let info = broker.symbol_info(symbol).await.map_err(|e| e.to_string())?;
    let tick = broker.symbol_info_tick(symbol).await.map_err(|e| e.to_string())?;
    let min_abs_dist = min_stop_distance(&info);

    let (side, entry) = match swing {
        SwingType::Bullish => (OrderSide::Buy, tick.ask),
        SwingType::Bearish => (OrderSide::Sell, tick.bid),
    };

    let mut candidate_sl = fib.p1;
    match side {
        OrderSide::Buy => {
            if candidate_sl >= entry {
                return Err("fib 1.0 is above entry on a buy signal".to_string());
            }
            if entry - candidate_sl < min_abs_dist {
                let adjusted = entry - min_abs_dist;
                if adjusted <= 0.0 {
                    return Err("invalid SL distance after nudge".to_string());
                }
                candidate_sl = adjusted;
            }
            if candidate_sl >= entry {
                return Err("SL still at or above entry after nudge".to_string());
            }
        }
        OrderSide::Sell => {
            if candidate_sl <= entry {
                return Err("fib 1.0 is below entry on a sell signal".to_string());
            }
            if candidate_sl - entry < min_abs_dist {
                let adjusted = entry + min_abs_dist;
                candidate_sl = adjusted;
            }
            if candidate_sl <= entry {
                return Err("SL still at or below entry after nudge".to_string());
            }
        }
    }

    let stop_distance = (entry - candidate_sl).abs();
    let tp = match side {
        OrderSide::Buy => entry + stop_distance * win_ratio,
        OrderSide::Sell => entry - stop_distance * win_ratio,
    };

    let intent = OrderIntent {
        symbol: symbol.to_string(),
        side,
        entry,
        sl: candidate_sl,
        tp,
        comment: format!("{:?} Swing", swing),
    };

    let open_result = match side {
        OrderSide::Buy => broker.open_buy_position(&intent).await,
        OrderSide::Sell => broker.open_sell_position(&intent).await,
    };
    if let Err(e) = open_result {
        log_ctx!(warn, "broker rejected order, signal still recorded: {}", e);
    }

    Ok(intent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBrokerAdapter;
    use crate::telemetry::{LogSink, Telemetry};
    use crate::types::{Bar, FibSnapshot, Tick, TouchState};

    fn confirmed_bullish_state() -> BotState {
        let fib = FibSnapshot::new(1.1070, 1.1020, 0, 0);
        let first = Box::new(Bar { timestamp: 1, open: 1.1050, high: 1.1052, low: 1.1044, close: 1.1046 });
        let second = Box::new(Bar { timestamp: 2, open: 1.1046, high: 1.1052, low: 1.1044, close: 1.1050 });
        BotState { fib: Some(fib), last_swing: Some(SwingType::Bullish), touch: TouchState::Confirmed { first, second } }
    }

    fn symbol_info() -> SymbolInfo {
        SymbolInfo { point: 0.00001, digits: 5, trade_stops_level: 0.0, trade_tick_value: 1.0 }
    }

    #[tokio::test]
    async fn emits_buy_order_with_fib_stop_and_scaled_target() {
        let mut state = confirmed_bullish_state();
        let broker = MockBrokerAdapter::new(vec![], symbol_info(), Tick { bid: 1.1059, ask: 1.1060 });
        let telemetry = Telemetry::spawn(vec![Box::new(LogSink)]);
        super::try_emit(&mut state, &broker, &telemetry, "EURUSD", 2.0).await;

        let positions = broker.positions.lock().unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, OrderSide::Buy);
        assert!((positions[0].sl - 1.1020).abs() < 1e-9);
        let expected_tp = 1.1060 + (1.1060 - 1.1020) * 2.0;
        assert!((positions[0].tp - expected_tp).abs() < 1e-9);
        assert!(state.fib.is_none(), "state must reset after emission");
    }

    #[tokio::test]
    async fn nudges_sl_when_too_close_to_entry() {
        let mut state = confirmed_bullish_state();
        state.fib = Some(FibSnapshot::new(1.1070, 1.10599, 0, 0));
        let broker = MockBrokerAdapter::new(vec![], symbol_info(), Tick { bid: 1.1059, ask: 1.1060 });
        let telemetry = Telemetry::spawn(vec![Box::new(LogSink)]);
        super::try_emit(&mut state, &broker, &telemetry, "EURUSD", 2.0).await;

        let positions = broker.positions.lock().unwrap();
        assert_eq!(positions.len(), 1);
        assert!(positions[0].sl < 1.1060 - 0.0001);
    }

    #[tokio::test]
    async fn withholds_signal_when_fib_stop_is_above_entry() {
        let mut state = confirmed_bullish_state();
        state.fib = Some(FibSnapshot::new(1.1070, 1.1065, 0, 0));
        let broker = MockBrokerAdapter::new(vec![], symbol_info(), Tick { bid: 1.1059, ask: 1.1060 });
        let telemetry = Telemetry::spawn(vec![Box::new(LogSink)]);
        super::try_emit(&mut state, &broker, &telemetry, "EURUSD", 2.0).await;

        assert!(broker.positions.lock().unwrap().is_empty());
        assert!(state.fib.is_none(), "state resets even when withheld");
    }
}
