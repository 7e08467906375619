//! C3 — the Fibonacci state machine. Owns `BotState` and mutates it using
//! the penultimate bar of each new window as the "closed" driving bar.

use crate::fib::fib_snapshot;
use crate::types::{Bar, BotState, Leg, SwingType, TouchState};

/// Phase 1: install a fresh snapshot from a confirmed swing, subject to the
/// admission guard that couples classification and installation — the
/// closing bar must already have broken past the pullback leg's origin.
fn try_install(state: &mut BotState, legs: &[Leg], swing_type: SwingType, closed_bar: &Bar) {
    let n = legs.len();
    if n < 3 {
        return;
    }
    let l1 = &legs[n - 2];
    let l2 = &legs[n - 1];

    let admitted = match swing_type {
        SwingType::Bullish => closed_bar.close > l1.start_value,
        SwingType::Bearish => closed_bar.close < l1.start_value,
    };
    if !admitted {
        return;
    }

    state.reset();
    // p0 is the extreme the pullback is measured from, p1 its origin —
    // bullish: p0 is the leg's end (top); bearish: p0 is the leg's end
    // (bottom). Both read directly off L2 regardless of swing direction.
    state.fib = Some(fib_snapshot(l2.end_value, l2.start_value, l2.end_ts, l2.start_ts));
    state.last_swing = Some(swing_type);
}

/// Phase 2/3, unified into one branch keyed only on the active snapshot
/// and its swing direction — there was never a real distinction between
/// "extend" and "re-check" once a snapshot exists.
fn advance_snapshot(state: &mut BotState, closed_bar: &Bar) {
    let Some(swing) = state.last_swing else { return };
    let Some(fib) = state.fib else { return };

    match swing {
        SwingType::Bullish => {
            if closed_bar.high > fib.p0 {
                state.fib = Some(fib_snapshot(closed_bar.high, fib.p1, closed_bar.timestamp, fib.fib1_time));
                state.touch = TouchState::AwaitingFirst;
            } else if closed_bar.low < fib.p1 {
                state.reset();
            } else if closed_bar.low <= fib.p705 {
                register_touch(state, closed_bar);
            }
        }
        SwingType::Bearish => {
            if closed_bar.low < fib.p0 {
                state.fib = Some(fib_snapshot(closed_bar.low, fib.p1, closed_bar.timestamp, fib.fib1_time));
                state.touch = TouchState::AwaitingFirst;
            } else if closed_bar.high > fib.p1 {
                state.reset();
            } else if closed_bar.high >= fib.p705 {
                register_touch(state, closed_bar);
            }
        }
    }
}

/// Advances at most one slot of the two-touch protocol per call. The second
/// touch requires a bar status opposite the first (reversal confirmation).
fn register_touch(state: &mut BotState, closed_bar: &Bar) {
    state.touch = match std::mem::take(&mut state.touch) {
        TouchState::AwaitingFirst => TouchState::AwaitingSecond { first: Box::new(closed_bar.clone()) },
        TouchState::AwaitingSecond { first } => {
            if closed_bar.status() != first.status() {
                TouchState::Confirmed { second: Box::new(closed_bar.clone()), first }
            } else {
                TouchState::AwaitingSecond { first }
            }
        }
        confirmed @ TouchState::Confirmed { .. } => confirmed,
    };
}

/// Runs one tick of the state machine: Phase 1 admission (if a swing was
/// just classified) followed by Phase 2/3 advancement of any active
/// snapshot. `closed_bar` is `bars[len-2]`, the penultimate (fully formed)
/// bar of the window.
pub fn update(
    state: &mut BotState,
    legs: &[Leg],
    swing: Option<(SwingType, bool)>,
    closed_bar: &Bar,
) {
    if let Some((swing_type, true)) = swing {
        try_install(state, legs, swing_type, closed_bar);
    }
    advance_snapshot(state, closed_bar);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, FibSnapshot};

    fn bar(ts: i64, open: f64, close: f64, high: f64, low: f64) -> Bar {
        Bar { timestamp: ts, open, high, low, close }
    }

    fn up_down_up_legs() -> Vec<Leg> {
        vec![
            Leg { start_ts: 0, end_ts: 1, start_value: 1.1000, end_value: 1.1060, direction: Direction::Up },
            Leg { start_ts: 1, end_ts: 2, start_value: 1.1060, end_value: 1.1020, direction: Direction::Down },
            Leg { start_ts: 2, end_ts: 3, start_value: 1.1020, end_value: 1.1070, direction: Direction::Up },
        ]
    }

    #[test]
    fn installs_bullish_snapshot_on_admitted_swing() {
        let mut state = BotState::default();
        let legs = up_down_up_legs();
        // close above L1.start_value (1.1060) admits the install.
        let closing = bar(4, 1.1065, 1.1065, 1.1065, 1.1065);
        update(&mut state, &legs, Some((SwingType::Bullish, true)), &closing);
        let fib = state.fib.expect("snapshot installed");
        assert!((fib.p1 - 1.1020).abs() < 1e-9);
        assert!((fib.p0 - 1.1070).abs() < 1e-9);
        assert_eq!(state.last_swing, Some(SwingType::Bullish));
    }

    #[test]
    fn withholds_install_when_admission_guard_fails() {
        let mut state = BotState::default();
        let legs = up_down_up_legs();
        // close below L1.start_value (1.1060) fails the bullish admission guard.
        let closing = bar(4, 1.1040, 1.1040, 1.1040, 1.1040);
        update(&mut state, &legs, Some((SwingType::Bullish, true)), &closing);
        assert!(state.fib.is_none());
    }

    #[test]
    fn extension_clears_touches_and_moves_p0_outward() {
        let mut state = BotState {
            fib: Some(FibSnapshot::new(1.1070, 1.1020, 3, 2)),
            last_swing: Some(SwingType::Bullish),
            touch: TouchState::AwaitingSecond { first: Box::new(bar(5, 1.1050, 1.1040, 1.1050, 1.1035)) },
        };
        let closing = bar(6, 1.1070, 1.1076, 1.1075, 1.1060);
        update(&mut state, &[], None, &closing);
        let fib = state.fib.unwrap();
        assert!((fib.p0 - 1.1075).abs() < 1e-9);
        assert!((fib.p1 - 1.1020).abs() < 1e-9);
        assert_eq!(state.touch, TouchState::AwaitingFirst);
    }

    #[test]
    fn breach_below_p1_invalidates_state() {
        let mut state = BotState {
            fib: Some(FibSnapshot::new(1.1070, 1.1020, 3, 2)),
            last_swing: Some(SwingType::Bullish),
            touch: TouchState::AwaitingFirst,
        };
        let closing = bar(6, 1.1020, 1.1015, 1.1020, 1.1019);
        update(&mut state, &[], None, &closing);
        assert!(state.fib.is_none());
        assert!(state.last_swing.is_none());
    }

    #[test]
    fn two_touch_protocol_requires_opposite_status() {
        let fib = FibSnapshot::new(1.1070, 1.1020, 3, 2);
        let mut state = BotState { fib: Some(fib), last_swing: Some(SwingType::Bullish), touch: TouchState::AwaitingFirst };

        // First touch: a bearish bar dips to the 0.705 level.
        let first = bar(7, 1.1046, 1.1040, 1.1048, 1.1044);
        assert!((fib.p705 - 1.1055525).abs() < 1e-6 || fib.p705 <= fib.p0);
        update(&mut state, &[], None, &first);
        assert!(matches!(state.touch, TouchState::AwaitingSecond { .. }));

        // Same status again: does not confirm.
        let same_status = bar(8, 1.1046, 1.1040, 1.1048, 1.1044);
        update(&mut state, &[], None, &same_status);
        assert!(matches!(state.touch, TouchState::AwaitingSecond { .. }));

        // Opposite status: confirms.
        let second = bar(9, 1.1040, 1.1046, 1.1048, 1.1044);
        update(&mut state, &[], None, &second);
        assert!(state.is_confirmed());
    }

    #[test]
    fn fib_round_trip_law_holds() {
        let fib = FibSnapshot::new(1.1070, 1.1020, 0, 0);
        let expected = 1.1020 + 0.705 * (1.1070 - 1.1020);
        assert!((fib.p705 - expected).abs() < 1e-12);
        let mirrored = fib.mirrored();
        assert!((mirrored.p0 - fib.p1).abs() < 1e-12);
        assert!((mirrored.p1 - fib.p0).abs() < 1e-12);
    }
}
