//! C2 — classifies the last three legs as a bullish/bearish swing.

use crate::types::{Direction, Leg, SwingType};

/// Pure, deterministic classification over the last three legs of a window.
/// Returns `None` until at least three legs exist.
///
/// Bullish swing: L0 up, L1 down, L2 up, with L2's top exceeding L0's top
/// (a higher-high / higher-low pullback shape). Bearish is the mirror.
pub fn classify_swing(legs: &[Leg]) -> Option<(SwingType, bool)> {
    if legs.len() < 3 {
        return None;
    }
    let n = legs.len();
    let l0 = &legs[n - 3];
    let l1 = &legs[n - 2];
    let l2 = &legs[n - 1];

    let bullish = l0.direction == Direction::Up
        && l1.direction == Direction::Down
        && l2.direction == Direction::Up
        && l2.end_value > l0.end_value;

    let bearish = l0.direction == Direction::Down
        && l1.direction == Direction::Up
        && l2.direction == Direction::Down
        && l2.end_value < l0.end_value;

    if bullish {
        Some((SwingType::Bullish, true))
    } else if bearish {
        Some((SwingType::Bearish, true))
    } else {
        Some((if l2.direction == Direction::Up { SwingType::Bullish } else { SwingType::Bearish }, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(dir: Direction, start: f64, end: f64) -> Leg {
        Leg { start_ts: 0, end_ts: 1, start_value: start, end_value: end, direction: dir }
    }

    #[test]
    fn fewer_than_three_legs_is_none() {
        let legs = vec![leg(Direction::Up, 1.0, 1.1)];
        assert!(classify_swing(&legs).is_none());
    }

    #[test]
    fn up_down_up_with_higher_high_is_bullish_swing() {
        let legs = vec![
            leg(Direction::Up, 1.1000, 1.1060),
            leg(Direction::Down, 1.1060, 1.1020),
            leg(Direction::Up, 1.1020, 1.1070),
        ];
        let (ty, is_swing) = classify_swing(&legs).unwrap();
        assert_eq!(ty, SwingType::Bullish);
        assert!(is_swing);
    }

    #[test]
    fn down_up_down_with_lower_low_is_bearish_swing() {
        let legs = vec![
            leg(Direction::Down, 1.1060, 1.1000),
            leg(Direction::Up, 1.1000, 1.1040),
            leg(Direction::Down, 1.1040, 1.0990),
        ];
        let (ty, is_swing) = classify_swing(&legs).unwrap();
        assert_eq!(ty, SwingType::Bearish);
        assert!(is_swing);
    }

    #[test]
    fn up_down_up_without_higher_high_is_not_a_swing() {
        let legs = vec![
            leg(Direction::Up, 1.1000, 1.1060),
            leg(Direction::Down, 1.1060, 1.1020),
            leg(Direction::Up, 1.1020, 1.1050), // fails to exceed L0 top
        ];
        let (_, is_swing) = classify_swing(&legs).unwrap();
        assert!(!is_swing);
    }
}
