//! C1 — reduces a window of bars to an ordered list of monotonic price legs.

use crate::types::{Bar, Direction, Leg};

/// Scans `bars` left to right tracking a running extreme and a tentative
/// direction; emits a leg whenever price reverses by at least `threshold`
/// price units against that extreme. The extreme is the running high while
/// climbing and the running low while falling, and a reversal is measured
/// off the opposite wick (a dip's low against an up-extreme, a rally's high
/// against a down-extreme) rather than the close, so a single wide-ranged
/// bar can both extend and immediately reverse a leg. The window tail may
/// leave an incomplete trailing leg, which is still returned. Legs never
/// overlap and always alternate direction by construction.
///
/// `threshold` is already in price units (caller converts pips via
/// `SymbolInfo::pip_size`).
pub fn detect_legs(bars: &[Bar], threshold: f64) -> Vec<Leg> {
    if bars.len() < 2 {
        return Vec::new();
    }

    let mut legs = Vec::new();
    let mut pivot_ts = bars[0].timestamp;
    let mut pivot_value = bars[0].close;
    let mut direction: Option<Direction> = None;
    let mut extreme_ts = pivot_ts;
    let mut extreme_value = pivot_value;

    for bar in &bars[1..] {
        match direction {
            None => {
                if bar.high - pivot_value >= threshold {
                    direction = Some(Direction::Up);
                    extreme_ts = bar.timestamp;
                    extreme_value = bar.high;
                } else if pivot_value - bar.low >= threshold {
                    direction = Some(Direction::Down);
                    extreme_ts = bar.timestamp;
                    extreme_value = bar.low;
                }
            }
            Some(Direction::Up) => {
                if bar.high > extreme_value {
                    extreme_ts = bar.timestamp;
                    extreme_value = bar.high;
                } else if extreme_value - bar.low >= threshold {
                    legs.push(Leg {
                        start_ts: pivot_ts,
                        end_ts: extreme_ts,
                        start_value: pivot_value,
                        end_value: extreme_value,
                        direction: Direction::Up,
                    });
                    pivot_ts = extreme_ts;
                    pivot_value = extreme_value;
                    direction = Some(Direction::Down);
                    extreme_ts = bar.timestamp;
                    extreme_value = bar.low;
                }
            }
            Some(Direction::Down) => {
                if bar.low < extreme_value {
                    extreme_ts = bar.timestamp;
                    extreme_value = bar.low;
                } else if bar.high - extreme_value >= threshold {
                    legs.push(Leg {
                        start_ts: pivot_ts,
                        end_ts: extreme_ts,
                        start_value: pivot_value,
                        end_value: extreme_value,
                        direction: Direction::Down,
                    });
                    pivot_ts = extreme_ts;
                    pivot_value = extreme_value;
                    direction = Some(Direction::Up);
                    extreme_ts = bar.timestamp;
                    extreme_value = bar.high;
                }
            }
        }
    }

    // Tail: an in-progress leg that never reversed far enough to close.
    if let Some(dir) = direction {
        legs.push(Leg {
            start_ts: pivot_ts,
            end_ts: extreme_ts,
            start_value: pivot_value,
            end_value: extreme_value,
            direction: dir,
        });
    }

    legs
}
