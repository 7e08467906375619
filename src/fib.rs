//! Free-standing Fibonacci-retracement arithmetic, kept independent of
//! `BotState` so Phase 1 installation and Phase 2/3 extension can both call
//! through the same helper.

use crate::types::FibSnapshot;

/// Builds the four derived levels from the two extrema of a leg. `p0` is the
/// extreme the retracement measures from, `p1` its origin.
pub fn fib_snapshot(p0: f64, p1: f64, fib0_time: i64, fib1_time: i64) -> FibSnapshot {
    FibSnapshot::new(p0, p1, fib0_time, fib1_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p705_lies_between_p1_and_p0() {
        let fib = fib_snapshot(1.1070, 1.1020, 1, 0);
        assert!(fib.p705 > fib.p1 && fib.p705 < fib.p0);
    }
}
