use std::collections::HashSet;

/// One OHLC observation at the bot's working timeframe.
#[derive(Clone, Debug, PartialEq)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    pub fn status(&self) -> BarStatus {
        if self.open > self.close {
            BarStatus::Bearish
        } else {
            BarStatus::Bullish
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarStatus {
    Bullish,
    Bearish,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwingType {
    Bullish,
    Bearish,
}

/// Maximal monotonic price extent within the window exceeding the pip threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct Leg {
    pub start_ts: i64,
    pub end_ts: i64,
    pub start_value: f64,
    pub end_value: f64,
    pub direction: Direction,
}

/// A Fibonacci-retracement frame anchored on the latest confirmed swing leg.
///
/// For a bullish snapshot `p1 < p0` (retracement from the low at `p1` up to
/// the high at `p0`); bearish is the mirror image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FibSnapshot {
    pub p0: f64,
    pub p1: f64,
    pub p705: f64,
    pub p09: f64,
    pub fib0_time: i64,
    pub fib1_time: i64,
}

pub const FIB_705: f64 = 0.705;
pub const FIB_90: f64 = 0.9;

impl FibSnapshot {
    /// Build a snapshot from the two anchor prices of a leg, p0 (extreme)
    /// and p1 (origin), with their timestamps. Mirrors the Python
    /// `fibonacci_retracement` helper kept out of the core per spec.
    pub fn new(p0: f64, p1: f64, fib0_time: i64, fib1_time: i64) -> Self {
        FibSnapshot {
            p0,
            p1,
            p705: p1 + FIB_705 * (p0 - p1),
            p09: p1 + FIB_90 * (p0 - p1),
            fib0_time,
            fib1_time,
        }
    }

    /// The mirror snapshot obtained by swapping p0 and p1.
    pub fn mirrored(&self) -> Self {
        FibSnapshot::new(self.p1, self.p0, self.fib1_time, self.fib0_time)
    }
}

/// Three-state touch protocol: awaiting the first 0.705 touch, awaiting a
/// confirming opposite-status touch, or confirmed (ready for C4).
#[derive(Clone, Debug, PartialEq)]
pub enum TouchState {
    AwaitingFirst,
    AwaitingSecond { first: Box<Bar> },
    Confirmed { first: Box<Bar>, second: Box<Bar> },
}

impl Default for TouchState {
    fn default() -> Self {
        TouchState::AwaitingFirst
    }
}

/// Owns the active fib frame and the two-touch confirmation progress.
#[derive(Clone, Debug, Default)]
pub struct BotState {
    pub fib: Option<FibSnapshot>,
    pub last_swing: Option<SwingType>,
    pub touch: TouchState,
}

impl BotState {
    pub fn reset(&mut self) {
        *self = BotState::default();
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self.touch, TouchState::Confirmed { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// A validated order ready to hand to the broker adapter.
#[derive(Clone, Debug)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: OrderSide,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub comment: String,
}

/// How a stage's trigger/lock level resolves: a fixed R value, or the
/// position's computed commission-coverage R at evaluation time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TriggerSpec {
    Fixed(f64),
    AutoCommission,
}

impl TriggerSpec {
    pub fn resolve(&self, commission_trigger_r: f64) -> f64 {
        match self {
            TriggerSpec::Fixed(v) => *v,
            TriggerSpec::AutoCommission => commission_trigger_r,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StageSpec {
    pub id: String,
    pub trigger_r: TriggerSpec,
    pub sl_lock_r: TriggerSpec,
    pub tp_r: Option<f64>,
}

/// Tracked per open position, from first sighting until the ticket
/// disappears from the broker's position set.
#[derive(Clone, Debug)]
pub struct PositionState {
    pub ticket: u64,
    pub direction: OrderSide,
    pub entry: f64,
    pub risk_abs: f64,
    pub base_tp_r: f64,
    pub volume: f64,
    pub done_stages: HashSet<String>,
    pub commission_trigger_r: f64,
}

/// A live position as reported by the broker, before it is registered.
#[derive(Clone, Debug)]
pub struct BrokerPosition {
    pub ticket: u64,
    pub side: OrderSide,
    pub price_open: f64,
    pub sl: f64,
    pub tp: f64,
    pub volume: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct SymbolInfo {
    pub point: f64,
    pub digits: u32,
    pub trade_stops_level: f64,
    pub trade_tick_value: f64,
}

impl SymbolInfo {
    /// 5/3-digit FX quotes a pip as ten times the smallest increment;
    /// everything else uses the increment itself.
    pub fn pip_size(&self) -> f64 {
        if self.digits == 5 || self.digits == 3 {
            self.point * 10.0
        } else {
            self.point
        }
    }

    pub fn pip_value(&self) -> f64 {
        if self.digits == 5 || self.digits == 3 {
            self.trade_tick_value * 10.0
        } else {
            self.trade_tick_value
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
}
