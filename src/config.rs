use crate::types::TriggerSpec;

// ─── Broker bridge ─────────────────────────────────────────────────────────
// BROKER_BRIDGE_URL, BROKER_API_KEY, BROKER_SECRET, EMAIL_WEBHOOK_URL
// are read from environment variables at runtime (see .env.example).
pub const BROKER_BRIDGE_URL_DEFAULT: &str = "http://127.0.0.1:8787";

// ─── Instrument ──────────────────────────────────────────────────────────────
pub const SYMBOL: &str = "EURUSD";
pub const LOT_SIZE: f64 = 0.01;
pub const WIN_RATIO: f64 = 2.0;
pub const MAGIC_NUMBER: u32 = 234_000;
pub const MAX_SPREAD: f64 = 3.0;
pub const RISK_PCT: f64 = 0.01;

pub struct TradingHours {
    pub start: &'static str,
    pub end: &'static str,
}

/// Trading window in the broker's configured timezone.
pub const TRADING_HOURS: TradingHours = TradingHours { start: "01:00", end: "23:59" };

// ─── Strategy ────────────────────────────────────────────────────────────────
pub const THRESHOLD_PIPS: f64 = 6.0;
pub const WINDOW_SIZE: usize = 100;
pub const MIN_SWING_SIZE: usize = 4;
pub const FIB_705: f64 = 0.705;
pub const FIB_90: f64 = 0.9;

/// Force a processing pass after this many ~500ms idle cycles (≈60s).
pub const MAX_WAIT_CYCLES: u32 = 120;

// ─── Dynamic risk schedule ─────────────────────────────────────────────────
pub const RISK_SCHEDULE_ENABLE: bool = true;
pub const COMMISSION_PER_LOT: f64 = 4.5;
pub const COMMISSION_BUFFER_R: f64 = 0.15;
pub const BASE_TP_R: f64 = 2.0;

pub fn stage_schedule() -> Vec<crate::types::StageSpec> {
    use crate::types::StageSpec;
    let fixed_stage = |id: &str, trigger: f64, lock: f64, tp: f64| StageSpec {
        id: id.to_string(),
        trigger_r: TriggerSpec::Fixed(trigger),
        sl_lock_r: TriggerSpec::Fixed(lock),
        tp_r: Some(tp),
    };
    let mut stages = vec![StageSpec {
        id: "commission_breakeven".to_string(),
        trigger_r: TriggerSpec::AutoCommission,
        sl_lock_r: TriggerSpec::AutoCommission,
        tp_r: None, // TP is left untouched at this stage
    }];
    // 2R through 20R: SL follows price 1:1, TP retargeted one R further out.
    for r in 2..=20 {
        let r = r as f64;
        stages.push(fixed_stage(&format!("stage_{}R", r as u32), r, r, r + 1.0));
    }
    stages
}

pub fn tick_decimals(digits: u32) -> usize {
    digits as usize
}
