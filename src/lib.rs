pub mod broker;
pub mod config;
pub mod error;
pub mod fib;
pub mod fib_state;
pub mod leg_detector;
pub mod risk_manager;
pub mod signal_emitter;
pub mod swing;
pub mod telemetry;
pub mod types;

use std::time::Duration;

use broker::BrokerAdapter;
use error::BotError;
use risk_manager::PositionRegistry;
use telemetry::Telemetry;
use types::{Bar, BotState, StageSpec};

/// Runs one tick of C1 through C5. Returns `Ok(true)` when the session gate
/// blocked trading (caller should sleep 60s instead of 500ms).
#[allow(clippy::too_many_arguments)]
pub async fn run_tick<B: BrokerAdapter + ?Sized>(
    broker: &B,
    telemetry: &Telemetry,
    state: &mut BotState,
    registry: &mut PositionRegistry,
    stages: &[StageSpec],
    last_data_time: &mut Option<i64>,
    wait_count: &mut u32,
    last_can_trade: &mut Option<bool>,
) -> Result<bool, BotError> {
    let can_trade = broker.can_trade().await;
    if *last_can_trade == Some(true) && !can_trade {
        log_ctx!(info, "trading hours ended, resetting detector state");
        state.reset();
    }
    *last_can_trade = Some(can_trade);

    if !can_trade {
        return Ok(true);
    }

    let bars = broker
        .get_historical_data(config::SYMBOL, config::WINDOW_SIZE * 2)
        .await
        .map_err(BotError::from)?;
    if bars.len() < 2 {
        return Err(BotError::Unexpected("not enough bars in window".to_string()));
    }

    let current_time = bars.last().unwrap().timestamp;
    let process_data = match *last_data_time {
        None => {
            *last_data_time = Some(current_time);
            *wait_count = 0;
            true
        }
        Some(t) if t != current_time => {
            *last_data_time = Some(current_time);
            *wait_count = 0;
            true
        }
        _ => {
            *wait_count += 1;
            if *wait_count >= config::MAX_WAIT_CYCLES {
                log_ctx!(warn, "forcing processing after {} idle cycles", wait_count);
                *wait_count = 0;
                true
            } else {
                false
            }
        }
    };

    if process_data {
        run_detector_stack(broker, telemetry, state, &bars).await?;
    }

    registry
        .manage(
            broker,
            config::SYMBOL,
            stages,
            config::COMMISSION_PER_LOT,
            config::COMMISSION_BUFFER_R,
            config::BASE_TP_R,
            telemetry,
        )
        .await
        .map_err(BotError::Unexpected)?;

    Ok(false)
}

async fn run_detector_stack<B: BrokerAdapter + ?Sized>(
    broker: &B,
    telemetry: &Telemetry,
    state: &mut BotState,
    bars: &[Bar],
) -> Result<(), BotError> {
    let info = broker.symbol_info(config::SYMBOL).await.map_err(BotError::from)?;
    let threshold = config::THRESHOLD_PIPS * info.pip_size();

    let legs = leg_detector::detect_legs(bars, threshold);
    let swing = swing::classify_swing(&legs);
    let closed_bar = &bars[bars.len() - 2];

    fib_state::update(state, &legs, swing, closed_bar);

    if state.is_confirmed() {
        signal_emitter::try_emit(state, broker, telemetry, config::SYMBOL, config::WIN_RATIO).await;
    }

    Ok(())
}

/// Waits for SIGINT (and SIGTERM on unix); used by the binary's shutdown path.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Convenience re-export for the main loop's idle/session-gate sleep durations.
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);
pub const SESSION_CLOSED_SLEEP: Duration = Duration::from_secs(60);
pub const TICK_ERROR_COOLDOWN: Duration = Duration::from_secs(5);
