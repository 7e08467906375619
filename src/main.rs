use std::time::Duration;

use fib_swing_bot::broker::{BrokerAdapter, HttpBrokerAdapter};
use fib_swing_bot::risk_manager::PositionRegistry;
use fib_swing_bot::telemetry::{EmailWebhookSink, LogSink, Telemetry, TelemetrySink};
use fib_swing_bot::types::BotState;
use fib_swing_bot::{config, log_ctx, run_tick, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let bridge_url = std::env::var("BROKER_BRIDGE_URL").unwrap_or_else(|_| config::BROKER_BRIDGE_URL_DEFAULT.to_string());
    let broker = HttpBrokerAdapter::new(bridge_url);
    broker.initialize().await.map_err(|e| format!("broker initialize failed: {}", e))?;

    let mut sinks: Vec<Box<dyn TelemetrySink>> = vec![Box::new(LogSink)];
    if let Ok(webhook) = std::env::var("EMAIL_WEBHOOK_URL") {
        sinks.push(Box::new(EmailWebhookSink::new(webhook)));
    }
    let telemetry = Telemetry::spawn(sinks);

    log_ctx!(
        info,
        "starting symbol={} lot={} win_ratio={}",
        config::SYMBOL,
        config::LOT_SIZE,
        config::WIN_RATIO
    );

    let mut state = BotState::default();
    let mut registry = PositionRegistry::new();
    let stages = config::stage_schedule();

    let mut last_data_time: Option<i64> = None;
    let mut wait_count: u32 = 0;
    let mut last_can_trade: Option<bool> = None;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_signal() => {
                log_ctx!(info, "shutdown signal received, closing positions");
                let _ = broker.close_all_positions(config::SYMBOL).await;
                broker.shutdown().await;
                break;
            }
            result = run_tick(&broker, &telemetry, &mut state, &mut registry, &stages, &mut last_data_time, &mut wait_count, &mut last_can_trade) => {
                match result {
                    Ok(session_closed) => {
                        tokio::time::sleep(if session_closed { Duration::from_secs(60) } else { Duration::from_millis(500) }).await;
                    }
                    Err(e) => {
                        log_ctx!(error, "tick error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    Ok(())
}
