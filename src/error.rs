use thiserror::Error;

/// Top-level error surfaced from one tick of the main loop. The loop treats
/// every variant the same way: log full context, cool down 5s, leave
/// detector state untouched.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("broker error: {0}")]
    Broker(#[from] crate::broker::BrokerError),

    #[error("signal guard rejected: {0}")]
    InvalidSignal(String),

    #[error("telemetry failure: {0}")]
    Telemetry(String),

    #[error("unexpected tick error: {0}")]
    Unexpected(String),
}
