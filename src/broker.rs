//! Broker adapter: a narrow async trait plus an HTTP-bridge implementation.
//!
//! MT5 has no native Rust SDK, so the common pattern is a small REST shim
//! the terminal's Expert Advisor exposes locally; `HttpBrokerAdapter` talks
//! to that shim, including its retry/backoff/error-classification shape.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::types::{Bar, BrokerPosition, OrderIntent, OrderSide, SymbolInfo, Tick};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug)]
pub enum BrokerError {
    /// Rate limited by the bridge or terminal. `retry_after` in seconds.
    RateLimit { retry_after: u64 },
    /// Network error, timeout, HTTP 5xx, or a terminal-busy retcode.
    Transient(String),
    /// Invalid params, rejected order, or any other non-retryable failure.
    Permanent(String),
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::RateLimit { retry_after } => write!(f, "rate limited (retry after {}s)", retry_after),
            BrokerError::Transient(msg) => write!(f, "transient error: {}", msg),
            BrokerError::Permanent(msg) => write!(f, "permanent error: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}

/// MT5's success retcode for trade requests.
pub const RETCODE_DONE: i64 = 10009;

/// MT5 retcodes the bridge can hand back that are worth retrying rather
/// than surfacing straight to the caller.
const RETCODE_REQUOTE: i64 = 10004;
const RETCODE_TRADE_CONTEXT_BUSY: i64 = 10018;
const RETCODE_PRICE_CHANGED: i64 = 10021;

impl BrokerError {
    /// Folds the bridge's retcode/HTTP-status pair into an error the retry
    /// loop can act on. A requote or an HTTP 429 asks for a short, fixed
    /// cooldown; a busy trade context, a stale price, or a 5xx is treated as
    /// transient; everything else is final.
    fn from_response(retcode: i64, http_status: u16, msg: &str) -> Self {
        if retcode == RETCODE_REQUOTE || http_status == 429 {
            BrokerError::RateLimit { retry_after: 3 }
        } else if retcode == RETCODE_TRADE_CONTEXT_BUSY || retcode == RETCODE_PRICE_CHANGED || http_status >= 500 {
            BrokerError::Transient(msg.to_string())
        } else {
            BrokerError::Permanent(format!("retcode={} msg={}", retcode, msg))
        }
    }
}

/// Retries a fallible broker call with a backoff that grows linearly with
/// the attempt count rather than doubling, capped at `CAP_SECS`; a
/// rate-limit response's own `retry_after` always overrides the curve.
/// Permanent errors never retry.
async fn with_retry<F, Fut, T>(operation: F, max_retries: u32) -> Result<T, BrokerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    const BASE_SECS: u64 = 2;
    const CAP_SECS: u64 = 20;

    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(r) => return Ok(r),
            Err(e @ BrokerError::Permanent(_)) => return Err(e),
            Err(e) => e,
        };
        if attempt >= max_retries {
            return Err(err);
        }
        let wait = match &err {
            BrokerError::RateLimit { retry_after } => *retry_after,
            _ => (BASE_SECS * (attempt as u64 + 1)).min(CAP_SECS),
        };
        log::warn!("broker call failed: {} — retrying in {}s (attempt {}/{})", err, wait, attempt + 1, max_retries);
        tokio::time::sleep(Duration::from_secs(wait)).await;
        attempt += 1;
    }
}

/// Narrow interface C1–C6 are written against; `HttpBrokerAdapter` and
/// `MockBrokerAdapter` are its only implementations.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn initialize(&self) -> Result<(), BrokerError>;
    async fn shutdown(&self);
    async fn can_trade(&self) -> bool;
    async fn get_historical_data(&self, symbol: &str, count: usize) -> Result<Vec<Bar>, BrokerError>;
    async fn get_positions(&self, symbol: &str) -> Result<Vec<BrokerPosition>, BrokerError>;
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError>;
    async fn symbol_info_tick(&self, symbol: &str) -> Result<Tick, BrokerError>;
    async fn open_buy_position(&self, intent: &OrderIntent) -> Result<u64, BrokerError>;
    async fn open_sell_position(&self, intent: &OrderIntent) -> Result<u64, BrokerError>;
    async fn modify_sl_tp(&self, ticket: u64, sl: f64, tp: f64) -> Result<(), BrokerError>;
    async fn close_all_positions(&self, symbol: &str) -> Result<(), BrokerError>;
}

#[derive(Clone)]
pub struct HttpBrokerAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl HttpBrokerAdapter {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("HTTP client build failed");

        let api_key = std::env::var("BROKER_API_KEY").unwrap_or_default();
        let api_secret = std::env::var("BROKER_SECRET").unwrap_or_default();

        HttpBrokerAdapter { client, base_url, api_key, api_secret }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
    }

    fn signed_headers(&self, body: &str) -> reqwest::header::HeaderMap {
        let ts = Self::timestamp_ms().to_string();
        let payload = format!("{}{}{}", ts, self.api_key, body);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).expect("HMAC init failed");
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-BRIDGE-API-KEY", self.api_key.parse().unwrap());
        headers.insert("X-BRIDGE-TIMESTAMP", ts.parse().unwrap());
        headers.insert("X-BRIDGE-SIGN", signature.parse().unwrap());
        headers.insert(reqwest::header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers
    }

    async fn post_raw(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, BrokerError> {
        let body = body.to_string();
        let url = format!("{}{}", self.base_url, path);
        let headers = self.signed_headers(&body);

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| BrokerError::Transient(format!("HTTP error: {}", e)))?;

        let http_status = resp.status().as_u16();
        let json: serde_json::Value =
            resp.json().await.map_err(|e| BrokerError::Transient(format!("parse error: {}", e)))?;

        let retcode = json["retcode"].as_i64().unwrap_or(RETCODE_DONE);
        if retcode == RETCODE_DONE {
            Ok(json)
        } else {
            let msg = json["comment"].as_str().unwrap_or("unknown");
            Err(BrokerError::from_response(retcode, http_status, msg))
        }
    }

    async fn get_raw(&self, path: &str) -> Result<serde_json::Value, BrokerError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BrokerError::Transient(format!("HTTP error: {}", e)))?;
        let http_status = resp.status().as_u16();
        let json: serde_json::Value =
            resp.json().await.map_err(|e| BrokerError::Transient(format!("parse error: {}", e)))?;
        if http_status >= 400 {
            let msg = json["comment"].as_str().unwrap_or("unknown");
            return Err(BrokerError::from_response(-1, http_status, msg));
        }
        Ok(json)
    }

    async fn place_order_raw(&self, intent: &OrderIntent, side: &str) -> Result<u64, BrokerError> {
        let body = serde_json::json!({
            "symbol":  intent.symbol,
            "side":    side,
            "type":    "Market",
            "sl":      intent.sl,
            "tp":      intent.tp,
            "comment": intent.comment,
        });
        let json = self.post_raw("/order/send", body).await?;
        json["order"].as_u64().ok_or_else(|| BrokerError::Transient("missing order ticket".into()))
    }
}

#[async_trait]
impl BrokerAdapter for HttpBrokerAdapter {
    async fn initialize(&self) -> Result<(), BrokerError> {
        self.get_raw("/terminal/info").await.map(|_| ())
    }

    async fn shutdown(&self) {
        let _ = self.get_raw("/terminal/shutdown").await;
    }

    async fn can_trade(&self) -> bool {
        matches!(self.get_raw("/terminal/info").await, Ok(v) if v["trade_allowed"].as_bool().unwrap_or(false))
    }

    async fn get_historical_data(&self, symbol: &str, count: usize) -> Result<Vec<Bar>, BrokerError> {
        let s = self.clone();
        let sym = symbol.to_string();
        with_retry(
            || {
                let s = s.clone();
                let sym = sym.clone();
                async move {
                    let json = s.get_raw(&format!("/rates?symbol={}&count={}", sym, count)).await?;
                    let list = json["rates"]
                        .as_array()
                        .ok_or_else(|| BrokerError::Transient("missing rates list".into()))?;
                    let bars = list
                        .iter()
                        .filter_map(|row| {
                            Some(Bar {
                                timestamp: row["time"].as_i64()?,
                                open: row["open"].as_f64()?,
                                high: row["high"].as_f64()?,
                                low: row["low"].as_f64()?,
                                close: row["close"].as_f64()?,
                            })
                        })
                        .collect();
                    Ok(bars)
                }
            },
            3,
        )
        .await
    }

    async fn get_positions(&self, symbol: &str) -> Result<Vec<BrokerPosition>, BrokerError> {
        let json = self.get_raw(&format!("/positions?symbol={}", symbol)).await?;
        let list = json["positions"].as_array().cloned().unwrap_or_default();
        Ok(list
            .iter()
            .filter_map(|p| {
                Some(BrokerPosition {
                    ticket: p["ticket"].as_u64()?,
                    side: if p["type"].as_str()? == "buy" { OrderSide::Buy } else { OrderSide::Sell },
                    price_open: p["price_open"].as_f64()?,
                    sl: p["sl"].as_f64().unwrap_or(0.0),
                    tp: p["tp"].as_f64().unwrap_or(0.0),
                    volume: p["volume"].as_f64()?,
                })
            })
            .collect())
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError> {
        let json = self.get_raw(&format!("/symbol_info?symbol={}", symbol)).await?;
        Ok(SymbolInfo {
            point: json["point"].as_f64().unwrap_or(0.0001),
            digits: json["digits"].as_u64().unwrap_or(5) as u32,
            trade_stops_level: json["trade_stops_level"].as_f64().unwrap_or(0.0),
            trade_tick_value: json["trade_tick_value"].as_f64().unwrap_or(1.0),
        })
    }

    async fn symbol_info_tick(&self, symbol: &str) -> Result<Tick, BrokerError> {
        let json = self.get_raw(&format!("/tick?symbol={}", symbol)).await?;
        Ok(Tick {
            bid: json["bid"].as_f64().ok_or_else(|| BrokerError::Transient("missing bid".into()))?,
            ask: json["ask"].as_f64().ok_or_else(|| BrokerError::Transient("missing ask".into()))?,
        })
    }

    async fn open_buy_position(&self, intent: &OrderIntent) -> Result<u64, BrokerError> {
        let s = self.clone();
        let intent = intent.clone();
        with_retry(|| { let s = s.clone(); let intent = intent.clone(); async move { s.place_order_raw(&intent, "buy").await } }, 2).await
    }

    async fn open_sell_position(&self, intent: &OrderIntent) -> Result<u64, BrokerError> {
        let s = self.clone();
        let intent = intent.clone();
        with_retry(|| { let s = s.clone(); let intent = intent.clone(); async move { s.place_order_raw(&intent, "sell").await } }, 2).await
    }

    async fn modify_sl_tp(&self, ticket: u64, sl: f64, tp: f64) -> Result<(), BrokerError> {
        let body = serde_json::json!({ "ticket": ticket, "sl": sl, "tp": tp });
        self.post_raw("/order/modify", body).await.map(|_| ())
    }

    async fn close_all_positions(&self, symbol: &str) -> Result<(), BrokerError> {
        self.post_raw("/positions/close_all", serde_json::json!({ "symbol": symbol })).await.map(|_| ())
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// In-memory fixture adapter used by the scenario test suite.
    pub struct MockBrokerAdapter {
        pub bars: Mutex<Vec<Bar>>,
        pub positions: Mutex<Vec<BrokerPosition>>,
        pub symbol: SymbolInfo,
        pub tick: Mutex<Tick>,
        pub trade_allowed: Mutex<bool>,
        pub next_ticket: Mutex<u64>,
    }

    impl MockBrokerAdapter {
        pub fn new(bars: Vec<Bar>, symbol: SymbolInfo, tick: Tick) -> Self {
            MockBrokerAdapter {
                bars: Mutex::new(bars),
                positions: Mutex::new(Vec::new()),
                symbol,
                tick: Mutex::new(tick),
                trade_allowed: Mutex::new(true),
                next_ticket: Mutex::new(1),
            }
        }
    }

    #[async_trait]
    impl BrokerAdapter for MockBrokerAdapter {
        async fn initialize(&self) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn shutdown(&self) {}
        async fn can_trade(&self) -> bool {
            *self.trade_allowed.lock().unwrap()
        }
        async fn get_historical_data(&self, _symbol: &str, count: usize) -> Result<Vec<Bar>, BrokerError> {
            let bars = self.bars.lock().unwrap();
            let start = bars.len().saturating_sub(count);
            Ok(bars[start..].to_vec())
        }
        async fn get_positions(&self, _symbol: &str) -> Result<Vec<BrokerPosition>, BrokerError> {
            Ok(self.positions.lock().unwrap().clone())
        }
        async fn symbol_info(&self, _symbol: &str) -> Result<SymbolInfo, BrokerError> {
            Ok(self.symbol)
        }
        async fn symbol_info_tick(&self, _symbol: &str) -> Result<Tick, BrokerError> {
            Ok(*self.tick.lock().unwrap())
        }
        async fn open_buy_position(&self, intent: &OrderIntent) -> Result<u64, BrokerError> {
            let mut next = self.next_ticket.lock().unwrap();
            let ticket = *next;
            *next += 1;
            self.positions.lock().unwrap().push(BrokerPosition {
                ticket,
                side: OrderSide::Buy,
                price_open: intent.entry,
                sl: intent.sl,
                tp: intent.tp,
                volume: crate::config::LOT_SIZE,
            });
            Ok(ticket)
        }
        async fn open_sell_position(&self, intent: &OrderIntent) -> Result<u64, BrokerError> {
            let mut next = self.next_ticket.lock().unwrap();
            let ticket = *next;
            *next += 1;
            self.positions.lock().unwrap().push(BrokerPosition {
                ticket,
                side: OrderSide::Sell,
                price_open: intent.entry,
                sl: intent.sl,
                tp: intent.tp,
                volume: crate::config::LOT_SIZE,
            });
            Ok(ticket)
        }
        async fn modify_sl_tp(&self, ticket: u64, sl: f64, tp: f64) -> Result<(), BrokerError> {
            let mut positions = self.positions.lock().unwrap();
            if let Some(p) = positions.iter_mut().find(|p| p.ticket == ticket) {
                p.sl = sl;
                p.tp = tp;
            }
            Ok(())
        }
        async fn close_all_positions(&self, _symbol: &str) -> Result<(), BrokerError> {
            self.positions.lock().unwrap().clear();
            Ok(())
        }
    }
}
