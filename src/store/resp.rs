//! RESP Network Store
//!
//! [`RespStore`] talks to a Redis-compatible server over a single connection.
//! Writes queued on a [`Pipeline`] go out in one write and their replies are
//! read back in order, so a batch of `SETBIT`s costs one round trip.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! connect() / from_stream()
//!        │
//!        ▼
//! ┌────────────────────────────┐
//! │  healthy                   │◄──── error replies (-ERR ...) keep the
//! │  write batch → read N      │      connection in sync
//! └─────────────┬──────────────┘
//!               │ i/o error, bad bytes, timeout, EOF
//!               ▼
//! ┌────────────────────────────┐
//! │  broken: every call fails  │
//! │  with StoreError::Disconnected
//! └────────────────────────────┘
//! ```
//!
//! A failed transport leaves replies of unknown length in flight, so the
//! connection is never reused after one. Reconnecting is left to the caller.

use crate::protocol::{parse_reply, RespValue};
use crate::store::{BitStore, Pipeline, StoreError, StoreResult, REDIS_MAX_BITS};
use bytes::{Buf, BytesMut};
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Connection settings for [`RespStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespStoreConfig {
    /// `host:port` of the server
    pub addr: String,
    /// Limit for establishing the TCP connection
    pub connect_timeout: Duration,
    /// Limit for one round trip (write batch + read all replies)
    pub io_timeout: Duration,
    /// Bits addressable under one key on the server
    pub max_bits: u64,
}

impl Default for RespStoreConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
            max_bits: REDIS_MAX_BITS,
        }
    }
}

impl RespStoreConfig {
    /// Builds a configuration from the environment.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `SHARDBITS_ADDR` | `addr` |
    /// | `SHARDBITS_CONNECT_TIMEOUT_MS` | `connect_timeout` |
    /// | `SHARDBITS_IO_TIMEOUT_MS` | `io_timeout` |
    /// | `SHARDBITS_MAX_BITS` | `max_bits` |
    ///
    /// Unset variables keep their default. Unparsable values are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let max_bits = match parse_var(&lookup, "SHARDBITS_MAX_BITS") {
            Some(0) => {
                warn!("SHARDBITS_MAX_BITS must be positive, using default");
                defaults.max_bits
            }
            Some(bits) => bits,
            None => defaults.max_bits,
        };

        Self {
            addr: lookup("SHARDBITS_ADDR").unwrap_or(defaults.addr),
            connect_timeout: parse_var(&lookup, "SHARDBITS_CONNECT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            io_timeout: parse_var(&lookup, "SHARDBITS_IO_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.io_timeout),
            max_bits,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

/// One RESP connection with its read buffer.
struct Connection<S> {
    stream: S,
    buffer: BytesMut,
    broken: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Writes all requests at once, then reads exactly one reply per request.
    async fn exchange(&mut self, requests: &[RespValue]) -> StoreResult<Vec<RespValue>> {
        let mut out = Vec::new();
        for request in requests {
            request.serialize_into(&mut out);
        }
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        trace!(requests = requests.len(), bytes = out.len(), "sent batch");

        let mut replies = Vec::with_capacity(requests.len());
        while replies.len() < requests.len() {
            if let Some((reply, consumed)) = parse_reply(&self.buffer)? {
                self.buffer.advance(consumed);
                replies.push(reply);
                continue;
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                debug!("server closed the connection");
                return Err(StoreError::Disconnected);
            }
        }
        Ok(replies)
    }
}

/// A [`BitStore`] backed by a Redis-compatible server.
///
/// # Example
///
/// ```ignore
/// use shardbits::{RespStore, RespStoreConfig, ShardedBitSet};
/// use std::sync::Arc;
///
/// let store = Arc::new(RespStore::connect(RespStoreConfig::from_env()).await?);
/// let bits = ShardedBitSet::new("visitors", 10_000_000_000, store);
/// bits.set(&[17, 4_294_967_296]).await?;
/// assert!(bits.test(&[17, 4_294_967_296]).await?);
/// ```
pub struct RespStore<S = TcpStream> {
    conn: Mutex<Connection<S>>,
    io_timeout: Duration,
    max_bits: u64,
}

impl<S> std::fmt::Debug for RespStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespStore")
            .field("io_timeout", &self.io_timeout)
            .field("max_bits", &self.max_bits)
            .finish()
    }
}

impl RespStore<TcpStream> {
    /// Opens a TCP connection to `config.addr`.
    pub async fn connect(config: RespStoreConfig) -> StoreResult<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(&config.addr))
            .await
            .map_err(|_| StoreError::Timeout(config.connect_timeout))??;
        stream.set_nodelay(true)?;

        info!(addr = %config.addr, "Connected to store");
        Ok(Self::from_stream(stream, &config))
    }
}

impl<S> RespStore<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an already established stream. `config.addr` and
    /// `config.connect_timeout` are not used.
    ///
    /// # Panics
    ///
    /// Panics if `config.max_bits` is zero.
    pub fn from_stream(stream: S, config: &RespStoreConfig) -> Self {
        assert!(config.max_bits > 0, "max_bits must be positive");

        Self {
            conn: Mutex::new(Connection {
                stream,
                buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
                broken: false,
            }),
            io_timeout: config.io_timeout,
            max_bits: config.max_bits,
        }
    }

    /// Returns true once a transport failure has made the connection unusable.
    pub async fn is_broken(&self) -> bool {
        self.conn.lock().await.broken
    }

    /// Sends a batch of requests and returns one reply per request.
    async fn round_trip(&self, requests: &[RespValue]) -> StoreResult<Vec<RespValue>> {
        let mut conn = self.conn.lock().await;
        if conn.broken {
            return Err(StoreError::Disconnected);
        }

        // Stays set if this future is dropped mid-exchange: the request may
        // already be on the wire and its reply would pair with the next one.
        conn.broken = true;
        let result = match timeout(self.io_timeout, conn.exchange(requests)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.io_timeout)),
        };

        match &result {
            Ok(_) => conn.broken = false,
            Err(e) => warn!(error = %e, "store connection failed, marking it broken"),
        }
        result
    }
}

/// Interprets a reply that should be an integer.
fn integer_reply(reply: RespValue) -> StoreResult<i64> {
    match reply {
        RespValue::Integer(n) => Ok(n),
        RespValue::Error(msg) => Err(StoreError::Server(msg)),
        other => Err(StoreError::UnexpectedReply(format!(
            "expected integer, got {}",
            other.kind()
        ))),
    }
}

impl<S> BitStore for RespStore<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn max_bits(&self) -> u64 {
        self.max_bits
    }

    async fn get_bit(&self, key: &str, offset: u64) -> StoreResult<bool> {
        let request = RespValue::command(["GETBIT", key, offset.to_string().as_str()]);
        let reply = self
            .round_trip(std::slice::from_ref(&request))
            .await?
            .pop()
            .ok_or(StoreError::Disconnected)?;

        match integer_reply(reply)? {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(StoreError::UnexpectedReply(format!(
                "GETBIT returned {}",
                n
            ))),
        }
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let args = std::iter::once("DEL").chain(keys.iter().map(String::as_str));
        let request = RespValue::command(args);
        let reply = self
            .round_trip(std::slice::from_ref(&request))
            .await?
            .pop()
            .ok_or(StoreError::Disconnected)?;

        let deleted = integer_reply(reply)?;
        u64::try_from(deleted)
            .map_err(|_| StoreError::UnexpectedReply(format!("DEL returned {}", deleted)))
    }

    async fn flush(&self, pipeline: Pipeline) -> StoreResult<Vec<i64>> {
        if pipeline.is_empty() {
            return Ok(Vec::new());
        }

        let requests: Vec<RespValue> = pipeline.commands().iter().map(|c| c.to_resp()).collect();
        let replies = self.round_trip(&requests).await?;

        let mut values = Vec::with_capacity(replies.len());
        let mut first_error = None;
        for (reply, command) in replies.into_iter().zip(pipeline.commands()) {
            match integer_reply(reply) {
                Ok(value) => values.push(value),
                Err(e) => {
                    warn!(key = command.key(), error = %e, "pipelined command failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_defaults() {
        let config = RespStoreConfig::from_lookup(|_| None);
        assert_eq!(config, RespStoreConfig::default());
        assert_eq!(config.max_bits, 4_294_967_296);
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("SHARDBITS_ADDR", "redis.internal:6380"),
            ("SHARDBITS_IO_TIMEOUT_MS", "250"),
            ("SHARDBITS_CONNECT_TIMEOUT_MS", "not-a-number"),
            ("SHARDBITS_MAX_BITS", "1024"),
        ]
        .into_iter()
        .collect();

        let config = RespStoreConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.addr, "redis.internal:6380");
        assert_eq!(config.io_timeout, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.max_bits, 1024);
    }

    #[test]
    fn test_config_rejects_zero_width() {
        let config = RespStoreConfig::from_lookup(|name| {
            (name == "SHARDBITS_MAX_BITS").then(|| "0".to_string())
        });
        assert_eq!(config.max_bits, REDIS_MAX_BITS);
    }

    #[test]
    fn test_integer_reply() {
        assert_eq!(integer_reply(RespValue::Integer(3)).unwrap(), 3);
        assert!(matches!(
            integer_reply(RespValue::Error("ERR boom".to_string())),
            Err(StoreError::Server(msg)) if msg == "ERR boom"
        ));
        assert!(matches!(
            integer_reply(RespValue::Null),
            Err(StoreError::UnexpectedReply(_))
        ));
    }
}
