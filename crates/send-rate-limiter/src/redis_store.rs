//! Redis-backed counter store.
//!
//! Reservation runs as one server-side Lua script so check-and-increment is
//! a single atomic round trip; Redis executes scripts single-threaded, which
//! eliminates the read-then-write over-admission race across dispatcher
//! instances.

use crate::{CounterError, CounterResult, CounterStore, WindowReservation};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use tracing::debug;

/// Checks every window against its ceiling, and only if all have headroom
/// increments each and refreshes its TTL. ARGV carries (limit, ttl_secs)
/// pairs aligned with KEYS.
const RESERVE_SCRIPT: &str = r#"
for i = 1, #KEYS do
    local current = tonumber(redis.call('GET', KEYS[i]) or '0')
    local limit = tonumber(ARGV[2 * i - 1])
    if current >= limit then
        return 0
    end
end
for i = 1, #KEYS do
    redis.call('INCR', KEYS[i])
    redis.call('EXPIRE', KEYS[i], ARGV[2 * i])
end
return 1
"#;

/// Redis counter store over a multiplexed async connection.
pub struct RedisCounterStore {
    conn: MultiplexedConnection,
    reserve_script: Script,
}

impl RedisCounterStore {
    /// Connect to Redis at the given URL.
    pub async fn connect(redis_url: &str) -> CounterResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!(url = %redis_url, "Connected counter store to Redis");
        Ok(Self {
            conn,
            reserve_script: Script::new(RESERVE_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn reserve(&self, windows: &[WindowReservation]) -> CounterResult<bool> {
        if windows.is_empty() {
            return Ok(true);
        }

        let mut invocation = self.reserve_script.prepare_invoke();
        for window in windows {
            invocation.key(window.key.as_str());
        }
        for window in windows {
            invocation.arg(window.limit).arg(window.ttl.as_secs());
        }

        let admitted: i64 = invocation.invoke_async(&mut self.conn.clone()).await?;
        match admitted {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CounterError::Unavailable(format!(
                "reserve script returned unexpected value: {other}"
            ))),
        }
    }

    async fn get(&self, key: &str) -> CounterResult<u64> {
        let count: Option<u64> = self.conn.clone().get(key).await?;
        Ok(count.unwrap_or(0))
    }
}
