use crate::traits::KvStore;
use aiops_common::{Error, Result};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::{AsyncCommands, Script};

/// Redis-backed approval/KV store. `cas` is implemented as a Lua script so
/// the compare-and-swap is atomic against concurrent replies, the same
/// discipline this repo's leader-election/redis helpers already rely on.
pub struct RedisKvStore {
    pool: Pool,
}

impl RedisKvStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| Error::TransientExternal(format!("failed to build redis pool: {err}")))?;
        {
            let mut conn = pool.get().await.map_err(|err| Error::TransientExternal(err.to_string()))?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        }
        Ok(Self { pool })
    }
}

const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    return 1
else
    return 0
end
"#;

#[async_trait]
impl KvStore for RedisKvStore {
    async fn setex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|err| Error::TransientExternal(err.to_string()))?;
        let _: () = conn.set_ex(key, value, ttl_seconds).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await.map_err(|err| Error::TransientExternal(err.to_string()))?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await.map_err(|err| Error::TransientExternal(err.to_string()))?;
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) =
                redis::cmd("SCAN").arg(cursor).arg("MATCH").arg(&pattern).arg("COUNT").arg(100).query_async(&mut conn).await?;
            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(keys)
    }

    async fn cas(&self, key: &str, expected: &str, new: &str, ttl_seconds: u64) -> Result<bool> {
        let mut conn = self.pool.get().await.map_err(|err| Error::TransientExternal(err.to_string()))?;
        let result: i32 = Script::new(CAS_SCRIPT)
            .key(key)
            .arg(expected)
            .arg(new)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|err| Error::TransientExternal(err.to_string()))?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
