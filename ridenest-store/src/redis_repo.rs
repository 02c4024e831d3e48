use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use ridenest_core::{Rating, RatingRepository, Ride, RideRepository, StoreError};
use tracing::{debug, info};
use uuid::Uuid;

const RIDE_INDEX_KEY: &str = "rides";

// KEYS[1] = ride hash, KEYS[2] = ride index; ARGV = version, doc, ride id
const INSERT_RIDE_SCRIPT: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 1 then
        return 0
    end
    redis.call("HSET", KEYS[1], "version", ARGV[1], "doc", ARGV[2])
    redis.call("SADD", KEYS[2], ARGV[3])
    return 1
"#;

// KEYS[1] = ride hash; ARGV = expected version, new version, doc
// Returns 1 on success, 0 on version mismatch, -1 when the ride is gone.
const CAS_RIDE_SCRIPT: &str = r#"
    local current = redis.call("HGET", KEYS[1], "version")
    if not current then
        return -1
    end
    if current ~= ARGV[1] then
        return 0
    end
    redis.call("HSET", KEYS[1], "version", ARGV[2], "doc", ARGV[3])
    return 1
"#;

// KEYS[1] = rating hash; ARGV[1] = score
const RECORD_RATING_SCRIPT: &str = r#"
    local average = tonumber(redis.call("HGET", KEYS[1], "average") or "0")
    local count = tonumber(redis.call("HGET", KEYS[1], "count") or "0")
    local next_count = count + 1
    local next_average = (average * count + tonumber(ARGV[1])) / next_count
    redis.call("HSET", KEYS[1], "average", tostring(next_average), "count", next_count)
    return {tostring(next_average), next_count}
"#;

fn ride_key(id: Uuid) -> String {
    format!("ride:{}", id)
}

fn rating_key(user_id: &str) -> String {
    format!("rating:{}", user_id)
}

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Redis-backed ride documents, ratings and the request rate limiter.
///
/// Each ride lives in a hash `ride:{id}` with two fields, `version` and `doc` (JSON),
/// so the version check and the document write happen in one Lua script.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)
    }

    /// Fixed-window counter per key. Returns `false` once the window is exhausted.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }
}

#[async_trait]
impl RideRepository for RedisClient {
    async fn insert(&self, ride: &Ride) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let doc = serde_json::to_string(ride)?;

        let script = redis::Script::new(INSERT_RIDE_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(ride_key(ride.id))
            .key(RIDE_INDEX_KEY)
            .arg(ride.version)
            .arg(doc)
            .arg(ride.id.to_string());

        let created: i64 = invocation.invoke_async(&mut conn).await.map_err(backend)?;
        if created == 0 {
            return Err(StoreError::AlreadyExists(ride.id));
        }

        info!("Ride stored: {}", ride.id);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Ride>, StoreError> {
        let mut conn = self.connection().await?;
        let doc: Option<String> = conn.hget(ride_key(id), "doc").await.map_err(backend)?;

        match doc {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Ride>, StoreError> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.smembers(RIDE_INDEX_KEY).await.map_err(backend)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hget(format!("ride:{}", id), "doc");
        }
        let docs: Vec<Option<String>> = pipe.query_async(&mut conn).await.map_err(backend)?;

        let mut rides = Vec::with_capacity(docs.len());
        for doc in docs.into_iter().flatten() {
            rides.push(serde_json::from_str(&doc)?);
        }
        Ok(rides)
    }

    async fn compare_and_swap(&self, ride: &Ride, expected_version: u64) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let doc = serde_json::to_string(ride)?;

        let script = redis::Script::new(CAS_RIDE_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(ride_key(ride.id))
            .arg(expected_version)
            .arg(ride.version)
            .arg(doc);

        let outcome: i64 = invocation.invoke_async(&mut conn).await.map_err(backend)?;
        match outcome {
            1 => Ok(()),
            0 => {
                debug!("CAS conflict on ride {} at version {}", ride.id, expected_version);
                Err(StoreError::Conflict {
                    ride_id: ride.id,
                    expected: expected_version,
                })
            }
            _ => Err(StoreError::NotFound(ride.id)),
        }
    }
}

#[async_trait]
impl RatingRepository for RedisClient {
    async fn get_rating(&self, user_id: &str) -> Result<Rating, StoreError> {
        let mut conn = self.connection().await?;
        let (average, count): (Option<f64>, Option<u64>) = redis::cmd("HMGET")
            .arg(rating_key(user_id))
            .arg("average")
            .arg("count")
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(Rating {
            average: average.unwrap_or(0.0),
            count: count.unwrap_or(0),
        })
    }

    async fn record_rating(&self, user_id: &str, score: u8) -> Result<Rating, StoreError> {
        let mut conn = self.connection().await?;

        let script = redis::Script::new(RECORD_RATING_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation.key(rating_key(user_id)).arg(score);

        let (average, count): (String, u64) = invocation.invoke_async(&mut conn).await.map_err(backend)?;
        let average = average
            .parse::<f64>()
            .map_err(|e| StoreError::Serialization(format!("rating average {}: {}", average, e)))?;

        Ok(Rating { average, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        assert_eq!(ride_key(id), "ride:00000000-0000-0000-0000-000000000000");
        assert_eq!(rating_key("driver-7"), "rating:driver-7");
    }

    #[tokio::test]
    async fn test_rejects_malformed_url() {
        assert!(RedisClient::new("not a url").await.is_err());
    }
}
