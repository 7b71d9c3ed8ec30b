use std::fmt::Display;
use std::future::Future;

use redis::AsyncCommands;
use redis::Client;
use tokio::sync::mpsc;

use crate::error::AppResult;

/// Cache keys are deterministic functions of operation identity and
/// normalized arguments, so semantically identical requests collapse to one
/// entry regardless of argument ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Search {
        query: String,
        kind: &'static str,
        limit: u32,
    },
    Track(String),
    Artist(String),
    AudioFeatures(String),
    Recommendations {
        /// Comma-joined, sorted seed ids
        seeds: String,
        limit: u32,
    },
}

impl CacheKey {
    pub fn search(query: &str, kind: &'static str, limit: u32) -> Self {
        CacheKey::Search {
            query: query.to_string(),
            kind,
            limit,
        }
    }

    /// Normalizes the seed lists by sorting before joining, so the same seed
    /// combination always maps to the same entry.
    pub fn recommendations(seeds: &[&str], limit: u32) -> Self {
        let mut sorted: Vec<&str> = seeds.to_vec();
        sorted.sort_unstable();
        CacheKey::Recommendations {
            seeds: sorted.join(","),
            limit,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Search { query, kind, limit } => {
                write!(f, "search:{}:{}:{}", kind, limit, query.to_lowercase())
            }
            CacheKey::Track(id) => write!(f, "track:{}", id),
            CacheKey::Artist(id) => write!(f, "artist:{}", id),
            CacheKey::AudioFeatures(id) => write!(f, "audio_feature:{}", id),
            CacheKey::Recommendations { seeds, limit } => {
                write!(f, "recommendations:{}:{}", seeds, limit)
            }
        }
    }
}

/// Creates a Redis client for caching
///
/// Establishes a connection to Redis for fast data caching.
/// Uses connection pooling via the connection-manager feature.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
}

/// Read-through / write-behind cache wrapper around idempotent lookups.
///
/// The cache is best-effort and never a hard dependency: any store failure on
/// the read or write path degrades to invoking the underlying operation
/// directly.
#[derive(Clone)]
pub struct Cache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    /// Initiates a graceful shutdown of the cache writer
    ///
    /// Sends a shutdown signal to the writer task and waits for it to flush
    /// all pending writes to Redis.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl Cache {
    /// Creates a new Cache instance with an async write background task
    ///
    /// This spawns a background task that processes cache writes asynchronously,
    /// preventing cache operations from blocking callers.
    pub fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            redis_client,
            write_tx,
        };

        let handle = CacheWriterHandle { shutdown_tx };

        (cache, handle)
    }

    /// Background task that processes cache write messages
    ///
    /// Continuously receives cache write requests from the channel and writes
    /// them to Redis. On shutdown signal, flushes all remaining messages
    /// before exiting.
    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::debug!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = Self::write_to_redis(&client, msg).await {
                        tracing::warn!(error = %e, "Failed to write to Redis cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    // Flush all remaining messages
                    while let Ok(msg) = write_rx.try_recv() {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::warn!(error = %e, "Failed to flush cache write during shutdown");
                        }
                    }

                    tracing::debug!("Cache writer task stopped");
                    break;
                }
            }
        }
    }

    /// Writes a single message to Redis
    async fn write_to_redis(client: &Client, msg: CacheWriteMessage) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(msg.key, msg.value, msg.ttl).await?;
        Ok(())
    }

    /// Retrieves a value from the cache by key.
    ///
    /// Returns `None` both on a genuine miss and when the store is
    /// unreachable or the payload fails to deserialize; callers fall back to
    /// recomputing either way.
    async fn get_from_cache<T: serde::de::DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let mut conn = match self.redis_client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Cache unreachable, skipping lookup");
                return None;
            }
        };

        let cached: Option<String> = match conn.get(format!("{}", key)).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache read failed");
                return None;
            }
        };

        let json = cached?;
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache deserialization error, treating as miss");
                None
            }
        }
    }

    /// Stores a value in the cache asynchronously without blocking
    ///
    /// This function serializes the value and sends it to a background worker
    /// via a channel. The actual Redis write happens asynchronously, so this
    /// method returns immediately without waiting for the write to complete.
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        let msg = CacheWriteMessage {
            key: format!("{}", key),
            value: json,
            ttl,
        };

        if let Err(e) = self.write_tx.send(msg) {
            tracing::error!(error = %e, "Failed to send cache write message");
        }
    }

    /// Read-through lookup: returns the cached value for `key` when present,
    /// otherwise runs `op`, stores the result with `ttl`, and returns it.
    pub async fn get_or_compute<T, F, Fut>(&self, key: CacheKey, ttl: u64, op: F) -> AppResult<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        if let Some(cached) = self.get_from_cache(&key).await {
            tracing::debug!(key = %key, "Cache hit");
            return Ok(cached);
        }

        tracing::debug!(key = %key, "Cache miss");
        let value = op().await?;
        self.set_in_background(&key, &value, ttl);
        Ok(value)
    }

    /// Bulk read-through lookup tolerating partial failure.
    ///
    /// Resolves all cache hits first, invokes `op` individually for each
    /// miss, and batches the resulting writes into one pipelined round trip.
    /// A failed compute yields `None` in that slot and a failed write is
    /// logged and dropped; neither aborts the other results.
    pub async fn get_or_compute_many<T, A, F, Fut>(
        &self,
        items: Vec<(CacheKey, A)>,
        ttl: u64,
        op: F,
    ) -> Vec<Option<T>>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: Fn(A) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut results: Vec<Option<T>> = Vec::with_capacity(items.len());
        let mut writes: Vec<(String, String)> = Vec::new();

        for (key, args) in items {
            if let Some(cached) = self.get_from_cache(&key).await {
                results.push(Some(cached));
                continue;
            }

            match op(args).await {
                Ok(value) => {
                    match serde_json::to_string(&value) {
                        Ok(json) => writes.push((format!("{}", key), json)),
                        Err(e) => {
                            tracing::warn!(error = %e, key = %key, "Skipping cache write for unserializable value");
                        }
                    }
                    results.push(Some(value));
                }
                Err(e) => {
                    tracing::warn!(error = %e, key = %key, "Bulk compute failed for one entry");
                    results.push(None);
                }
            }
        }

        if !writes.is_empty() {
            self.write_batch(writes, ttl).await;
        }

        results
    }

    /// Writes a batch of entries in one pipelined round trip, best-effort.
    async fn write_batch(&self, writes: Vec<(String, String)>, ttl: u64) {
        let mut conn = match self.redis_client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, entries = writes.len(), "Cache unreachable, dropping batch write");
                return;
            }
        };

        let mut pipe = redis::pipe();
        for (key, json) in &writes {
            pipe.set_ex(key, json, ttl).ignore();
        }

        let outcome: Result<(), redis::RedisError> = pipe.query_async(&mut conn).await;
        if let Err(e) = outcome {
            tracing::warn!(error = %e, entries = writes.len(), "Pipelined cache write failed");
        }
    }
}
