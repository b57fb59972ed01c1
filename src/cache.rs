use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{aio::ConnectionManager, AsyncCommands};
use tokio::time::Instant;

use crate::error::AppError;

/// Key-value store with expiry shared by every worker.
#[async_trait]
pub trait TokenCache: Send + Sync {
	async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError>;

	/// Returns the value and removes the key in one step. Of several
	/// concurrent callers at most one sees the value.
	async fn take(&self, key: &str) -> Result<Option<String>, AppError>;
}

#[derive(Clone)]
pub struct RedisTokenCache {
	connection: ConnectionManager,
}

impl RedisTokenCache {
	pub async fn connect(url: &str) -> Result<Self, AppError> {
		let client = redis::Client::open(url)?;
		let connection = client.get_connection_manager().await?;
		Ok(RedisTokenCache { connection })
	}
}

#[async_trait]
impl TokenCache for RedisTokenCache {
	async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
		let mut connection = self.connection.clone();
		connection.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?;
		Ok(())
	}

	async fn take(&self, key: &str) -> Result<Option<String>, AppError> {
		let mut connection = self.connection.clone();
		Ok(connection.get_del(key).await?)
	}
}

/// Process-local stand-in for Redis. Expired entries are dropped lazily.
#[derive(Clone, Default)]
pub struct MemoryTokenCache {
	entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl MemoryTokenCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		let now = Instant::now();
		self.entries.lock().values().filter(|(_, expires)| *expires > now).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[async_trait]
impl TokenCache for MemoryTokenCache {
	async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
		let now = Instant::now();
		let mut entries = self.entries.lock();
		entries.retain(|_, (_, expires)| *expires > now);
		entries.insert(key.to_owned(), (value.to_owned(), now + ttl));
		Ok(())
	}

	async fn take(&self, key: &str) -> Result<Option<String>, AppError> {
		let removed = self.entries.lock().remove(key);
		Ok(removed.filter(|(_, expires)| *expires > Instant::now()).map(|(value, _)| value))
	}
}
