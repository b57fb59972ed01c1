use std::{
	ops::{Deref, DerefMut},
	str::FromStr,
	sync::Arc,
};

use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod};
use tokio_postgres::{Client, Config, NoTls};

use crate::error::AppError;

const SCHEMA: &str = include_str!("schema.sql");

/// Shared database handle.
///
/// Plain reads and single statement writes go through the shared client.
/// Anything that needs `BEGIN ... COMMIT` checks out a pooled connection,
/// since a transaction on the shared client would interleave with other
/// requests. The pool holds at most `max_size` connections; callers past
/// that wait for one to be returned.
#[derive(Clone)]
pub struct DbClient {
	shared: Arc<Client>,
	pool: Pool,
}

impl DbClient {
	pub async fn connect(url: &str, max_size: usize) -> Result<Self, AppError> {
		let config = Config::from_str(url)?;
		let shared = open(&config).await?;

		let manager = Manager::from_config(
			config,
			NoTls,
			ManagerConfig {
				recycling_method: RecyclingMethod::Fast,
			},
		);
		let pool = Pool::builder(manager)
			.max_size(max_size.max(1))
			.build()
			.map_err(|e| AppError::Config(format!("Database pool: {}", e)))?;

		Ok(DbClient {
			shared: Arc::new(shared),
			pool,
		})
	}

	pub async fn migrate(&self) -> Result<(), tokio_postgres::Error> {
		self.shared.batch_execute(SCHEMA).await
	}

	pub async fn dedicated(&self) -> Result<Dedicated, PoolError> {
		Ok(Dedicated(self.pool.get().await?))
	}

	pub fn pool_size(&self) -> usize {
		self.pool.status().max_size
	}
}

impl Deref for DbClient {
	type Target = Client;

	fn deref(&self) -> &Self::Target {
		&self.shared
	}
}

/// A connection checked out of the pool; returned on drop.
pub struct Dedicated(Object);

impl Deref for Dedicated {
	type Target = Client;

	fn deref(&self) -> &Self::Target {
		&**self.0
	}
}

impl DerefMut for Dedicated {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut **self.0
	}
}

async fn open(config: &Config) -> Result<Client, tokio_postgres::Error> {
	let (client, monitor) = config.connect(NoTls).await?;

	tokio::spawn(async move {
		if let Err(e) = monitor.await {
			log::error!("Connection error: {}", e);
		}
	});

	Ok(client)
}
