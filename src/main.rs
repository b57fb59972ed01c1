use std::sync::Arc;

use tokio::{net::TcpListener, signal};
use travel_server::{
	cache::{MemoryTokenCache, RedisTokenCache, TokenCache},
	config::Config,
	db_client::DbClient,
	error::AppError,
	mailer::Notifier,
	review::verification::ReviewVerifier,
	router,
	state::AppState,
};

#[tokio::main]
async fn main() {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = run().await {
		log::error!("server stopped: {}", e);
		std::process::exit(1);
	}
}

async fn run() -> Result<(), AppError> {
	let config = Config::from_env()?;

	let db = DbClient::connect(&config.database_url, config.db_pool_max).await?;
	db.migrate().await?;
	log::info!("Database schema is up to date");

	let cache: Arc<dyn TokenCache> = match &config.redis_url {
		Some(url) => Arc::new(RedisTokenCache::connect(url).await?),
		None => {
			log::warn!("REDIS_URL not set, verification tokens are kept in process memory");
			Arc::new(MemoryTokenCache::new())
		}
	};
	let verifier = ReviewVerifier::new(cache, config.review_token_ttl);
	let notifier = Notifier::from_config(&config.mail);

	tokio::fs::create_dir_all(&config.media_root).await?;

	let address = config.bind_address();
	let app = router(AppState::new(config, db, verifier, notifier));

	let listener = TcpListener::bind(&address).await?;
	log::info!("Server running on {}", address);

	axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

	log::info!("Server shut down");
	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			log::error!("Failed to install Ctrl+C handler: {}", e);
			std::future::pending::<()>().await;
		}
		log::info!("Received Ctrl+C, shutting down");
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
				log::info!("Received terminate signal, shutting down");
			}
			Err(e) => {
				log::error!("Failed to install signal handler: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
