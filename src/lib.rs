pub mod auth;
pub mod cache;
pub mod cars;
pub mod config;
pub mod db_client;
pub mod encryption_engine;
pub mod error;
pub mod file_server;
pub mod forms;
pub mod gallery;
pub mod links;
pub mod listing;
pub mod locations;
pub mod mailer;
pub mod media;
pub mod packages;
pub mod review;
pub mod sql;
pub mod state;

use axum::{
	extract::DefaultBodyLimit,
	routing::{get, post},
	Router,
};
use tower_http::cors::CorsLayer;

use state::AppState;

pub fn router(state: AppState) -> Router {
	let body_limit = state.config.max_upload_bytes;
	// An absolute MEDIA_URL points at another host that serves the files.
	let media_prefix = match state.config.media_url.as_str() {
		prefix if prefix.starts_with('/') => prefix.to_owned(),
		_ => "/media/".to_owned(),
	};

	Router::new()
		.route("/api/auth/token", post(auth::obtain_token))
		.merge(cars::routes())
		.merge(packages::routes())
		.merge(locations::routes())
		.merge(review::routes())
		.route(&format!("{}*path", media_prefix), get(file_server::media_handler))
		.layer(DefaultBodyLimit::max(body_limit))
		.layer(CorsLayer::permissive())
		.with_state(state)
}
