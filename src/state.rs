use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
	auth::AuthKeys,
	config::Config,
	db_client::DbClient,
	listing::PageSizes,
	mailer::Notifier,
	media::MediaStore,
	review::verification::ReviewVerifier,
};

#[derive(Clone)]
pub struct AppState {
	pub db: DbClient,
	pub media: MediaStore,
	pub verifier: ReviewVerifier,
	pub notifier: Notifier,
	pub auth: AuthKeys,
	pub config: Arc<Config>,
}

/// How absolute links find their origin: a configured public base URL
/// overrides the request; otherwise `X-Forwarded-*` is honoured only when
/// the deployment says a proxy sets it.
#[derive(Debug, Clone, Default)]
pub struct LinkPolicy {
	pub public_base_url: Option<String>,
	pub trust_forwarded: bool,
}

impl AppState {
	pub fn new(config: Config, db: DbClient, verifier: ReviewVerifier, notifier: Notifier) -> Self {
		let media = MediaStore::new(config.media_root.clone(), config.media_url.clone());
		let auth = AuthKeys::new(
			&config.jwt_secret,
			config.auth_token_ttl,
			config.admin_username.clone(),
			config.admin_password.clone(),
		);

		AppState {
			db,
			media,
			verifier,
			notifier,
			auth,
			config: Arc::new(config),
		}
	}

	pub fn page_sizes(&self) -> PageSizes {
		PageSizes {
			default: self.config.page_size,
			max: self.config.max_page_size,
		}
	}
}

impl FromRef<AppState> for DbClient {
	fn from_ref(state: &AppState) -> Self {
		state.db.clone()
	}
}

impl FromRef<AppState> for AuthKeys {
	fn from_ref(state: &AppState) -> Self {
		state.auth.clone()
	}
}

impl FromRef<AppState> for MediaStore {
	fn from_ref(state: &AppState) -> Self {
		state.media.clone()
	}
}

impl FromRef<AppState> for LinkPolicy {
	fn from_ref(state: &AppState) -> Self {
		LinkPolicy {
			public_base_url: state.config.public_base_url.clone(),
			trust_forwarded: state.config.trust_forwarded_headers,
		}
	}
}
