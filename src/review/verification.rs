//! Pending-verification tokens for submitted reviews.
//!
//! A submitted review gets a random token mapped to its id with a fixed
//! lifetime. Redeeming the token removes it; every failure mode (unknown,
//! consumed, expired, malformed) reports the same [`AppError::InvalidToken`].

use std::{sync::Arc, time::Duration};

use uuid::Uuid;

use crate::{cache::TokenCache, encryption_engine::random_token, error::AppError};

pub const KEY_PREFIX: &str = "verify_review_";
pub const VERIFY_PATH: &str = "/api/reviews/verify";

#[derive(Clone)]
pub struct ReviewVerifier {
	cache: Arc<dyn TokenCache>,
	ttl: Duration,
}

impl ReviewVerifier {
	pub fn new(cache: Arc<dyn TokenCache>, ttl: Duration) -> Self {
		ReviewVerifier { cache, ttl }
	}

	pub async fn issue(&self, review_id: Uuid) -> Result<String, AppError> {
		let token = random_token();
		self.cache.set(&cache_key(&token), &review_id.to_string(), self.ttl).await?;
		Ok(token)
	}

	pub async fn redeem(&self, token: &str) -> Result<Uuid, AppError> {
		let token = token.trim();
		if token.is_empty() || token.len() > 128 {
			return Err(AppError::InvalidToken);
		}

		let review_id = self.cache.take(&cache_key(token)).await?.ok_or(AppError::InvalidToken)?;
		Uuid::parse_str(&review_id).map_err(|_| AppError::InvalidToken)
	}
}

fn cache_key(token: &str) -> String {
	format!("{}{}", KEY_PREFIX, token)
}

/// Link e-mailed to the operator; `base` is the absolute origin, if known.
pub fn verification_link(base: &str, token: &str) -> String {
	format!("{}{}?token={}", base.trim_end_matches('/'), VERIFY_PATH, token)
}
