use std::time::Duration;

use async_trait::async_trait;
use axum::{
	extract::{FromRef, FromRequestParts, State},
	http::{header, request::Parts},
	Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{json, Value};

use crate::error::AppError;

#[derive(Clone)]
pub struct AuthKeys {
	encoding: EncodingKey,
	decoding: DecodingKey,
	ttl: Duration,
	admin: Option<(String, String)>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Claims {
	pub sub: String,
	pub iat: usize,
	pub exp: usize,
}

impl AuthKeys {
	pub fn new(secret: &str, ttl: Duration, admin_username: Option<String>, admin_password: Option<String>) -> Self {
		let admin = match (admin_username, admin_password) {
			(Some(user), Some(password)) => Some((user, password)),
			_ => {
				log::warn!("ADMIN_USERNAME/ADMIN_PASSWORD not set, token endpoint will refuse every login");
				None
			}
		};

		AuthKeys {
			encoding: EncodingKey::from_secret(secret.as_bytes()),
			decoding: DecodingKey::from_secret(secret.as_bytes()),
			ttl,
			admin,
		}
	}

	pub fn issue(&self, subject: &str) -> Result<String, AppError> {
		let now = Utc::now().timestamp().max(0) as usize;
		let claims = Claims {
			sub: subject.to_owned(),
			iat: now,
			exp: now + self.ttl.as_secs() as usize,
		};
		encode(&Header::default(), &claims, &self.encoding).map_err(|e| AppError::Internal(e.into()))
	}

	pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
		decode::<Claims>(token, &self.decoding, &Validation::default())
			.map(|data| data.claims)
			.map_err(|_| AppError::Unauthorized("Invalid token."))
	}

	fn check_login(&self, username: &str, password: &str) -> bool {
		match &self.admin {
			Some((user, pass)) => constant_time_eq(user.as_bytes(), username.as_bytes()) & constant_time_eq(pass.as_bytes(), password.as_bytes()),
			None => false,
		}
	}
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}
	a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Present on handlers that require the privileged role.
#[derive(Debug)]
pub struct Admin {
	pub username: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for Admin
where
	S: Send + Sync,
	AuthKeys: FromRef<S>,
{
	type Rejection = AppError;

	async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
		let value = parts
			.headers
			.get(header::AUTHORIZATION)
			.and_then(|v| v.to_str().ok())
			.ok_or(AppError::Unauthorized("Authentication credentials were not provided."))?;

		let token = value
			.strip_prefix("Bearer ")
			.or_else(|| value.strip_prefix("Token "))
			.map(str::trim)
			.filter(|t| !t.is_empty())
			.ok_or(AppError::Unauthorized("Invalid token header."))?;

		let claims = AuthKeys::from_ref(state).verify(token)?;
		Ok(Admin { username: claims.sub })
	}
}

#[derive(serde::Deserialize)]
pub struct Credentials {
	username: String,
	password: String,
}

pub async fn obtain_token(keys: State<AuthKeys>, credentials: Json<Credentials>) -> Result<Json<Value>, AppError> {
	let credentials = credentials.0;
	if !keys.check_login(&credentials.username, &credentials.password) {
		log::warn!("rejected login for '{}'", credentials.username);
		return Err(AppError::field("non_field_errors", "Unable to log in with provided credentials."));
	}

	let token = keys.issue(&credentials.username)?;
	log::info!("issued token for '{}'", credentials.username);
	Ok(Json(json!({ "token": token })))
}
