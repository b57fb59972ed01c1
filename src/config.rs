use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
	pub server_host: String,
	pub server_port: u16,
	pub database_url: String,
	pub db_pool_max: usize,
	pub redis_url: Option<String>,
	pub media_root: PathBuf,
	pub media_url: String,
	pub public_base_url: Option<String>,
	pub trust_forwarded_headers: bool,
	pub jwt_secret: String,
	pub auth_token_ttl: Duration,
	pub admin_username: Option<String>,
	pub admin_password: Option<String>,
	pub mail: MailConfig,
	pub review_token_ttl: Duration,
	pub page_size: u32,
	pub max_page_size: u32,
	pub max_upload_bytes: usize,
}

/// Addresses and relay used for operator notifications.
#[derive(Debug, Clone)]
pub struct MailConfig {
	pub api_url: Option<String>,
	pub api_key: Option<String>,
	pub sender: String,
	pub operator: String,
}

impl Config {
	pub fn from_env() -> Result<Self, AppError> {
		dotenvy::dotenv().ok();
		Self::from_lookup(|key| env::var(key).ok())
	}

	pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
		let required = |key: &str| get(key).ok_or_else(|| AppError::Config(format!("Missing environment variable '{}'", key)));

		let server_host = get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_owned());
		let server_port = parse_or(&get, "SERVER_PORT", 4000u16)?;
		let database_url = required("DATABASE_URL")?;
		let jwt_secret = required("JWT_SECRET")?;

		let mut media_url = get("MEDIA_URL").unwrap_or_else(|| "/media/".to_owned());
		if !media_url.ends_with('/') {
			media_url.push('/');
		}

		let page_size = parse_or(&get, "PAGE_SIZE", 20u32)?;
		let max_page_size = parse_or(&get, "MAX_PAGE_SIZE", 100u32)?;
		if page_size == 0 || max_page_size < page_size {
			return Err(AppError::Config(format!(
				"PAGE_SIZE ({}) must be positive and not exceed MAX_PAGE_SIZE ({})",
				page_size, max_page_size
			)));
		}

		let mail = MailConfig {
			api_url: get("MAIL_API_URL"),
			api_key: get("MAIL_API_KEY"),
			sender: get("MAIL_SENDER").unwrap_or_else(|| "noreply@localhost".to_owned()),
			operator: get("OPERATOR_EMAIL").unwrap_or_else(|| {
				log::warn!("OPERATOR_EMAIL not set, review notifications go to operator@localhost");
				"operator@localhost".to_owned()
			}),
		};

		let public_base_url = get("PUBLIC_BASE_URL").map(|url| url.trim_end_matches('/').to_owned());
		if public_base_url.is_none() {
			log::warn!("PUBLIC_BASE_URL not set, absolute links (including review approval links) follow the request Host header");
		}

		let config = Self {
			server_host,
			server_port,
			database_url,
			db_pool_max: parse_or(&get, "DB_POOL_MAX", 8usize)?,
			redis_url: get("REDIS_URL"),
			media_root: PathBuf::from(get("MEDIA_ROOT").unwrap_or_else(|| "media".to_owned())),
			media_url,
			public_base_url,
			trust_forwarded_headers: parse_or(&get, "TRUST_FORWARDED_HEADERS", false)?,
			jwt_secret,
			auth_token_ttl: Duration::from_secs(parse_or(&get, "AUTH_TOKEN_TTL_HOURS", 12u64)? * 3600),
			admin_username: get("ADMIN_USERNAME"),
			admin_password: get("ADMIN_PASSWORD"),
			mail,
			review_token_ttl: Duration::from_secs(parse_or(&get, "REVIEW_TOKEN_TTL_SECS", 86_400u64)?),
			page_size,
			max_page_size,
			max_upload_bytes: parse_or(&get, "MAX_UPLOAD_MB", 20usize)? * 1024 * 1024,
		};

		log::info!("Application configuration loaded");
		Ok(config)
	}

	pub fn bind_address(&self) -> String {
		format!("{}:{}", self.server_host, self.server_port)
	}
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, AppError>
where
	T: FromStr,
	T::Err: Display,
	G: Fn(&str) -> Option<String>,
{
	match get(key) {
		Some(raw) => raw.parse().map_err(|e| AppError::Config(format!("Invalid {} value '{}': {}", key, raw, e))),
		None => Ok(default),
	}
}
