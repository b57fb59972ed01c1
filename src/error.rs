use std::collections::BTreeMap;

use axum::{
	response::{IntoResponse, Response},
	Json,
};
use hyper::StatusCode;
use serde_json::json;
use thiserror::Error;
use tokio_postgres::error::SqlState;
use validator::ValidationErrors;

/// Field name to the messages reported against it.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

pub const INVALID_TOKEN: &str = "Invalid or expired token";

#[derive(Debug, Error)]
pub enum AppError {
	#[error("validation failed: {0:?}")]
	Validation(FieldErrors),

	#[error("bad request: {0}")]
	BadRequest(String),

	#[error("{INVALID_TOKEN}")]
	InvalidToken,

	#[error("authentication required: {0}")]
	Unauthorized(&'static str),

	#[error("not found")]
	NotFound,

	#[error("configuration error: {0}")]
	Config(String),

	#[error("database error: {0}")]
	Database(#[from] tokio_postgres::Error),

	#[error("database pool error: {0}")]
	Pool(#[from] deadpool_postgres::PoolError),

	#[error("cache error: {0}")]
	Cache(#[from] redis::RedisError),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("internal error: {0}")]
	Internal(#[from] anyhow::Error),
}

impl AppError {
	pub fn field(field: &str, message: impl Into<String>) -> Self {
		let mut errors = FieldErrors::new();
		errors.insert(field.to_owned(), vec![message.into()]);
		AppError::Validation(errors)
	}

	/// Turns a constraint violation caused by user input into a field error.
	/// `mapping` pairs a constraint name with the field it guards.
	pub fn from_constraint(err: tokio_postgres::Error, mapping: &[(&str, &str, &str)]) -> Self {
		if let Some(db) = err.as_db_error() {
			if *db.code() == SqlState::UNIQUE_VIOLATION || *db.code() == SqlState::FOREIGN_KEY_VIOLATION {
				if let Some(constraint) = db.constraint() {
					for (name, field, message) in mapping {
						if *name == constraint {
							return AppError::field(field, *message);
						}
					}
				}
			}
		}
		AppError::Database(err)
	}
}

impl From<ValidationErrors> for AppError {
	fn from(errors: ValidationErrors) -> Self {
		let mut fields = FieldErrors::new();
		for (field, errs) in errors.field_errors() {
			let messages = errs
				.iter()
				.map(|e| match &e.message {
					Some(message) => message.to_string(),
					None => e.code.to_string(),
				})
				.collect();
			fields.insert(field.to_string(), messages);
		}
		AppError::Validation(fields)
	}
}

impl IntoResponse for AppError {
	fn into_response(self) -> Response {
		let (status, body) = match &self {
			AppError::Validation(fields) => (StatusCode::BAD_REQUEST, json!(fields)),
			AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
			AppError::InvalidToken => (StatusCode::BAD_REQUEST, json!({ "error": INVALID_TOKEN })),
			AppError::Unauthorized(detail) => (StatusCode::UNAUTHORIZED, json!({ "detail": detail })),
			AppError::NotFound => (StatusCode::NOT_FOUND, json!({ "detail": "Not found." })),
			AppError::Config(_)
			| AppError::Database(_)
			| AppError::Pool(_)
			| AppError::Cache(_)
			| AppError::Io(_)
			| AppError::Internal(_) => {
				log::error!("request failed: {}", self);
				(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "An internal error occurred" }))
			}
		};

		(status, Json(body)).into_response()
	}
}
