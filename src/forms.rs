//! Request bodies for create and update calls.
//!
//! Writes arrive as JSON, url-encoded forms or multipart. [`Payload`]
//! flattens all three into a JSON object of fields plus the uploaded files,
//! then [`Payload::parse`] decodes and validates it into an input type.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::{
	extract::{FromRequest, Multipart, Request},
	http::header::CONTENT_TYPE,
	Form, Json,
};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::{AppError, FieldErrors};

pub const REQUIRED: &str = "This field is required.";

#[derive(Debug, Clone)]
pub struct UploadedFile {
	pub field: String,
	pub file_name: Option<String>,
	pub content_type: Option<String>,
	pub data: Bytes,
}

#[derive(Debug, Default)]
pub struct Payload {
	pub fields: Map<String, Value>,
	pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
	Create,
	Replace,
	Patch,
}

/// Input type accepted by a write endpoint.
pub trait Submission: DeserializeOwned + Validate {
	/// Required fields that are absent.
	fn missing(&self) -> Vec<&'static str>;
}

impl Payload {
	pub fn from_json(fields: Map<String, Value>) -> Self {
		Payload { fields, files: Vec::new() }
	}

	pub fn take_files(&mut self, field: &str) -> Vec<UploadedFile> {
		let (taken, rest) = std::mem::take(&mut self.files).into_iter().partition(|f| f.field == field);
		self.files = rest;
		taken
	}

	pub fn parse<T: Submission>(&self, mode: WriteMode) -> Result<T, AppError> {
		let input: T = match T::deserialize(Value::Object(self.fields.clone())) {
			Ok(input) => input,
			Err(e) => return Err(self.attribute_decode_error::<T>(e)),
		};

		let mut errors = match input.validate() {
			Ok(()) => ValidationErrors::new(),
			Err(errors) => errors,
		};
		if mode != WriteMode::Patch {
			for field in input.missing() {
				errors.add(field, message_error("required", REQUIRED));
			}
		}

		if errors.errors().is_empty() {
			Ok(input)
		} else {
			Err(errors.into())
		}
	}

	/// Re-decodes each field on its own to find the ones that failed.
	fn attribute_decode_error<T: DeserializeOwned>(&self, whole: serde_json::Error) -> AppError {
		let mut fields = FieldErrors::new();
		for (key, value) in &self.fields {
			let single = Value::Object(Map::from_iter([(key.clone(), value.clone())]));
			if let Err(e) = T::deserialize(single) {
				fields.entry(key.clone()).or_default().push(clean_serde_message(&e));
			}
		}
		if fields.is_empty() {
			fields.insert("non_field_errors".to_owned(), vec![clean_serde_message(&whole)]);
		}
		AppError::Validation(fields)
	}
}

fn clean_serde_message(e: &serde_json::Error) -> String {
	let text = e.to_string();
	match text.find(" at line ") {
		Some(i) => text[..i].to_owned(),
		None => text,
	}
}

pub fn message_error(code: &'static str, message: &'static str) -> ValidationError {
	let mut err = ValidationError::new(code);
	err.message = Some(message.into());
	err
}

pub fn not_blank(value: &str) -> Result<(), ValidationError> {
	if value.trim().is_empty() {
		return Err(message_error("blank", "This field may not be blank."));
	}
	Ok(())
}

#[async_trait]
impl<S> FromRequest<S> for Payload
where
	S: Send + Sync,
{
	type Rejection = AppError;

	async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
		let content_type = req
			.headers()
			.get(CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.unwrap_or_default()
			.to_ascii_lowercase();

		if content_type.starts_with("multipart/form-data") {
			let multipart = Multipart::from_request(req, state)
				.await
				.map_err(|e| AppError::BadRequest(e.body_text()))?;
			read_multipart(multipart).await
		} else if content_type.starts_with("application/x-www-form-urlencoded") {
			let Form(form) = Form::<HashMap<String, String>>::from_request(req, state)
				.await
				.map_err(|e| AppError::BadRequest(e.body_text()))?;
			let fields = form.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
			Ok(Payload::from_json(fields))
		} else {
			let Json(value) = Json::<Value>::from_request(req, state)
				.await
				.map_err(|e| AppError::BadRequest(e.body_text()))?;
			match value {
				Value::Object(fields) => Ok(Payload::from_json(fields)),
				_ => Err(AppError::field("non_field_errors", "Invalid data. Expected a dictionary.")),
			}
		}
	}
}

async fn read_multipart(mut multipart: Multipart) -> Result<Payload, AppError> {
	let mut payload = Payload::default();

	loop {
		let field = match multipart.next_field().await {
			Ok(Some(field)) => field,
			Ok(None) => break,
			Err(e) => {
				log::warn!("Error processing multipart upload: {}", e);
				return Err(AppError::BadRequest(e.body_text()));
			}
		};

		let Some(name) = field.name().map(str::to_owned) else {
			continue;
		};
		let file_name = field.file_name().map(str::to_owned);
		let content_type = field.content_type().map(str::to_owned);

		if file_name.is_some() {
			let data = field.bytes().await.map_err(|e| AppError::BadRequest(e.body_text()))?;
			if data.is_empty() {
				continue;
			}
			payload.files.push(UploadedFile {
				field: name,
				file_name,
				content_type,
				data,
			});
		} else {
			let text = field.text().await.map_err(|e| AppError::BadRequest(e.body_text()))?;
			payload.fields.insert(name, Value::String(text));
		}
	}

	Ok(payload)
}

/// Deserializers that accept both JSON values and their form-encoded text.
pub mod lenient {
	use super::*;
	use serde::de::Error;

	pub fn opt_i32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
		const MSG: &str = "A valid integer is required.";
		match Option::<Value>::deserialize(d)? {
			None | Some(Value::Null) => Ok(None),
			Some(Value::Number(n)) => n
				.as_i64()
				.and_then(|v| i32::try_from(v).ok())
				.map(Some)
				.ok_or_else(|| D::Error::custom(MSG)),
			Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
			Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| D::Error::custom(MSG)),
			Some(_) => Err(D::Error::custom(MSG)),
		}
	}

	pub fn opt_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
		const MSG: &str = "Must be a valid boolean.";
		match Option::<Value>::deserialize(d)? {
			None | Some(Value::Null) => Ok(None),
			Some(Value::Bool(b)) => Ok(Some(b)),
			Some(Value::Number(n)) => match n.as_i64() {
				Some(1) => Ok(Some(true)),
				Some(0) => Ok(Some(false)),
				_ => Err(D::Error::custom(MSG)),
			},
			Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
				"true" | "1" | "yes" | "on" => Ok(Some(true)),
				"false" | "0" | "no" | "off" => Ok(Some(false)),
				_ => Err(D::Error::custom(MSG)),
			},
			Some(_) => Err(D::Error::custom(MSG)),
		}
	}

	pub fn opt_uuid<'de, D: Deserializer<'de>>(d: D) -> Result<Option<uuid::Uuid>, D::Error> {
		const MSG: &str = "Must be a valid UUID.";
		match Option::<Value>::deserialize(d)? {
			None | Some(Value::Null) => Ok(None),
			Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
			Some(Value::String(s)) => uuid::Uuid::parse_str(s.trim()).map(Some).map_err(|_| D::Error::custom(MSG)),
			Some(_) => Err(D::Error::custom(MSG)),
		}
	}

	/// A list of strings given as a JSON array, a JSON-encoded array or a
	/// comma separated string.
	pub fn opt_string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
		const MSG: &str = "Expected a list of items.";
		let items = |values: Vec<Value>| -> Result<Vec<String>, D::Error> {
			values
				.into_iter()
				.map(|v| match v {
					Value::String(s) => Ok(s),
					Value::Number(n) => Ok(n.to_string()),
					_ => Err(D::Error::custom(MSG)),
				})
				.collect()
		};

		match Option::<Value>::deserialize(d)? {
			None | Some(Value::Null) => Ok(None),
			Some(Value::Array(values)) => items(values).map(Some),
			Some(Value::String(s)) => {
				let s = s.trim();
				if s.starts_with('[') {
					match serde_json::from_str::<Vec<Value>>(s) {
						Ok(values) => items(values).map(Some),
						Err(_) => Err(D::Error::custom(MSG)),
					}
				} else {
					Ok(Some(s.split(',').map(str::trim).filter(|f| !f.is_empty()).map(str::to_owned).collect()))
				}
			}
			Some(_) => Err(D::Error::custom(MSG)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[derive(Debug, Deserialize, Validate)]
	struct Sample {
		#[serde(default)]
		#[validate(custom(function = "not_blank"), length(max = 5, message = "Too long."))]
		name: Option<String>,
		#[serde(default, deserialize_with = "lenient::opt_i32")]
		#[validate(range(min = 1, max = 5, message = "Out of range."))]
		rating: Option<i32>,
		#[serde(default, deserialize_with = "lenient::opt_string_list")]
		tags: Option<Vec<String>>,
		#[serde(default, deserialize_with = "lenient::opt_bool")]
		flag: Option<bool>,
	}

	impl Submission for Sample {
		fn missing(&self) -> Vec<&'static str> {
			let mut missing = Vec::new();
			if self.name.is_none() {
				missing.push("name");
			}
			if self.rating.is_none() {
				missing.push("rating");
			}
			missing
		}
	}

	fn payload(value: Value) -> Payload {
		match value {
			Value::Object(fields) => Payload::from_json(fields),
			_ => unreachable!(),
		}
	}

	fn field_errors(result: Result<Sample, AppError>) -> FieldErrors {
		match result {
			Err(AppError::Validation(fields)) => fields,
			other => panic!("expected validation error, got {:?}", other),
		}
	}

	#[test]
	fn form_text_is_coerced() {
		let sample: Sample = payload(json!({
			"name": "Asha",
			"rating": " 4 ",
			"tags": "ac, gps,,wifi",
			"flag": "on",
		}))
		.parse(WriteMode::Create)
		.unwrap();

		assert_eq!(sample.rating, Some(4));
		assert_eq!(sample.tags.unwrap(), vec!["ac", "gps", "wifi"]);
		assert_eq!(sample.flag, Some(true));
	}

	#[test]
	fn json_encoded_list_in_form_field() {
		let sample: Sample = payload(json!({ "name": "a", "rating": 1, "tags": "[\"ac\", 4]" }))
			.parse(WriteMode::Create)
			.unwrap();
		assert_eq!(sample.tags.unwrap(), vec!["ac", "4"]);
	}

	#[test]
	fn missing_fields_are_required_except_on_patch() {
		let fields = field_errors(payload(json!({})).parse(WriteMode::Create));
		assert_eq!(fields["name"], vec![REQUIRED]);
		assert_eq!(fields["rating"], vec![REQUIRED]);

		assert!(payload(json!({})).parse::<Sample>(WriteMode::Patch).is_ok());
	}

	#[test]
	fn range_and_blank_checks_run_on_supplied_fields() {
		let fields = field_errors(payload(json!({ "name": "   ", "rating": 9 })).parse(WriteMode::Patch));
		assert_eq!(fields["name"], vec!["This field may not be blank."]);
		assert_eq!(fields["rating"], vec!["Out of range."]);
	}

	#[test]
	fn decode_errors_name_the_bad_field() {
		let fields = field_errors(payload(json!({ "name": "ok", "rating": "five", "tags": {"a": 1} })).parse(WriteMode::Create));
		assert_eq!(fields["rating"], vec!["A valid integer is required."]);
		assert_eq!(fields["tags"], vec!["Expected a list of items."]);
		assert!(!fields.contains_key("name"));
	}

	#[test]
	fn take_files_splits_by_field_name() {
		let file = |field: &str| UploadedFile {
			field: field.to_owned(),
			file_name: Some("a.png".to_owned()),
			content_type: None,
			data: Bytes::from_static(b"x"),
		};
		let mut payload = Payload {
			fields: Map::new(),
			files: vec![file("uploaded_images"), file("other"), file("uploaded_images")],
		};

		assert_eq!(payload.take_files("uploaded_images").len(), 2);
		assert_eq!(payload.files.len(), 1);
	}
}
