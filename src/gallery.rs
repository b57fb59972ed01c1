//! Image galleries owned by cars, locations and reviews.
//!
//! The three image tables share one shape; [`ImageOwner`] supplies the table
//! and column names. Every write that touches `is_primary` or appends orders
//! runs with the owner row locked (`FOR UPDATE`), so the caller must pass a
//! transaction.

use std::collections::HashMap;

use axum::Json;
use chrono::{DateTime, Utc};
use hyper::StatusCode;
use postgres_from_row::FromRow;
use serde::Serialize;
use tokio_postgres::{GenericClient, Transaction};
use uuid::Uuid;
use validator::Validate;

use crate::{
	error::AppError,
	forms::{lenient, Payload, Submission, WriteMode},
	links::RequestBase,
	media::{MediaStore, StoredImage},
	sql::{param_refs, Assignments},
	state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOwner {
	Car,
	Location,
	Review,
}

impl ImageOwner {
	pub fn table(self) -> &'static str {
		match self {
			ImageOwner::Car => "car_images",
			ImageOwner::Location => "location_images",
			ImageOwner::Review => "review_images",
		}
	}

	pub fn owner_column(self) -> &'static str {
		match self {
			ImageOwner::Car => "car_id",
			ImageOwner::Location => "location_id",
			ImageOwner::Review => "review_id",
		}
	}

	pub fn owner_table(self) -> &'static str {
		match self {
			ImageOwner::Car => "cars_detail",
			ImageOwner::Location => "location_detail",
			ImageOwner::Review => "review_detail",
		}
	}

	pub fn media_dir(self) -> &'static str {
		match self {
			ImageOwner::Car => "cars",
			ImageOwner::Location => "locations",
			ImageOwner::Review => "reviews",
		}
	}

	/// Review galleries are unordered and have no primary image.
	pub fn has_primary(self) -> bool {
		self != ImageOwner::Review
	}

	fn order_constraint(self) -> &'static str {
		match self {
			ImageOwner::Car => "car_images_car_order_key",
			ImageOwner::Location => "location_images_location_order_key",
			ImageOwner::Review => "",
		}
	}

	fn columns(self) -> String {
		let primary = if self.has_primary() { "is_primary" } else { "FALSE AS is_primary" };
		format!(
			"id, {} AS owner_id, image, alt_text, {}, \"order\", created_at",
			self.owner_column(),
			primary
		)
	}

	fn ordering(self) -> &'static str {
		if self.has_primary() {
			"\"order\" ASC, created_at DESC"
		} else {
			"created_at DESC, \"order\" DESC"
		}
	}
}

#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
	pub id: Uuid,
	pub owner_id: Uuid,
	pub image: String,
	pub alt_text: String,
	pub is_primary: bool,
	pub order: i32,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ImageOut {
	pub id: Uuid,
	pub image: String,
	pub alt_text: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub is_primary: Option<bool>,
	pub order: i32,
	pub created_at: DateTime<Utc>,
}

impl ImageOut {
	pub fn new(owner: ImageOwner, row: ImageRow, media: &MediaStore, base: &RequestBase) -> Self {
		ImageOut {
			id: row.id,
			image: media.url(base, &row.image),
			alt_text: row.alt_text,
			is_primary: owner.has_primary().then_some(row.is_primary),
			order: row.order,
			created_at: row.created_at,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
	pub order: i32,
	pub is_primary: bool,
}

/// Highest display order an image may hold.
pub const MAX_ORDER: i32 = i32::MAX - 1;

/// Orders continue after the highest existing one; the first new image
/// becomes primary only when the gallery was empty.
pub fn plan_append(owner: ImageOwner, existing: i64, max_order: i32, count: usize) -> Result<Vec<Placement>, AppError> {
	(0..count)
		.map(|i| -> Result<Placement, AppError> {
			let order = i32::try_from(i)
				.ok()
				.and_then(|i| max_order.checked_add(i)?.checked_add(1))
				.filter(|order| *order <= MAX_ORDER)
				.ok_or_else(|| AppError::field("order", "Image order limit reached; lower existing image orders first."))?;
			Ok(Placement {
				order,
				is_primary: owner.has_primary() && existing == 0 && i == 0,
			})
		})
		.collect()
}

/// Locks the owner row; fails with not-found when it does not exist.
async fn lock_owner(tx: &Transaction<'_>, owner: ImageOwner, owner_id: Uuid) -> Result<(), AppError> {
	let statement = format!("SELECT id FROM {} WHERE id = $1 FOR UPDATE", owner.owner_table());
	match tx.query_opt(statement.as_str(), &[&owner_id]).await? {
		Some(_) => Ok(()),
		None => Err(AppError::NotFound),
	}
}

async fn clear_primary(tx: &Transaction<'_>, owner: ImageOwner, owner_id: Uuid) -> Result<(), AppError> {
	let statement = format!(
		"UPDATE {} SET is_primary = FALSE WHERE {} = $1 AND is_primary",
		owner.table(),
		owner.owner_column()
	);
	tx.execute(statement.as_str(), &[&owner_id]).await?;
	Ok(())
}

pub async fn append(tx: &Transaction<'_>, owner: ImageOwner, owner_id: Uuid, images: &[StoredImage]) -> Result<Vec<ImageRow>, AppError> {
	if images.is_empty() {
		return Ok(Vec::new());
	}
	lock_owner(tx, owner, owner_id).await?;

	let stats = format!(
		"SELECT COUNT(*), COALESCE(MAX(\"order\"), 0) FROM {} WHERE {} = $1",
		owner.table(),
		owner.owner_column()
	);
	let row = tx.query_one(stats.as_str(), &[&owner_id]).await?;
	let existing: i64 = row.try_get(0)?;
	let max_order: i32 = row.try_get(1)?;

	let insert = if owner.has_primary() {
		format!(
			"INSERT INTO {} (id, {}, image, alt_text, is_primary, \"order\") VALUES ($1, $2, $3, '', $4, $5) RETURNING {}",
			owner.table(),
			owner.owner_column(),
			owner.columns()
		)
	} else {
		format!(
			"INSERT INTO {} (id, {}, image, alt_text, \"order\") VALUES ($1, $2, $3, '', $4) RETURNING {}",
			owner.table(),
			owner.owner_column(),
			owner.columns()
		)
	};

	let plan = plan_append(owner, existing, max_order, images.len())?;
	let mut rows = Vec::with_capacity(images.len());
	for (image, placement) in images.iter().zip(plan) {
		let id = Uuid::new_v4();
		let row = if owner.has_primary() {
			if placement.is_primary {
				clear_primary(tx, owner, owner_id).await?;
			}
			tx.query_one(insert.as_str(), &[&id, &owner_id, &image.path, &placement.is_primary, &placement.order])
				.await?
		} else {
			tx.query_one(insert.as_str(), &[&id, &owner_id, &image.path, &placement.order]).await?
		};
		rows.push(ImageRow::try_from_row(&row)?);
	}

	Ok(rows)
}

/// Images of several owners at once, grouped by owner in display order.
pub async fn list<C: GenericClient>(client: &C, owner: ImageOwner, owner_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<ImageRow>>, AppError> {
	let mut grouped: HashMap<Uuid, Vec<ImageRow>> = HashMap::new();
	if owner_ids.is_empty() {
		return Ok(grouped);
	}

	let statement = format!(
		"SELECT {} FROM {} WHERE {} = ANY($1) ORDER BY {}",
		owner.columns(),
		owner.table(),
		owner.owner_column(),
		owner.ordering()
	);
	let ids = owner_ids.to_vec();
	for row in client.query(statement.as_str(), &[&ids]).await? {
		let image = ImageRow::try_from_row(&row)?;
		grouped.entry(image.owner_id).or_default().push(image);
	}
	Ok(grouped)
}

/// Curation of a single image: alt text, display order, primary flag.
#[derive(Debug, Default, serde::Deserialize, Validate)]
pub struct ImagePatch {
	#[serde(default)]
	#[validate(length(max = 200, message = "Ensure this field has no more than 200 characters."))]
	pub alt_text: Option<String>,
	#[serde(default, deserialize_with = "lenient::opt_i32")]
	#[validate(range(min = 0, max = 2147483646, message = "Ensure this value is between 0 and 2147483646."))]
	pub order: Option<i32>,
	#[serde(default, deserialize_with = "lenient::opt_bool")]
	pub is_primary: Option<bool>,
}

impl Submission for ImagePatch {
	fn missing(&self) -> Vec<&'static str> {
		Vec::new()
	}
}

pub async fn update(tx: &Transaction<'_>, owner: ImageOwner, owner_id: Uuid, image_id: Uuid, patch: ImagePatch) -> Result<ImageRow, AppError> {
	lock_owner(tx, owner, owner_id).await?;

	if owner.has_primary() && patch.is_primary == Some(true) {
		clear_primary(tx, owner, owner_id).await?;
	}

	let mut set = Assignments::new();
	set.set("alt_text", patch.alt_text).set("order", patch.order);
	if owner.has_primary() {
		set.set("is_primary", patch.is_primary);
	}

	if let Some((mut statement, mut params)) = set.into_update(owner.table(), image_id, false) {
		params.push(Box::new(owner_id));
		statement.push_str(&format!(" AND {} = ${}", owner.owner_column(), params.len()));
		let constraint = owner.order_constraint();
		tx.execute(statement.as_str(), &param_refs(&params))
			.await
			.map_err(|e| AppError::from_constraint(e, &[(constraint, "order", "An image with this order already exists.")]))?;
	}

	let statement = format!(
		"SELECT {} FROM {} WHERE id = $1 AND {} = $2",
		owner.columns(),
		owner.table(),
		owner.owner_column()
	);
	let row = tx.query_opt(statement.as_str(), &[&image_id, &owner_id]).await?.ok_or(AppError::NotFound)?;
	Ok(ImageRow::try_from_row(&row)?)
}

/// Deletes one image and returns its stored path.
pub async fn delete<C: GenericClient>(client: &C, owner: ImageOwner, owner_id: Uuid, image_id: Uuid) -> Result<String, AppError> {
	let statement = format!(
		"DELETE FROM {} WHERE id = $1 AND {} = $2 RETURNING image",
		owner.table(),
		owner.owner_column()
	);
	let row = client.query_opt(statement.as_str(), &[&image_id, &owner_id]).await?.ok_or(AppError::NotFound)?;
	Ok(row.try_get(0)?)
}

/// Shared body of the `PATCH .../images/{image_id}` endpoints.
pub async fn patch_image(state: &AppState, owner: ImageOwner, owner_id: Uuid, image_id: Uuid, payload: Payload, base: &RequestBase) -> Result<Json<ImageOut>, AppError> {
	let patch: ImagePatch = payload.parse(WriteMode::Patch)?;

	let mut client = state.db.dedicated().await?;
	let tx = client.transaction().await?;
	let row = update(&tx, owner, owner_id, image_id, patch).await?;
	tx.commit().await?;

	log::info!("{} image {} of {} updated", owner.media_dir(), image_id, owner_id);
	Ok(Json(ImageOut::new(owner, row, &state.media, base)))
}

/// Shared body of the `DELETE .../images/{image_id}` endpoints.
pub async fn remove_image(state: &AppState, owner: ImageOwner, owner_id: Uuid, image_id: Uuid) -> Result<StatusCode, AppError> {
	let path = delete(&*state.db, owner, owner_id, image_id).await?;
	state.media.remove(&path).await;

	log::info!("{} image {} of {} deleted", owner.media_dir(), image_id, owner_id);
	Ok(StatusCode::NO_CONTENT)
}

/// Converts grouped rows into their response form, dropping the group.
pub fn render(owner: ImageOwner, rows: Option<Vec<ImageRow>>, media: &MediaStore, base: &RequestBase) -> Vec<ImageOut> {
	rows.unwrap_or_default()
		.into_iter()
		.map(|row| ImageOut::new(owner, row, media, base))
		.collect()
}
