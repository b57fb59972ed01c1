use std::collections::HashMap;

use axum::{
	extract::{Path, Query, State},
	http::Uri,
	Json,
};
use chrono::{DateTime, Utc};
use hyper::StatusCode;
use postgres_from_row::FromRow;
use serde_json::{json, Value};
use tokio_postgres::types::Json as JsonColumn;
use uuid::Uuid;
use validator::Validate;

use crate::{
	auth::Admin,
	db_client::DbClient,
	error::AppError,
	forms::{lenient, not_blank, Payload, Submission, WriteMode},
	gallery::{self, ImageOut, ImageOwner, ImageRow},
	links::RequestBase,
	listing::{FilterKind, ListSpec, Page},
	media::{MediaStore, StoredImage},
	sql::{param_refs, Assignments},
	state::AppState,
};

pub const UPLOAD_FIELD: &str = "uploaded_images";
const BULK_FIELD: &str = "images";

pub const CAR_LIST: ListSpec = ListSpec {
	table: "cars_detail",
	filters: &[("seating_capacity", FilterKind::Integer)],
	search: &["car_name", "car_description", "seating_capacity::text"],
	ordering: &["created_at", "seating_capacity", "car_name"],
};

const CAR_COLUMNS: &str = "id, car_name, car_description, seating_capacity, extra_features, created_at, updated_at, \
	(SELECT i.image FROM car_images i WHERE i.car_id = cars_detail.id AND i.is_primary LIMIT 1) AS primary_image, \
	(SELECT COUNT(*) FROM car_images i WHERE i.car_id = cars_detail.id) AS image_count";

#[derive(FromRow)]
pub struct CarRow {
	pub id: Uuid,
	pub car_name: String,
	pub car_description: String,
	pub seating_capacity: i32,
	pub extra_features: JsonColumn<Vec<String>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub primary_image: Option<String>,
	pub image_count: i64,
}

#[derive(serde::Serialize)]
pub struct CarDetail {
	pub id: Uuid,
	pub car_name: String,
	pub car_description: String,
	pub seating_capacity: i32,
	pub extra_features: Vec<String>,
	pub images: Vec<ImageOut>,
	pub primary_image: Option<String>,
	pub image_count: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Projection used by the list endpoint.
#[derive(serde::Serialize)]
pub struct CarSummary {
	pub id: Uuid,
	pub car_name: String,
	pub car_description: String,
	pub extra_features: Vec<String>,
	pub seating_capacity: i32,
	pub primary_image: Option<String>,
	pub image_count: i64,
	pub created_at: DateTime<Utc>,
}

impl CarSummary {
	fn new(row: CarRow, media: &MediaStore, base: &RequestBase) -> Self {
		CarSummary {
			id: row.id,
			car_name: row.car_name,
			car_description: row.car_description,
			extra_features: row.extra_features.0,
			seating_capacity: row.seating_capacity,
			primary_image: row.primary_image.map(|path| media.url(base, &path)),
			image_count: row.image_count,
			created_at: row.created_at,
		}
	}
}

impl CarDetail {
	fn new(row: CarRow, images: Vec<ImageOut>, media: &MediaStore, base: &RequestBase) -> Self {
		CarDetail {
			id: row.id,
			car_name: row.car_name,
			car_description: row.car_description,
			seating_capacity: row.seating_capacity,
			extra_features: row.extra_features.0,
			images,
			primary_image: row.primary_image.map(|path| media.url(base, &path)),
			image_count: row.image_count,
			created_at: row.created_at,
			updated_at: row.updated_at,
		}
	}
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct CarInput {
	#[serde(default)]
	#[validate(custom(function = "not_blank"), length(max = 200, message = "Ensure this field has no more than 200 characters."))]
	pub car_name: Option<String>,
	#[serde(default)]
	pub car_description: Option<String>,
	#[serde(default, deserialize_with = "lenient::opt_i32")]
	#[validate(range(min = 1, max = 50, message = "Ensure this value is between 1 and 50."))]
	pub seating_capacity: Option<i32>,
	#[serde(default, deserialize_with = "lenient::opt_string_list")]
	pub extra_features: Option<Vec<String>>,
}

impl Submission for CarInput {
	fn missing(&self) -> Vec<&'static str> {
		let mut missing = Vec::new();
		if self.car_name.is_none() {
			missing.push("car_name");
		}
		if self.seating_capacity.is_none() {
			missing.push("seating_capacity");
		}
		missing
	}
}

pub async fn list_cars(
	state: State<AppState>,
	base: RequestBase,
	uri: Uri,
	params: Query<HashMap<String, String>>,
) -> Result<Json<Page<CarSummary>>, AppError> {
	let query = CAR_LIST.compile(&params.0, state.page_sizes())?;
	let values = param_refs(&query.params);

	let count: i64 = state.db.query_one(query.count_sql().as_str(), &values).await?.try_get(0)?;
	query.check_page(count)?;

	let rows = state.db.query(query.select_sql(CAR_COLUMNS).as_str(), &values).await?;
	let mut cars = Vec::with_capacity(rows.len());
	for row in rows {
		cars.push(CarSummary::new(CarRow::try_from_row(&row)?, &state.media, &base));
	}

	Ok(Json(Page::new(cars, count, &query, &base, &uri)))
}

pub async fn get_car(state: State<AppState>, base: RequestBase, id: Path<Uuid>) -> Result<Json<CarDetail>, AppError> {
	Ok(Json(load_detail(&state, id.0, &base).await?))
}

pub async fn create_car(state: State<AppState>, _admin: Admin, base: RequestBase, mut payload: Payload) -> Result<(StatusCode, Json<CarDetail>), AppError> {
	let files = payload.take_files(UPLOAD_FIELD);
	let input: CarInput = payload.parse(WriteMode::Create)?;
	let checked = state.media.check(UPLOAD_FIELD, files)?;

	let id = Uuid::new_v4();
	let stored = state.media.store(ImageOwner::Car, id, checked).await?;
	if let Err(e) = insert(&state.db, id, input, &stored).await {
		state.media.remove_owner(ImageOwner::Car, id).await;
		return Err(e);
	}

	log::info!("car {} created with {} images", id, stored.len());
	Ok((StatusCode::CREATED, Json(load_detail(&state, id, &base).await?)))
}

pub async fn replace_car(state: State<AppState>, admin: Admin, base: RequestBase, id: Path<Uuid>, payload: Payload) -> Result<Json<CarDetail>, AppError> {
	write_car(state, admin, base, id.0, payload, WriteMode::Replace).await
}

pub async fn patch_car(state: State<AppState>, admin: Admin, base: RequestBase, id: Path<Uuid>, payload: Payload) -> Result<Json<CarDetail>, AppError> {
	write_car(state, admin, base, id.0, payload, WriteMode::Patch).await
}

async fn write_car(state: State<AppState>, _admin: Admin, base: RequestBase, id: Uuid, mut payload: Payload, mode: WriteMode) -> Result<Json<CarDetail>, AppError> {
	let files = payload.take_files(UPLOAD_FIELD);
	let input: CarInput = payload.parse(mode)?;
	let checked = state.media.check(UPLOAD_FIELD, files)?;

	let stored = state.media.store(ImageOwner::Car, id, checked).await?;
	if let Err(e) = update(&state.db, id, input, &stored).await {
		state.media.discard(&stored).await;
		return Err(e);
	}

	log::info!("car {} updated, {} images appended", id, stored.len());
	Ok(Json(load_detail(&state, id, &base).await?))
}

pub async fn delete_car(state: State<AppState>, _admin: Admin, id: Path<Uuid>) -> Result<StatusCode, AppError> {
	let deleted = state.db.execute("DELETE FROM cars_detail WHERE id = $1", &[&id.0]).await?;
	if deleted == 0 {
		return Err(AppError::NotFound);
	}

	state.media.remove_owner(ImageOwner::Car, id.0).await;
	log::info!("car {} deleted", id.0);
	Ok(StatusCode::NO_CONTENT)
}

/// Appends the `images` parts of a multipart request to the gallery.
pub async fn add_images(state: State<AppState>, _admin: Admin, base: RequestBase, id: Path<Uuid>, mut payload: Payload) -> Result<(StatusCode, Json<Value>), AppError> {
	let id = id.0;
	if state.db.query_opt("SELECT id FROM cars_detail WHERE id = $1", &[&id]).await?.is_none() {
		return Err(AppError::NotFound);
	}

	let files = payload.take_files(BULK_FIELD);
	if files.is_empty() {
		return Err(AppError::BadRequest("No images provided".to_owned()));
	}
	let checked = state.media.check(BULK_FIELD, files)?;
	let stored = state.media.store(ImageOwner::Car, id, checked).await?;

	let rows = match append_images(&state.db, id, &stored).await {
		Ok(rows) => rows,
		Err(e) => {
			state.media.discard(&stored).await;
			return Err(e);
		}
	};

	let images: Vec<ImageOut> = rows.into_iter().map(|row| ImageOut::new(ImageOwner::Car, row, &state.media, &base)).collect();
	log::info!("{} images added to car {}", images.len(), id);
	Ok((
		StatusCode::CREATED,
		Json(json!({
			"message": format!("{} images added successfully", images.len()),
			"images": images,
		})),
	))
}

pub async fn update_image(state: State<AppState>, _admin: Admin, base: RequestBase, ids: Path<(Uuid, Uuid)>, payload: Payload) -> Result<Json<ImageOut>, AppError> {
	let (id, image_id) = ids.0;
	gallery::patch_image(&state, ImageOwner::Car, id, image_id, payload, &base).await
}

pub async fn delete_image(state: State<AppState>, _admin: Admin, ids: Path<(Uuid, Uuid)>) -> Result<StatusCode, AppError> {
	let (id, image_id) = ids.0;
	gallery::remove_image(&state, ImageOwner::Car, id, image_id).await
}

async fn load_detail(state: &AppState, id: Uuid, base: &RequestBase) -> Result<CarDetail, AppError> {
	let statement = format!("SELECT {} FROM cars_detail WHERE id = $1", CAR_COLUMNS);
	let row = state.db.query_opt(statement.as_str(), &[&id]).await?.ok_or(AppError::NotFound)?;
	let car = CarRow::try_from_row(&row)?;

	let mut images = gallery::list(&*state.db, ImageOwner::Car, &[id]).await?;
	let images = gallery::render(ImageOwner::Car, images.remove(&id), &state.media, base);
	Ok(CarDetail::new(car, images, &state.media, base))
}

async fn insert(db: &DbClient, id: Uuid, input: CarInput, stored: &[StoredImage]) -> Result<(), AppError> {
	let mut client = db.dedicated().await?;
	let tx = client.transaction().await?;

	tx.execute(
		"INSERT INTO cars_detail (id, car_name, car_description, seating_capacity, extra_features) VALUES ($1, $2, $3, $4, $5)",
		&[
			&id,
			&input.car_name.unwrap_or_default(),
			&input.car_description.unwrap_or_default(),
			&input.seating_capacity.unwrap_or_default(),
			&JsonColumn(input.extra_features.unwrap_or_default()),
		],
	)
	.await?;
	gallery::append(&tx, ImageOwner::Car, id, stored).await?;

	tx.commit().await?;
	Ok(())
}

async fn update(db: &DbClient, id: Uuid, input: CarInput, stored: &[StoredImage]) -> Result<(), AppError> {
	let mut set = Assignments::new();
	set.set("car_name", input.car_name)
		.set("car_description", input.car_description)
		.set("seating_capacity", input.seating_capacity)
		.set("extra_features", input.extra_features.map(JsonColumn));

	let mut client = db.dedicated().await?;
	let tx = client.transaction().await?;

	if let Some((statement, params)) = set.into_update("cars_detail", id, true) {
		if tx.execute(statement.as_str(), &param_refs(&params)).await? == 0 {
			return Err(AppError::NotFound);
		}
	}
	gallery::append(&tx, ImageOwner::Car, id, stored).await?;

	tx.commit().await?;
	Ok(())
}

async fn append_images(db: &DbClient, id: Uuid, stored: &[StoredImage]) -> Result<Vec<ImageRow>, AppError> {
	let mut client = db.dedicated().await?;
	let tx = client.transaction().await?;
	let rows = gallery::append(&tx, ImageOwner::Car, id, stored).await?;
	tx.commit().await?;
	Ok(rows)
}
