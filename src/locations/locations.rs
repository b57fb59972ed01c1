use std::collections::HashMap;

use axum::{
	extract::{Path, Query, State},
	http::Uri,
	Json,
};
use chrono::{DateTime, Utc};
use hyper::StatusCode;
use postgres_from_row::FromRow;
use tokio_postgres::Row;
use uuid::Uuid;
use validator::Validate;

use crate::{
	auth::Admin,
	db_client::DbClient,
	error::AppError,
	forms::{lenient, not_blank, Payload, Submission, WriteMode},
	gallery::{self, ImageOut, ImageOwner},
	links::RequestBase,
	listing::{FilterKind, ListSpec, Page},
	media::StoredImage,
	sql::{param_refs, Assignments},
	state::AppState,
};

pub const UPLOAD_FIELD: &str = "uploaded_images";

const PACKAGE_FK: &str = "location_detail_pkg_id_fkey";

pub const LOCATION_LIST: ListSpec = ListSpec {
	table: "location_detail",
	filters: &[("pkg_id", FilterKind::Uuid)],
	search: &["place_name", "detail_summary"],
	ordering: &[],
};

pub const LOCATION_COLUMNS: &str = "id, pkg_id, place_name, detail_summary, created_at, updated_at, \
	(SELECT p.package_name FROM package_details p WHERE p.id = location_detail.pkg_id) AS package_name, \
	(SELECT i.image FROM location_images i WHERE i.location_id = location_detail.id AND i.is_primary LIMIT 1) AS primary_image";

#[derive(FromRow)]
pub struct LocationRow {
	pub id: Uuid,
	pub pkg_id: Uuid,
	pub place_name: String,
	pub detail_summary: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub package_name: Option<String>,
	pub primary_image: Option<String>,
}

#[derive(serde::Serialize)]
pub struct LocationOut {
	pub id: Uuid,
	pub pkg_id: Uuid,
	pub place_name: String,
	pub detail_summary: String,
	pub package_name: Option<String>,
	pub images: Vec<ImageOut>,
	pub primary_image: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct LocationInput {
	#[serde(default, deserialize_with = "lenient::opt_uuid")]
	pub pkg_id: Option<Uuid>,
	#[serde(default)]
	#[validate(custom(function = "not_blank"), length(max = 200, message = "Ensure this field has no more than 200 characters."))]
	pub place_name: Option<String>,
	#[serde(default)]
	#[validate(custom(function = "not_blank"))]
	pub detail_summary: Option<String>,
}

impl Submission for LocationInput {
	fn missing(&self) -> Vec<&'static str> {
		let mut missing = Vec::new();
		if self.pkg_id.is_none() {
			missing.push("pkg_id");
		}
		if self.place_name.is_none() {
			missing.push("place_name");
		}
		if self.detail_summary.is_none() {
			missing.push("detail_summary");
		}
		missing
	}
}

/// Loads the gallery of every row in one query and builds the output.
pub async fn render_rows(state: &AppState, rows: Vec<Row>, base: &RequestBase) -> Result<Vec<LocationOut>, AppError> {
	let rows = rows.iter().map(LocationRow::try_from_row).collect::<Result<Vec<_>, _>>()?;
	let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
	let mut images = gallery::list(&*state.db, ImageOwner::Location, &ids).await?;

	Ok(rows
		.into_iter()
		.map(|row| LocationOut {
			images: gallery::render(ImageOwner::Location, images.remove(&row.id), &state.media, base),
			primary_image: row.primary_image.map(|path| state.media.url(base, &path)),
			id: row.id,
			pkg_id: row.pkg_id,
			place_name: row.place_name,
			detail_summary: row.detail_summary,
			package_name: row.package_name,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
		.collect())
}

/// Locations of one package, newest first.
pub async fn for_package(state: &AppState, pkg_id: Uuid, base: &RequestBase) -> Result<Vec<LocationOut>, AppError> {
	let statement = format!(
		"SELECT {} FROM location_detail WHERE pkg_id = $1 ORDER BY created_at DESC, id ASC",
		LOCATION_COLUMNS
	);
	let rows = state.db.query(statement.as_str(), &[&pkg_id]).await?;
	render_rows(state, rows, base).await
}

pub async fn list_locations(
	state: State<AppState>,
	base: RequestBase,
	uri: Uri,
	params: Query<HashMap<String, String>>,
) -> Result<Json<Page<LocationOut>>, AppError> {
	let query = LOCATION_LIST.compile(&params.0, state.page_sizes())?;
	let values = param_refs(&query.params);

	let count: i64 = state.db.query_one(query.count_sql().as_str(), &values).await?.try_get(0)?;
	query.check_page(count)?;

	let rows = state.db.query(query.select_sql(LOCATION_COLUMNS).as_str(), &values).await?;
	let locations = render_rows(&state, rows, &base).await?;
	Ok(Json(Page::new(locations, count, &query, &base, &uri)))
}

pub async fn get_location(state: State<AppState>, base: RequestBase, id: Path<Uuid>) -> Result<Json<LocationOut>, AppError> {
	Ok(Json(load(&state, id.0, &base).await?))
}

pub async fn create_location(state: State<AppState>, _admin: Admin, base: RequestBase, mut payload: Payload) -> Result<(StatusCode, Json<LocationOut>), AppError> {
	let files = payload.take_files(UPLOAD_FIELD);
	let input: LocationInput = payload.parse(WriteMode::Create)?;
	let checked = state.media.check(UPLOAD_FIELD, files)?;

	let id = Uuid::new_v4();
	let stored = state.media.store(ImageOwner::Location, id, checked).await?;
	if let Err(e) = insert(&state.db, id, input, &stored).await {
		state.media.remove_owner(ImageOwner::Location, id).await;
		return Err(e);
	}

	log::info!("location {} created with {} images", id, stored.len());
	Ok((StatusCode::CREATED, Json(load(&state, id, &base).await?)))
}

pub async fn replace_location(state: State<AppState>, admin: Admin, base: RequestBase, id: Path<Uuid>, payload: Payload) -> Result<Json<LocationOut>, AppError> {
	write_location(state, admin, base, id.0, payload, WriteMode::Replace).await
}

pub async fn patch_location(state: State<AppState>, admin: Admin, base: RequestBase, id: Path<Uuid>, payload: Payload) -> Result<Json<LocationOut>, AppError> {
	write_location(state, admin, base, id.0, payload, WriteMode::Patch).await
}

async fn write_location(state: State<AppState>, _admin: Admin, base: RequestBase, id: Uuid, mut payload: Payload, mode: WriteMode) -> Result<Json<LocationOut>, AppError> {
	let files = payload.take_files(UPLOAD_FIELD);
	let input: LocationInput = payload.parse(mode)?;
	let checked = state.media.check(UPLOAD_FIELD, files)?;

	let stored = state.media.store(ImageOwner::Location, id, checked).await?;
	if let Err(e) = update(&state.db, id, input, &stored).await {
		state.media.discard(&stored).await;
		return Err(e);
	}

	log::info!("location {} updated, {} images appended", id, stored.len());
	Ok(Json(load(&state, id, &base).await?))
}

pub async fn delete_location(state: State<AppState>, _admin: Admin, id: Path<Uuid>) -> Result<StatusCode, AppError> {
	let deleted = state.db.execute("DELETE FROM location_detail WHERE id = $1", &[&id.0]).await?;
	if deleted == 0 {
		return Err(AppError::NotFound);
	}

	state.media.remove_owner(ImageOwner::Location, id.0).await;
	log::info!("location {} deleted", id.0);
	Ok(StatusCode::NO_CONTENT)
}

pub async fn update_image(state: State<AppState>, _admin: Admin, base: RequestBase, ids: Path<(Uuid, Uuid)>, payload: Payload) -> Result<Json<ImageOut>, AppError> {
	let (id, image_id) = ids.0;
	gallery::patch_image(&state, ImageOwner::Location, id, image_id, payload, &base).await
}

pub async fn delete_image(state: State<AppState>, _admin: Admin, ids: Path<(Uuid, Uuid)>) -> Result<StatusCode, AppError> {
	let (id, image_id) = ids.0;
	gallery::remove_image(&state, ImageOwner::Location, id, image_id).await
}

async fn load(state: &AppState, id: Uuid, base: &RequestBase) -> Result<LocationOut, AppError> {
	let statement = format!("SELECT {} FROM location_detail WHERE id = $1", LOCATION_COLUMNS);
	let row = state.db.query_opt(statement.as_str(), &[&id]).await?.ok_or(AppError::NotFound)?;
	render_rows(state, vec![row], base).await?.pop().ok_or(AppError::NotFound)
}

fn unknown_package(err: tokio_postgres::Error, pkg_id: Option<Uuid>) -> AppError {
	let message = match pkg_id {
		Some(id) => format!("Invalid pk \"{}\" - object does not exist.", id),
		None => "Invalid pk - object does not exist.".to_owned(),
	};
	AppError::from_constraint(err, &[(PACKAGE_FK, "pkg_id", message.as_str())])
}

async fn insert(db: &DbClient, id: Uuid, input: LocationInput, stored: &[StoredImage]) -> Result<(), AppError> {
	let mut client = db.dedicated().await?;
	let tx = client.transaction().await?;

	tx.execute(
		"INSERT INTO location_detail (id, pkg_id, place_name, detail_summary) VALUES ($1, $2, $3, $4)",
		&[
			&id,
			&input.pkg_id.unwrap_or_default(),
			&input.place_name.unwrap_or_default(),
			&input.detail_summary.unwrap_or_default(),
		],
	)
	.await
	.map_err(|e| unknown_package(e, input.pkg_id))?;
	gallery::append(&tx, ImageOwner::Location, id, stored).await?;

	tx.commit().await?;
	Ok(())
}

async fn update(db: &DbClient, id: Uuid, input: LocationInput, stored: &[StoredImage]) -> Result<(), AppError> {
	let pkg_id = input.pkg_id;
	let mut set = Assignments::new();
	set.set("pkg_id", input.pkg_id)
		.set("place_name", input.place_name)
		.set("detail_summary", input.detail_summary);

	let mut client = db.dedicated().await?;
	let tx = client.transaction().await?;

	if let Some((statement, params)) = set.into_update("location_detail", id, true) {
		let updated = tx
			.execute(statement.as_str(), &param_refs(&params))
			.await
			.map_err(|e| unknown_package(e, pkg_id))?;
		if updated == 0 {
			return Err(AppError::NotFound);
		}
	}
	gallery::append(&tx, ImageOwner::Location, id, stored).await?;

	tx.commit().await?;
	Ok(())
}
