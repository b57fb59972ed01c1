use std::collections::HashMap;

use axum::{
	extract::{Path, Query, State},
	http::Uri,
	Json,
};
use chrono::{DateTime, Utc};
use hyper::StatusCode;
use postgres_from_row::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
	auth::Admin,
	error::AppError,
	forms::{lenient, not_blank, Payload, Submission, WriteMode},
	gallery::ImageOwner,
	links::RequestBase,
	listing::{FilterKind, ListSpec, Page},
	locations::locations::{self as location_views, LocationOut},
	sql::{param_refs, Assignments},
	state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
	Adventure,
	Family,
	Romantic,
	Business,
	Pilgrimage,
	Wildlife,
}

impl Category {
	pub const ALL: [Category; 6] = [
		Category::Adventure,
		Category::Family,
		Category::Romantic,
		Category::Business,
		Category::Pilgrimage,
		Category::Wildlife,
	];

	pub const VALUES: &'static [&'static str] = &["adventure", "family", "romantic", "business", "pilgrimage", "wildlife"];

	pub fn value(self) -> &'static str {
		match self {
			Category::Adventure => "adventure",
			Category::Family => "family",
			Category::Romantic => "romantic",
			Category::Business => "business",
			Category::Pilgrimage => "pilgrimage",
			Category::Wildlife => "wildlife",
		}
	}

	pub fn label(self) -> &'static str {
		match self {
			Category::Adventure => "Adventure",
			Category::Family => "Family",
			Category::Romantic => "Romantic",
			Category::Business => "Business",
			Category::Pilgrimage => "Pilgrimage",
			Category::Wildlife => "Wildlife",
		}
	}
}

#[derive(Debug, serde::Serialize)]
pub struct CategoryChoice {
	pub value: &'static str,
	pub label: &'static str,
}

pub const PACKAGE_LIST: ListSpec = ListSpec {
	table: "package_details",
	filters: &[
		("package_category", FilterKind::Choice(Category::VALUES)),
		("duration", FilterKind::Integer),
	],
	search: &["package_name", "location"],
	ordering: &["created_at", "duration"],
};

const PACKAGE_COLUMNS: &str = "id, package_name, package_category, duration, location, created_at, updated_at, \
	(SELECT COUNT(*) FROM location_detail l WHERE l.pkg_id = package_details.id) AS locations_count";

#[derive(FromRow)]
pub struct PackageRow {
	pub id: Uuid,
	pub package_name: String,
	pub package_category: String,
	pub duration: i32,
	pub location: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub locations_count: i64,
}

#[derive(serde::Serialize)]
pub struct PackageDetail {
	pub id: Uuid,
	pub package_name: String,
	pub package_category: String,
	pub duration: i32,
	pub location: String,
	pub locations: Vec<LocationOut>,
	pub locations_count: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Projection used by the list endpoint.
#[derive(serde::Serialize)]
pub struct PackageSummary {
	pub id: Uuid,
	pub package_name: String,
	pub package_category: String,
	pub duration: i32,
	pub location: String,
	pub locations_count: i64,
	pub created_at: DateTime<Utc>,
}

impl From<PackageRow> for PackageSummary {
	fn from(row: PackageRow) -> Self {
		PackageSummary {
			id: row.id,
			package_name: row.package_name,
			package_category: row.package_category,
			duration: row.duration,
			location: row.location,
			locations_count: row.locations_count,
			created_at: row.created_at,
		}
	}
}

fn known_category(value: &str) -> Result<(), ValidationError> {
	if Category::VALUES.contains(&value) {
		return Ok(());
	}
	let mut err = ValidationError::new("invalid_choice");
	err.message = Some(format!("\"{}\" is not a valid choice.", value).into());
	Err(err)
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct PackageInput {
	#[serde(default)]
	#[validate(custom(function = "not_blank"), length(max = 200, message = "Ensure this field has no more than 200 characters."))]
	pub package_name: Option<String>,
	#[serde(default)]
	#[validate(custom(function = "known_category"))]
	pub package_category: Option<String>,
	#[serde(default, deserialize_with = "lenient::opt_i32")]
	#[validate(range(min = 0, message = "Ensure this value is greater than or equal to 0."))]
	pub duration: Option<i32>,
	#[serde(default)]
	#[validate(custom(function = "not_blank"), length(max = 200, message = "Ensure this field has no more than 200 characters."))]
	pub location: Option<String>,
}

impl Submission for PackageInput {
	fn missing(&self) -> Vec<&'static str> {
		let mut missing = Vec::new();
		if self.package_name.is_none() {
			missing.push("package_name");
		}
		if self.package_category.is_none() {
			missing.push("package_category");
		}
		if self.duration.is_none() {
			missing.push("duration");
		}
		if self.location.is_none() {
			missing.push("location");
		}
		missing
	}
}

pub async fn categories() -> Json<Vec<CategoryChoice>> {
	let choices = Category::ALL
		.iter()
		.map(|c| CategoryChoice {
			value: c.value(),
			label: c.label(),
		})
		.collect();
	Json(choices)
}

pub async fn list_packages(
	state: State<AppState>,
	base: RequestBase,
	uri: Uri,
	params: Query<HashMap<String, String>>,
) -> Result<Json<Page<PackageSummary>>, AppError> {
	let query = PACKAGE_LIST.compile(&params.0, state.page_sizes())?;
	let values = param_refs(&query.params);

	let count: i64 = state.db.query_one(query.count_sql().as_str(), &values).await?.try_get(0)?;
	query.check_page(count)?;

	let rows = state.db.query(query.select_sql(PACKAGE_COLUMNS).as_str(), &values).await?;
	let packages = rows
		.iter()
		.map(|row| PackageRow::try_from_row(row).map(PackageSummary::from))
		.collect::<Result<Vec<_>, _>>()?;

	Ok(Json(Page::new(packages, count, &query, &base, &uri)))
}

pub async fn get_package(state: State<AppState>, base: RequestBase, id: Path<Uuid>) -> Result<Json<PackageDetail>, AppError> {
	Ok(Json(load(&state, id.0, &base).await?))
}

pub async fn create_package(state: State<AppState>, _admin: Admin, base: RequestBase, payload: Payload) -> Result<(StatusCode, Json<PackageDetail>), AppError> {
	let input: PackageInput = payload.parse(WriteMode::Create)?;

	let id = Uuid::new_v4();
	state
		.db
		.execute(
			"INSERT INTO package_details (id, package_name, package_category, duration, location) VALUES ($1, $2, $3, $4, $5)",
			&[
				&id,
				&input.package_name.unwrap_or_default(),
				&input.package_category.unwrap_or_default(),
				&input.duration.unwrap_or_default(),
				&input.location.unwrap_or_default(),
			],
		)
		.await?;

	log::info!("package {} created", id);
	Ok((StatusCode::CREATED, Json(load(&state, id, &base).await?)))
}

pub async fn replace_package(state: State<AppState>, admin: Admin, base: RequestBase, id: Path<Uuid>, payload: Payload) -> Result<Json<PackageDetail>, AppError> {
	write_package(state, admin, base, id.0, payload, WriteMode::Replace).await
}

pub async fn patch_package(state: State<AppState>, admin: Admin, base: RequestBase, id: Path<Uuid>, payload: Payload) -> Result<Json<PackageDetail>, AppError> {
	write_package(state, admin, base, id.0, payload, WriteMode::Patch).await
}

async fn write_package(state: State<AppState>, _admin: Admin, base: RequestBase, id: Uuid, payload: Payload, mode: WriteMode) -> Result<Json<PackageDetail>, AppError> {
	let input: PackageInput = payload.parse(mode)?;

	let mut set = Assignments::new();
	set.set("package_name", input.package_name)
		.set("package_category", input.package_category)
		.set("duration", input.duration)
		.set("location", input.location);

	if let Some((statement, params)) = set.into_update("package_details", id, true) {
		if state.db.execute(statement.as_str(), &param_refs(&params)).await? == 0 {
			return Err(AppError::NotFound);
		}
	}

	log::info!("package {} updated", id);
	Ok(Json(load(&state, id, &base).await?))
}

/// Deleting a package cascades to its locations, so their media goes too.
pub async fn delete_package(state: State<AppState>, _admin: Admin, id: Path<Uuid>) -> Result<StatusCode, AppError> {
	let id = id.0;
	let locations: Vec<Uuid> = state
		.db
		.query("SELECT id FROM location_detail WHERE pkg_id = $1", &[&id])
		.await?
		.iter()
		.map(|row| row.try_get(0))
		.collect::<Result<_, _>>()?;

	if state.db.execute("DELETE FROM package_details WHERE id = $1", &[&id]).await? == 0 {
		return Err(AppError::NotFound);
	}

	for location in &locations {
		state.media.remove_owner(ImageOwner::Location, *location).await;
	}
	log::info!("package {} deleted with {} locations", id, locations.len());
	Ok(StatusCode::NO_CONTENT)
}

async fn load(state: &AppState, id: Uuid, base: &RequestBase) -> Result<PackageDetail, AppError> {
	let statement = format!("SELECT {} FROM package_details WHERE id = $1", PACKAGE_COLUMNS);
	let row = state.db.query_opt(statement.as_str(), &[&id]).await?.ok_or(AppError::NotFound)?;
	let row = PackageRow::try_from_row(&row)?;
	let locations = location_views::for_package(state, id, base).await?;

	Ok(PackageDetail {
		id: row.id,
		package_name: row.package_name,
		package_category: row.package_category,
		duration: row.duration,
		location: row.location,
		locations,
		locations_count: row.locations_count,
		created_at: row.created_at,
		updated_at: row.updated_at,
	})
}
