use std::collections::{BTreeMap, HashMap};

use axum::{
	extract::{Path, Query, State},
	http::Uri,
	Json,
};
use chrono::{DateTime, Utc};
use hyper::StatusCode;
use postgres_from_row::FromRow;
use serde_json::{json, Value};
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
	mailer::ReviewSummary,
	media::StoredImage,
	sql::{param_refs, Assignments},
	state::AppState,
};

use super::verification::verification_link;

pub const UPLOAD_FIELD: &str = "uploaded_images";

pub const REVIEW_LIST: ListSpec = ListSpec {
	table: "review_detail",
	filters: &[("rating", FilterKind::Integer), ("mail_authenticated_tag", FilterKind::Boolean)],
	search: &["customer_name", "cust_location"],
	ordering: &["created_at", "rating"],
};

const REVIEW_COLUMNS: &str = "id, customer_name, cust_location, rating, message_review, mail_authenticated_tag, customer_email, created_at";

#[derive(FromRow)]
pub struct ReviewRow {
	pub id: Uuid,
	pub customer_name: String,
	pub cust_location: String,
	pub rating: i32,
	pub message_review: String,
	pub mail_authenticated_tag: bool,
	pub customer_email: String,
	pub created_at: DateTime<Utc>,
}

#[derive(serde::Serialize)]
pub struct ReviewOut {
	pub id: Uuid,
	pub customer_name: String,
	pub cust_location: String,
	pub rating: i32,
	pub rating_stars: String,
	pub message_review: String,
	pub mail_authenticated_tag: bool,
	pub customer_email: String,
	pub images: Vec<ImageOut>,
	pub created_at: DateTime<Utc>,
}

/// Filled stars for the rating, hollow ones up to five.
pub fn rating_stars(rating: i32) -> String {
	let filled = rating.clamp(0, 5) as usize;
	format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct ReviewInput {
	#[serde(default)]
	#[validate(custom(function = "not_blank"), length(max = 100, message = "Ensure this field has no more than 100 characters."))]
	pub customer_name: Option<String>,
	#[serde(default)]
	#[validate(custom(function = "not_blank"), length(max = 200, message = "Ensure this field has no more than 200 characters."))]
	pub cust_location: Option<String>,
	#[serde(default, deserialize_with = "lenient::opt_i32")]
	#[validate(range(min = 1, max = 5, message = "Ensure this value is between 1 and 5."))]
	pub rating: Option<i32>,
	#[serde(default)]
	#[validate(custom(function = "not_blank"))]
	pub message_review: Option<String>,
	#[serde(default)]
	#[validate(
		email(message = "Enter a valid email address."),
		length(max = 254, message = "Ensure this field has no more than 254 characters.")
	)]
	pub customer_email: Option<String>,
}

impl Submission for ReviewInput {
	fn missing(&self) -> Vec<&'static str> {
		let mut missing = Vec::new();
		if self.customer_name.is_none() {
			missing.push("customer_name");
		}
		if self.cust_location.is_none() {
			missing.push("cust_location");
		}
		if self.rating.is_none() {
			missing.push("rating");
		}
		if self.message_review.is_none() {
			missing.push("message_review");
		}
		if self.customer_email.is_none() {
			missing.push("customer_email");
		}
		missing
	}
}

#[derive(Debug, PartialEq, serde::Serialize)]
pub struct RatingStatistics {
	pub total_reviews: i64,
	pub average_rating: f64,
	pub rating_distribution: BTreeMap<String, i64>,
	pub verified_reviews: i64,
}

impl RatingStatistics {
	/// `counts[i]` is the number of reviews rated `i + 1`.
	pub fn from_counts(counts: [i64; 5], verified: i64) -> Self {
		let total: i64 = counts.iter().sum();
		let weighted: i64 = counts.iter().enumerate().map(|(i, n)| (i as i64 + 1) * n).sum();
		let average_rating = if total == 0 {
			0.0
		} else {
			(weighted as f64 / total as f64 * 100.0).round() / 100.0
		};

		RatingStatistics {
			total_reviews: total,
			average_rating,
			rating_distribution: counts.iter().enumerate().map(|(i, n)| (format!("{}_star", i + 1), *n)).collect(),
			verified_reviews: verified,
		}
	}
}

async fn render_rows(state: &AppState, rows: Vec<Row>, base: &RequestBase) -> Result<Vec<ReviewOut>, AppError> {
	let rows = rows.iter().map(ReviewRow::try_from_row).collect::<Result<Vec<_>, _>>()?;
	let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
	let mut images = gallery::list(&*state.db, ImageOwner::Review, &ids).await?;

	Ok(rows
		.into_iter()
		.map(|row| ReviewOut {
			images: gallery::render(ImageOwner::Review, images.remove(&row.id), &state.media, base),
			rating_stars: rating_stars(row.rating),
			id: row.id,
			customer_name: row.customer_name,
			cust_location: row.cust_location,
			rating: row.rating,
			message_review: row.message_review,
			mail_authenticated_tag: row.mail_authenticated_tag,
			customer_email: row.customer_email,
			created_at: row.created_at,
		})
		.collect())
}

pub async fn list_reviews(
	state: State<AppState>,
	base: RequestBase,
	uri: Uri,
	params: Query<HashMap<String, String>>,
) -> Result<Json<Page<ReviewOut>>, AppError> {
	let query = REVIEW_LIST.compile(&params.0, state.page_sizes())?;
	let values = param_refs(&query.params);

	let count: i64 = state.db.query_one(query.count_sql().as_str(), &values).await?.try_get(0)?;
	query.check_page(count)?;

	let rows = state.db.query(query.select_sql(REVIEW_COLUMNS).as_str(), &values).await?;
	let reviews = render_rows(&state, rows, &base).await?;
	Ok(Json(Page::new(reviews, count, &query, &base, &uri)))
}

pub async fn get_review(state: State<AppState>, base: RequestBase, id: Path<Uuid>) -> Result<Json<ReviewOut>, AppError> {
	Ok(Json(load(&state, id.0, &base).await?))
}

/// Stores an unverified review and e-mails the operator an approval link.
pub async fn create_review(state: State<AppState>, base: RequestBase, mut payload: Payload) -> Result<(StatusCode, Json<ReviewOut>), AppError> {
	let files = payload.take_files(UPLOAD_FIELD);
	let input: ReviewInput = payload.parse(WriteMode::Create)?;
	let checked = state.media.check(UPLOAD_FIELD, files)?;

	let id = Uuid::new_v4();
	let token = state.verifier.issue(id).await?;

	let stored = state.media.store(ImageOwner::Review, id, checked).await?;
	if let Err(e) = insert(&state.db, id, input, &stored).await {
		state.media.remove_owner(ImageOwner::Review, id).await;
		return Err(e);
	}

	let review = load(&state, id, &base).await?;
	let message = state.notifier.review_pending(
		&ReviewSummary {
			customer_name: &review.customer_name,
			rating: review.rating,
			cust_location: &review.cust_location,
		},
		&verification_link(base.origin(), &token),
	);
	state.notifier.dispatch(message);

	log::info!("review {} submitted, awaiting verification", id);
	Ok((StatusCode::CREATED, Json(review)))
}

/// Redeems an approval link. The token is consumed even if the review was
/// deleted in the meantime.
pub async fn verify_review(state: State<AppState>, params: Query<HashMap<String, String>>) -> Result<Json<Value>, AppError> {
	let token = params.0.get("token").cloned().unwrap_or_default();
	let id = state.verifier.redeem(&token).await?;

	let updated = state
		.db
		.execute("UPDATE review_detail SET mail_authenticated_tag = TRUE WHERE id = $1", &[&id])
		.await?;
	if updated == 0 {
		log::warn!("verification token redeemed for missing review {}", id);
		return Err(AppError::InvalidToken);
	}

	log::info!("review {} verified", id);
	Ok(Json(json!({ "message": "Review verified successfully" })))
}

pub async fn statistics(state: State<AppState>, _admin: Admin) -> Result<Json<RatingStatistics>, AppError> {
	let row = state
		.db
		.query_one(
			"SELECT \
				COUNT(*) FILTER (WHERE rating = 1), \
				COUNT(*) FILTER (WHERE rating = 2), \
				COUNT(*) FILTER (WHERE rating = 3), \
				COUNT(*) FILTER (WHERE rating = 4), \
				COUNT(*) FILTER (WHERE rating = 5), \
				COUNT(*) FILTER (WHERE mail_authenticated_tag) \
			FROM review_detail",
			&[],
		)
		.await?;

	let mut counts = [0i64; 5];
	for (i, count) in counts.iter_mut().enumerate() {
		*count = row.try_get(i)?;
	}
	Ok(Json(RatingStatistics::from_counts(counts, row.try_get(5)?)))
}

pub async fn replace_review(state: State<AppState>, admin: Admin, base: RequestBase, id: Path<Uuid>, payload: Payload) -> Result<Json<ReviewOut>, AppError> {
	write_review(state, admin, base, id.0, payload, WriteMode::Replace).await
}

pub async fn patch_review(state: State<AppState>, admin: Admin, base: RequestBase, id: Path<Uuid>, payload: Payload) -> Result<Json<ReviewOut>, AppError> {
	write_review(state, admin, base, id.0, payload, WriteMode::Patch).await
}

async fn write_review(state: State<AppState>, _admin: Admin, base: RequestBase, id: Uuid, mut payload: Payload, mode: WriteMode) -> Result<Json<ReviewOut>, AppError> {
	let files = payload.take_files(UPLOAD_FIELD);
	let input: ReviewInput = payload.parse(mode)?;
	let checked = state.media.check(UPLOAD_FIELD, files)?;

	let stored = state.media.store(ImageOwner::Review, id, checked).await?;
	if let Err(e) = update(&state.db, id, input, &stored).await {
		state.media.discard(&stored).await;
		return Err(e);
	}

	log::info!("review {} updated, {} images appended", id, stored.len());
	Ok(Json(load(&state, id, &base).await?))
}

pub async fn delete_review(state: State<AppState>, _admin: Admin, id: Path<Uuid>) -> Result<StatusCode, AppError> {
	let deleted = state.db.execute("DELETE FROM review_detail WHERE id = $1", &[&id.0]).await?;
	if deleted == 0 {
		return Err(AppError::NotFound);
	}

	state.media.remove_owner(ImageOwner::Review, id.0).await;
	log::info!("review {} deleted", id.0);
	Ok(StatusCode::NO_CONTENT)
}

async fn load(state: &AppState, id: Uuid, base: &RequestBase) -> Result<ReviewOut, AppError> {
	let statement = format!("SELECT {} FROM review_detail WHERE id = $1", REVIEW_COLUMNS);
	let row = state.db.query_opt(statement.as_str(), &[&id]).await?.ok_or(AppError::NotFound)?;
	render_rows(state, vec![row], base).await?.pop().ok_or(AppError::NotFound)
}

async fn insert(db: &DbClient, id: Uuid, input: ReviewInput, stored: &[StoredImage]) -> Result<(), AppError> {
	let mut client = db.dedicated().await?;
	let tx = client.transaction().await?;

	tx.execute(
		"INSERT INTO review_detail (id, customer_name, cust_location, rating, message_review, customer_email) \
		 VALUES ($1, $2, $3, $4, $5, $6)",
		&[
			&id,
			&input.customer_name.unwrap_or_default(),
			&input.cust_location.unwrap_or_default(),
			&input.rating.unwrap_or_default(),
			&input.message_review.unwrap_or_default(),
			&input.customer_email.unwrap_or_default(),
		],
	)
	.await?;
	gallery::append(&tx, ImageOwner::Review, id, stored).await?;

	tx.commit().await?;
	Ok(())
}

async fn update(db: &DbClient, id: Uuid, input: ReviewInput, stored: &[StoredImage]) -> Result<(), AppError> {
	let mut set = Assignments::new();
	set.set("customer_name", input.customer_name)
		.set("cust_location", input.cust_location)
		.set("rating", input.rating)
		.set("message_review", input.message_review)
		.set("customer_email", input.customer_email);

	let mut client = db.dedicated().await?;
	let tx = client.transaction().await?;

	if let Some((statement, params)) = set.into_update("review_detail", id, false) {
		if tx.execute(statement.as_str(), &param_refs(&params)).await? == 0 {
			return Err(AppError::NotFound);
		}
	}
	gallery::append(&tx, ImageOwner::Review, id, stored).await?;

	tx.commit().await?;
	Ok(())
}
