//! End-to-end flows against a live PostgreSQL. Skipped unless
//! `TEST_DATABASE_URL` is set.

use std::{collections::HashMap, io::Cursor, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
	body::{to_bytes, Body},
	http::{header, Request, StatusCode},
	Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;
use travel_server::{
	cache::MemoryTokenCache,
	config::Config,
	db_client::DbClient,
	mailer::{MailMessage, Mailer, Notifier},
	review::verification::ReviewVerifier,
	router,
	state::AppState,
};
use uuid::Uuid;

const BOUNDARY: &str = "travel-test-boundary";

#[derive(Clone, Default)]
struct RecordingMailer {
	sent: Arc<Mutex<Vec<MailMessage>>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
	async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
		self.sent.lock().push(message.clone());
		Ok(())
	}
}

struct Harness {
	app: Router,
	db: DbClient,
	mailer: RecordingMailer,
	media_root: PathBuf,
	token: String,
}

impl Drop for Harness {
	fn drop(&mut self) {
		let _ = std::fs::remove_dir_all(&self.media_root);
	}
}

async fn harness() -> Option<Harness> {
	harness_with_pool(2).await
}

async fn harness_with_pool(pool_size: usize) -> Option<Harness> {
	let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
		eprintln!("TEST_DATABASE_URL not set, skipping");
		return None;
	};

	let media_root = std::env::temp_dir().join(format!("travel-scenarios-{}", Uuid::new_v4()));
	let vars: HashMap<&str, String> = HashMap::from([
		("DATABASE_URL", url.clone()),
		("JWT_SECRET", "scenario-secret".to_owned()),
		("ADMIN_USERNAME", "admin".to_owned()),
		("ADMIN_PASSWORD", "admin-pass".to_owned()),
		("OPERATOR_EMAIL", "owner@travel.test".to_owned()),
		("MEDIA_ROOT", media_root.display().to_string()),
	]);
	let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();

	let db = DbClient::connect(&url, pool_size).await.unwrap();
	db.migrate().await.unwrap();

	let mailer = RecordingMailer::default();
	let notifier = Notifier::new(Arc::new(mailer.clone()), config.mail.sender.clone(), config.mail.operator.clone());
	let verifier = ReviewVerifier::new(Arc::new(MemoryTokenCache::new()), config.review_token_ttl);
	let app = router(AppState::new(config, db.clone(), verifier, notifier));

	let (status, body) = call(&app, json_request("POST", "/api/auth/token", None, json!({ "username": "admin", "password": "admin-pass" }))).await;
	assert_eq!(status, StatusCode::OK);

	Some(Harness {
		app,
		db,
		mailer,
		media_root,
		token: body["token"].as_str().unwrap().to_owned(),
	})
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
	let response = app.clone().oneshot(request).await.unwrap();
	let status = response.status();
	let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
	(status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
	let mut builder = Request::builder()
		.method(method)
		.uri(uri)
		.header(header::HOST, "api.travel.test")
		.header(header::CONTENT_TYPE, "application/json");
	if let Some(token) = token {
		builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
	}
	builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
	Request::get(uri).header(header::HOST, "api.travel.test").body(Body::empty()).unwrap()
}

fn png() -> Vec<u8> {
	let mut out = Cursor::new(Vec::new());
	image::RgbImage::new(3, 3).write_to(&mut out, image::ImageFormat::Png).unwrap();
	out.into_inner()
}

fn form(method: &str, uri: &str, token: Option<&str>, fields: &[(&str, &str)], files: &[(&str, &str)]) -> Request<Body> {
	let mut body = Vec::new();
	for (name, value) in fields {
		body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
		body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n", name, value).as_bytes());
	}
	for (field, file_name) in files {
		body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
		body.extend_from_slice(
			format!("Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n", field, file_name).as_bytes(),
		);
		body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
		body.extend_from_slice(&png());
		body.extend_from_slice(b"\r\n");
	}
	body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

	let mut builder = Request::builder()
		.method(method)
		.uri(uri)
		.header(header::HOST, "api.travel.test")
		.header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY));
	if let Some(token) = token {
		builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
	}
	builder.body(Body::from(body)).unwrap()
}

fn multipart(uri: &str, token: &str, files: &[(&str, &str)]) -> Request<Body> {
	form("POST", uri, Some(token), &[], files)
}

fn delete(uri: &str, token: &str) -> Request<Body> {
	Request::delete(uri)
		.header(header::AUTHORIZATION, format!("Bearer {}", token))
		.body(Body::empty())
		.unwrap()
}

async fn image_rows(db: &DbClient, table: &str, column: &str, owner_id: &str) -> i64 {
	let owner_id = Uuid::parse_str(owner_id).unwrap();
	let statement = format!("SELECT COUNT(*) FROM {} WHERE {} = $1", table, column);
	db.query_one(statement.as_str(), &[&owner_id]).await.unwrap().get(0)
}

fn primaries(images: &Value) -> usize {
	images.as_array().unwrap().iter().filter(|i| i["is_primary"] == true).count()
}

fn orders(images: &Value) -> Vec<i64> {
	let mut orders: Vec<i64> = images.as_array().unwrap().iter().map(|i| i["order"].as_i64().unwrap()).collect();
	orders.sort_unstable();
	orders
}

async fn wait_for_mail(mailer: &RecordingMailer, customer: &str) -> MailMessage {
	for _ in 0..50 {
		if let Some(message) = mailer.sent.lock().iter().find(|m| m.body.contains(customer)).cloned() {
			return message;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	panic!("no approval mail for {}", customer);
}

#[tokio::test]
async fn submitted_review_is_verified_through_the_mailed_link() {
	let Some(h) = harness().await else {
		return;
	};
	let customer = format!("Asha {}", Uuid::new_v4());

	let (status, review) = call(
		&h.app,
		json_request(
			"POST",
			"/api/reviews",
			None,
			json!({
				"customer_name": customer,
				"cust_location": "Goa",
				"rating": 5,
				"message_review": "Wonderful trip",
				"customer_email": "asha@example.com",
				"mail_authenticated_tag": true,
			}),
		),
	)
	.await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(review["mail_authenticated_tag"], false);
	assert_eq!(review["rating_stars"], "★★★★★");
	let id = review["id"].as_str().unwrap().to_owned();

	let mail = wait_for_mail(&h.mailer, &customer).await;
	assert_eq!(mail.subject, "New Review Pending Approval");
	assert_eq!(mail.to, vec!["owner@travel.test"]);
	let link = mail.body.lines().last().unwrap().trim_start_matches("Approve here: ").to_owned();
	assert!(link.starts_with("http://api.travel.test/api/reviews/verify?token="));
	let path = link.trim_start_matches("http://api.travel.test");

	let (status, body) = call(&h.app, get(path)).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({ "message": "Review verified successfully" }));

	let (_, review) = call(&h.app, get(&format!("/api/reviews/{}", id))).await;
	assert_eq!(review["mail_authenticated_tag"], true);

	let (status, body) = call(&h.app, get(path)).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body, json!({ "error": "Invalid or expired token" }));

	let (status, _) = call(&h.app, get("/api/reviews/verify?token=made-up")).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bulk_upload_orders_images_and_sets_primary() {
	let Some(h) = harness().await else {
		return;
	};

	let (status, car) = call(
		&h.app,
		json_request(
			"POST",
			"/api/cars",
			Some(&h.token),
			json!({ "car_name": "Innova", "seating_capacity": 7, "extra_features": ["AC"] }),
		),
	)
	.await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(car["image_count"], 0);
	assert_eq!(car["primary_image"], Value::Null);
	let id = car["id"].as_str().unwrap().to_owned();

	let uri = format!("/api/cars/{}/add_images", id);
	let (status, body) = call(&h.app, multipart(&uri, &h.token, &[])).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body, json!({ "error": "No images provided" }));

	let files = [("images", "front.png"), ("images", "side.png"), ("images", "back.png")];
	let (status, body) = call(&h.app, multipart(&uri, &h.token, &files)).await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(body["message"], "3 images added successfully");
	let orders: Vec<i64> = body["images"].as_array().unwrap().iter().map(|i| i["order"].as_i64().unwrap()).collect();
	assert_eq!(orders, vec![1, 2, 3]);
	assert_eq!(body["images"][0]["is_primary"], true);

	let (_, car) = call(&h.app, get(&format!("/api/cars/{}", id))).await;
	assert_eq!(car["image_count"], 3);
	let primaries = car["images"].as_array().unwrap().iter().filter(|i| i["is_primary"] == true).count();
	assert_eq!(primaries, 1);
	assert!(car["primary_image"].as_str().unwrap().starts_with("http://api.travel.test/media/cars/"));

	let second = car["images"][1]["id"].as_str().unwrap().to_owned();
	let (status, image) = call(
		&h.app,
		json_request("PATCH", &format!("/api/cars/{}/images/{}", id, second), Some(&h.token), json!({ "is_primary": true })),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(image["is_primary"], true);

	let (_, car) = call(&h.app, get(&format!("/api/cars/{}", id))).await;
	let primaries: Vec<&Value> = car["images"].as_array().unwrap().iter().filter(|i| i["is_primary"] == true).collect();
	assert_eq!(primaries.len(), 1);
	assert_eq!(primaries[0]["id"], second.as_str());

	let (status, body) = call(
		&h.app,
		json_request("PATCH", &format!("/api/cars/{}/images/{}", id, second), Some(&h.token), json!({ "order": 1 })),
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert!(body.get("order").is_some());

	let media_path = primaries[0]["image"].as_str().unwrap().trim_start_matches("http://api.travel.test").to_owned();
	let response = h.app.clone().oneshot(get(&media_path)).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

	let request = Request::delete(format!("/api/cars/{}", id))
		.header(header::AUTHORIZATION, format!("Bearer {}", h.token))
		.body(Body::empty())
		.unwrap();
	let (status, _) = call(&h.app, request).await;
	assert_eq!(status, StatusCode::NO_CONTENT);
	assert!(!h.media_root.join("cars").join(&id).exists());
}

#[tokio::test]
async fn deleting_a_package_removes_its_locations() {
	let Some(h) = harness().await else {
		return;
	};

	let (status, package) = call(
		&h.app,
		json_request(
			"POST",
			"/api/packages",
			Some(&h.token),
			json!({ "package_name": "Goa Getaway", "package_category": "romantic", "duration": 4, "location": "Goa" }),
		),
	)
	.await;
	assert_eq!(status, StatusCode::CREATED);
	let pkg_id = package["id"].as_str().unwrap().to_owned();

	let (status, location) = call(
		&h.app,
		json_request(
			"POST",
			"/api/locations",
			Some(&h.token),
			json!({ "pkg_id": pkg_id, "place_name": "Baga Beach", "detail_summary": "Sunsets and shacks" }),
		),
	)
	.await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(location["package_name"], "Goa Getaway");
	let location_id = location["id"].as_str().unwrap().to_owned();

	let (_, package) = call(&h.app, get(&format!("/api/packages/{}", pkg_id))).await;
	assert_eq!(package["locations_count"], 1);
	assert_eq!(package["locations"][0]["id"], location_id.as_str());

	let (_, listed) = call(&h.app, get(&format!("/api/locations?pkg_id={}", pkg_id))).await;
	assert_eq!(listed["count"], 1);

	let request = Request::delete(format!("/api/packages/{}", pkg_id))
		.header(header::AUTHORIZATION, format!("Bearer {}", h.token))
		.body(Body::empty())
		.unwrap();
	let (status, _) = call(&h.app, request).await;
	assert_eq!(status, StatusCode::NO_CONTENT);

	let (status, _) = call(&h.app, get(&format!("/api/locations/{}", location_id))).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_package_and_anonymous_writes_are_rejected() {
	let Some(h) = harness().await else {
		return;
	};

	let (status, body) = call(
		&h.app,
		json_request(
			"POST",
			"/api/locations",
			Some(&h.token),
			json!({ "pkg_id": Uuid::new_v4(), "place_name": "Nowhere", "detail_summary": "-" }),
		),
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert!(body.get("pkg_id").is_some());

	let (status, _) = call(&h.app, json_request("POST", "/api/cars", None, json!({ "car_name": "X", "seating_capacity": 4 }))).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);

	let (status, _) = call(&h.app, get("/api/reviews/statistics")).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);

	let (status, _) = call(&h.app, get("/api/cars?page=9999")).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn concurrent_writes_wait_for_a_pooled_connection() {
	let Some(h) = harness_with_pool(2).await else {
		return;
	};
	assert_eq!(h.db.pool_size(), 2);

	let (status, car) = call(
		&h.app,
		json_request("POST", "/api/cars", Some(&h.token), json!({ "car_name": "Ertiga", "seating_capacity": 7 })),
	)
	.await;
	assert_eq!(status, StatusCode::CREATED);
	let uri = format!("/api/cars/{}", car["id"].as_str().unwrap());

	let writes: Vec<_> = (1..=24)
		.map(|seats| {
			let app = h.app.clone();
			let request = json_request("PATCH", &uri, Some(&h.token), json!({ "seating_capacity": seats }));
			tokio::spawn(async move { call(&app, request).await.0 })
		})
		.collect();

	for write in writes {
		assert_eq!(write.await.unwrap(), StatusCode::OK);
	}
}

#[tokio::test]
async fn multipart_create_and_update_attach_uploaded_images() {
	let Some(h) = harness().await else {
		return;
	};

	let (status, car) = call(
		&h.app,
		form(
			"POST",
			"/api/cars",
			Some(&h.token),
			&[("car_name", "Dzire"), ("seating_capacity", "4"), ("extra_features", "AC,GPS")],
			&[("uploaded_images", "front.png"), ("uploaded_images", "rear.png")],
		),
	)
	.await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(car["image_count"], 2);
	assert_eq!(primaries(&car["images"]), 1);
	let id = car["id"].as_str().unwrap().to_owned();

	let (status, car) = call(
		&h.app,
		form("PATCH", &format!("/api/cars/{}", id), Some(&h.token), &[("seating_capacity", "5")], &[("uploaded_images", "cabin.png")]),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(car["seating_capacity"], 5);
	assert_eq!(orders(&car["images"]), vec![1, 2, 3]);
	assert_eq!(primaries(&car["images"]), 1);

	let unknown = Uuid::new_v4();
	let (status, _) = call(
		&h.app,
		form("PATCH", &format!("/api/cars/{}", unknown), Some(&h.token), &[], &[("uploaded_images", "lost.png")]),
	)
	.await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert!(!h.media_root.join("cars").join(unknown.to_string()).exists());

	let customer = format!("Ravi {}", Uuid::new_v4());
	let (status, review) = call(
		&h.app,
		form(
			"POST",
			"/api/reviews",
			None,
			&[
				("customer_name", customer.as_str()),
				("cust_location", "Pune"),
				("rating", "4"),
				("message_review", "Clean car, on time"),
				("customer_email", "ravi@example.com"),
			],
			&[("uploaded_images", "smile.png"), ("uploaded_images", "car.png")],
		),
	)
	.await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(review["images"].as_array().unwrap().len(), 2);
	assert!(review["images"][0].get("is_primary").is_none());
	let review_id = review["id"].as_str().unwrap().to_owned();
	assert_eq!(image_rows(&h.db, "review_images", "review_id", &review_id).await, 2);

	let (status, _) = call(&h.app, delete(&format!("/api/reviews/{}", review_id), &h.token)).await;
	assert_eq!(status, StatusCode::NO_CONTENT);
	assert_eq!(image_rows(&h.db, "review_images", "review_id", &review_id).await, 0);

	let (status, _) = call(&h.app, delete(&format!("/api/cars/{}", id), &h.token)).await;
	assert_eq!(status, StatusCode::NO_CONTENT);
	assert_eq!(image_rows(&h.db, "car_images", "car_id", &id).await, 0);
}

#[tokio::test]
async fn location_gallery_keeps_one_primary_and_cascades_with_its_package() {
	let Some(h) = harness().await else {
		return;
	};

	let (status, package) = call(
		&h.app,
		json_request(
			"POST",
			"/api/packages",
			Some(&h.token),
			json!({ "package_name": "Kerala Backwaters", "package_category": "family", "duration": 5, "location": "Kerala" }),
		),
	)
	.await;
	assert_eq!(status, StatusCode::CREATED);
	let pkg_id = package["id"].as_str().unwrap().to_owned();

	let (status, location) = call(
		&h.app,
		form(
			"POST",
			"/api/locations",
			Some(&h.token),
			&[("pkg_id", pkg_id.as_str()), ("place_name", "Alleppey"), ("detail_summary", "Houseboats")],
			&[("uploaded_images", "boat.png"), ("uploaded_images", "canal.png")],
		),
	)
	.await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(primaries(&location["images"]), 1);
	assert_eq!(orders(&location["images"]), vec![1, 2]);
	let id = location["id"].as_str().unwrap().to_owned();

	let (status, location) = call(
		&h.app,
		form("PATCH", &format!("/api/locations/{}", id), Some(&h.token), &[], &[("uploaded_images", "sunset.png")]),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(orders(&location["images"]), vec![1, 2, 3]);
	assert_eq!(primaries(&location["images"]), 1);

	let other = location["images"]
		.as_array()
		.unwrap()
		.iter()
		.find(|i| i["is_primary"] == false)
		.unwrap()["id"]
		.as_str()
		.unwrap()
		.to_owned();
	let (status, _) = call(
		&h.app,
		json_request("PATCH", &format!("/api/locations/{}/images/{}", id, other), Some(&h.token), json!({ "is_primary": true })),
	)
	.await;
	assert_eq!(status, StatusCode::OK);

	let (_, location) = call(&h.app, get(&format!("/api/locations/{}", id))).await;
	assert_eq!(primaries(&location["images"]), 1);
	assert!(location["primary_image"].as_str().unwrap().contains(&format!("/media/locations/{}/", id)));
	assert_eq!(image_rows(&h.db, "location_images", "location_id", &id).await, 3);

	let (status, _) = call(&h.app, delete(&format!("/api/packages/{}", pkg_id), &h.token)).await;
	assert_eq!(status, StatusCode::NO_CONTENT);
	assert_eq!(image_rows(&h.db, "location_images", "location_id", &id).await, 0);
	assert!(!h.media_root.join("locations").join(&id).exists());
}

#[tokio::test]
async fn concurrent_bulk_uploads_to_an_empty_gallery_pick_one_primary() {
	let Some(h) = harness().await else {
		return;
	};

	let (status, car) = call(
		&h.app,
		json_request("POST", "/api/cars", Some(&h.token), json!({ "car_name": "Scorpio", "seating_capacity": 7 })),
	)
	.await;
	assert_eq!(status, StatusCode::CREATED);
	let id = car["id"].as_str().unwrap().to_owned();
	let uri = format!("/api/cars/{}/add_images", id);

	let files = [("images", "a.png"), ("images", "b.png")];
	let (first, second) = tokio::join!(
		call(&h.app, multipart(&uri, &h.token, &files)),
		call(&h.app, multipart(&uri, &h.token, &files))
	);
	assert_eq!(first.0, StatusCode::CREATED);
	assert_eq!(second.0, StatusCode::CREATED);

	let (_, car) = call(&h.app, get(&format!("/api/cars/{}", id))).await;
	assert_eq!(car["image_count"], 4);
	assert_eq!(primaries(&car["images"]), 1);
	assert_eq!(orders(&car["images"]), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn append_past_the_order_ceiling_is_a_field_error() {
	let Some(h) = harness().await else {
		return;
	};

	let (_, car) = call(
		&h.app,
		json_request("POST", "/api/cars", Some(&h.token), json!({ "car_name": "Bolero", "seating_capacity": 7 })),
	)
	.await;
	let id = car["id"].as_str().unwrap().to_owned();
	let uri = format!("/api/cars/{}/add_images", id);
	let (_, body) = call(&h.app, multipart(&uri, &h.token, &[("images", "a.png")])).await;
	let image = body["images"][0]["id"].as_str().unwrap().to_owned();

	let image_uri = format!("/api/cars/{}/images/{}", id, image);
	let (status, body) = call(&h.app, json_request("PATCH", &image_uri, Some(&h.token), json!({ "order": i32::MAX }))).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert!(body.get("order").is_some());

	let (status, _) = call(&h.app, json_request("PATCH", &image_uri, Some(&h.token), json!({ "order": i32::MAX - 1 }))).await;
	assert_eq!(status, StatusCode::OK);

	let (status, body) = call(&h.app, multipart(&uri, &h.token, &[("images", "b.png")])).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert!(body.get("order").is_some());
	assert_eq!(image_rows(&h.db, "car_images", "car_id", &id).await, 1);
}
