pub mod review;
pub mod verification;

use axum::{routing::get, Router};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/api/reviews", get(review::list_reviews).post(review::create_review))
		.route("/api/reviews/statistics", get(review::statistics))
		.route(verification::VERIFY_PATH, get(review::verify_review))
		.route(
			"/api/reviews/:id",
			get(review::get_review)
				.put(review::replace_review)
				.patch(review::patch_review)
				.delete(review::delete_review),
		)
}
