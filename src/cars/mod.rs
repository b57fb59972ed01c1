pub mod cars;

use axum::{
	routing::{get, patch, post},
	Router,
};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/api/cars", get(cars::list_cars).post(cars::create_car))
		.route(
			"/api/cars/:id",
			get(cars::get_car).put(cars::replace_car).patch(cars::patch_car).delete(cars::delete_car),
		)
		.route("/api/cars/:id/add_images", post(cars::add_images))
		.route("/api/cars/:id/images/:image_id", patch(cars::update_image).delete(cars::delete_image))
}
