pub mod locations;

use axum::{
	routing::{get, patch},
	Router,
};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/api/locations", get(locations::list_locations).post(locations::create_location))
		.route(
			"/api/locations/:id",
			get(locations::get_location)
				.put(locations::replace_location)
				.patch(locations::patch_location)
				.delete(locations::delete_location),
		)
		.route(
			"/api/locations/:id/images/:image_id",
			patch(locations::update_image).delete(locations::delete_image),
		)
}
