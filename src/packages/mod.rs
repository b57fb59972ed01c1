pub mod packages;

use axum::{routing::get, Router};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/api/packages", get(packages::list_packages).post(packages::create_package))
		.route("/api/packages/categories", get(packages::categories))
		.route(
			"/api/packages/:id",
			get(packages::get_package)
				.put(packages::replace_package)
				.patch(packages::patch_package)
				.delete(packages::delete_package),
		)
}
