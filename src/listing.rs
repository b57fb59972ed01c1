//! Filtering, search, ordering and pagination for list endpoints.
//!
//! Each entity declares a [`ListSpec`] whitelist. Query parameters outside
//! the whitelist are ignored; values are always bound as parameters, only
//! whitelisted column names are spliced into the statement.

use std::collections::HashMap;

use axum::http::Uri;
use serde::Serialize;
use uuid::Uuid;

use crate::{
	error::AppError,
	links::RequestBase,
	sql::SqlParam,
};

#[derive(Debug, Clone, Copy)]
pub enum FilterKind {
	Integer,
	Boolean,
	Uuid,
	Choice(&'static [&'static str]),
}

pub struct ListSpec {
	pub table: &'static str,
	pub filters: &'static [(&'static str, FilterKind)],
	/// SQL expressions matched case-insensitively against each search term.
	pub search: &'static [&'static str],
	pub ordering: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub struct PageSizes {
	pub default: u32,
	pub max: u32,
}

pub struct ListQuery {
	table: &'static str,
	where_clause: String,
	order_clause: String,
	pub params: Vec<SqlParam>,
	pub page: u32,
	pub page_size: u32,
}

impl ListSpec {
	pub fn compile(&self, query: &HashMap<String, String>, sizes: PageSizes) -> Result<ListQuery, AppError> {
		let mut conditions: Vec<String> = Vec::new();
		let mut params: Vec<SqlParam> = Vec::new();

		for (column, kind) in self.filters {
			let Some(raw) = query.get(*column).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
				continue;
			};
			params.push(parse_filter(column, *kind, raw)?);
			conditions.push(format!("{} = ${}", column, params.len()));
		}

		if let Some(search) = query.get("search") {
			for term in search_terms(search) {
				params.push(Box::new(format!("%{}%", escape_like(term))));
				let n = params.len();
				let any_field: Vec<String> = self.search.iter().map(|field| format!("{} ILIKE ${}", field, n)).collect();
				conditions.push(format!("({})", any_field.join(" OR ")));
			}
		}

		let where_clause = if conditions.is_empty() {
			String::new()
		} else {
			format!(" WHERE {}", conditions.join(" AND "))
		};

		let page = match query.get("page") {
			None => 1,
			Some(raw) => match raw.parse::<u32>() {
				Ok(page) if page >= 1 => page,
				_ => return Err(AppError::NotFound),
			},
		};
		let page_size = query
			.get("page_size")
			.and_then(|raw| raw.parse::<u32>().ok())
			.filter(|size| *size > 0)
			.map(|size| size.min(sizes.max))
			.unwrap_or(sizes.default);

		Ok(ListQuery {
			table: self.table,
			where_clause,
			order_clause: self.order_clause(query.get("ordering").map(String::as_str)),
			params,
			page,
			page_size,
		})
	}

	fn order_clause(&self, requested: Option<&str>) -> String {
		let mut terms: Vec<String> = Vec::new();
		for item in requested.unwrap_or_default().split(',') {
			let item = item.trim();
			let (column, direction) = match item.strip_prefix('-') {
				Some(column) => (column, "DESC"),
				None => (item, "ASC"),
			};
			if self.ordering.contains(&column) {
				terms.push(format!("{} {}", column, direction));
			}
		}
		if terms.is_empty() {
			terms.push("created_at DESC".to_owned());
		}
		terms.push("id ASC".to_owned());
		format!(" ORDER BY {}", terms.join(", "))
	}
}

impl ListQuery {
	pub fn count_sql(&self) -> String {
		format!("SELECT COUNT(*) FROM {}{}", self.table, self.where_clause)
	}

	pub fn select_sql(&self, columns: &str) -> String {
		format!(
			"SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
			columns,
			self.table,
			self.where_clause,
			self.order_clause,
			self.page_size,
			self.offset()
		)
	}

	pub fn offset(&self) -> u64 {
		u64::from(self.page - 1) * u64::from(self.page_size)
	}

	/// Pages past the end are not found, except the first page of an empty list.
	pub fn check_page(&self, count: i64) -> Result<(), AppError> {
		if self.page > 1 && self.offset() >= count.max(0) as u64 {
			return Err(AppError::NotFound);
		}
		Ok(())
	}
}

fn parse_filter(column: &str, kind: FilterKind, raw: &str) -> Result<SqlParam, AppError> {
	match kind {
		FilterKind::Integer => raw
			.parse::<i32>()
			.map(|v| Box::new(v) as SqlParam)
			.map_err(|_| AppError::field(column, "Enter a number.")),
		FilterKind::Boolean => match raw.to_ascii_lowercase().as_str() {
			"true" | "1" => Ok(Box::new(true)),
			"false" | "0" => Ok(Box::new(false)),
			_ => Err(AppError::field(column, "Select a valid choice.")),
		},
		FilterKind::Uuid => Uuid::parse_str(raw)
			.map(|v| Box::new(v) as SqlParam)
			.map_err(|_| AppError::field(column, "Enter a valid UUID.")),
		FilterKind::Choice(choices) => {
			if choices.contains(&raw) {
				Ok(Box::new(raw.to_owned()))
			} else {
				Err(AppError::field(
					column,
					format!("Select a valid choice. {} is not one of the available choices.", raw),
				))
			}
		}
	}
}

fn search_terms(search: &str) -> impl Iterator<Item = &str> {
	search.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty())
}

fn escape_like(term: &str) -> String {
	term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Paginated response envelope.
#[derive(Debug, Serialize)]
pub struct Page<T> {
	pub count: i64,
	pub next: Option<String>,
	pub previous: Option<String>,
	pub results: Vec<T>,
}

impl<T> Page<T> {
	pub fn new(results: Vec<T>, count: i64, query: &ListQuery, base: &RequestBase, uri: &Uri) -> Self {
		let seen = query.offset() + results.len() as u64;
		let next = (seen < count.max(0) as u64).then(|| base.page_link(uri, Some(query.page + 1)));
		let previous = match query.page {
			1 => None,
			2 => Some(base.page_link(uri, None)),
			page => Some(base.page_link(uri, Some(page - 1))),
		};

		Page { count, next, previous, results }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const CARS: ListSpec = ListSpec {
		table: "cars_detail",
		filters: &[("seating_capacity", FilterKind::Integer)],
		search: &["car_name", "car_description", "seating_capacity::text"],
		ordering: &["created_at", "seating_capacity", "car_name"],
	};

	const SIZES: PageSizes = PageSizes { default: 20, max: 100 };

	fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
		pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
	}

	#[test]
	fn defaults_to_newest_first_without_conditions() {
		let query = CARS.compile(&HashMap::new(), SIZES).unwrap();
		assert_eq!(query.count_sql(), "SELECT COUNT(*) FROM cars_detail");
		assert_eq!(
			query.select_sql("id"),
			"SELECT id FROM cars_detail ORDER BY created_at DESC, id ASC LIMIT 20 OFFSET 0"
		);
		assert!(query.params.is_empty());
	}

	#[test]
	fn filters_and_search_terms_are_bound_in_order() {
		let query = CARS
			.compile(&params(&[("seating_capacity", "7"), ("search", "suv, diesel")]), SIZES)
			.unwrap();
		assert_eq!(
			query.count_sql(),
			"SELECT COUNT(*) FROM cars_detail WHERE seating_capacity = $1 \
			 AND (car_name ILIKE $2 OR car_description ILIKE $2 OR seating_capacity::text ILIKE $2) \
			 AND (car_name ILIKE $3 OR car_description ILIKE $3 OR seating_capacity::text ILIKE $3)"
		);
		assert_eq!(query.params.len(), 3);
	}

	#[test]
	fn ordering_keeps_whitelisted_fields_only() {
		let query = CARS
			.compile(&params(&[("ordering", "-seating_capacity,password,car_name")]), SIZES)
			.unwrap();
		assert!(query
			.select_sql("id")
			.contains(" ORDER BY seating_capacity DESC, car_name ASC, id ASC "));

		let fallback = CARS.compile(&params(&[("ordering", "password")]), SIZES).unwrap();
		assert!(fallback.select_sql("id").contains(" ORDER BY created_at DESC, id ASC "));
	}

	#[test]
	fn bad_filter_values_are_field_errors() {
		let Err(AppError::Validation(fields)) = CARS.compile(&params(&[("seating_capacity", "many")]), SIZES) else {
			panic!("expected validation error");
		};
		assert_eq!(fields["seating_capacity"], vec!["Enter a number."]);
	}

	#[test]
	fn empty_filter_values_are_ignored() {
		let query = CARS.compile(&params(&[("seating_capacity", "")]), SIZES).unwrap();
		assert!(query.params.is_empty());
	}

	#[test]
	fn choice_and_boolean_filters() {
		let spec = ListSpec {
			table: "package_details",
			filters: &[
				("package_category", FilterKind::Choice(&["family", "wildlife"])),
				("mail_authenticated_tag", FilterKind::Boolean),
			],
			search: &[],
			ordering: &[],
		};
		assert!(spec
			.compile(&params(&[("package_category", "wildlife"), ("mail_authenticated_tag", "True")]), SIZES)
			.is_ok());
		assert!(matches!(
			spec.compile(&params(&[("package_category", "space")]), SIZES),
			Err(AppError::Validation(_))
		));
		assert!(matches!(
			spec.compile(&params(&[("mail_authenticated_tag", "maybe")]), SIZES),
			Err(AppError::Validation(_))
		));
	}

	#[test]
	fn page_size_is_capped_and_offset_follows_page() {
		let query = CARS.compile(&params(&[("page", "3"), ("page_size", "500")]), SIZES).unwrap();
		assert_eq!(query.page_size, 100);
		assert_eq!(query.offset(), 200);
		assert!(query.check_page(250).is_ok());
		assert!(matches!(query.check_page(200), Err(AppError::NotFound)));
	}

	#[test]
	fn invalid_page_is_not_found() {
		assert!(matches!(CARS.compile(&params(&[("page", "0")]), SIZES), Err(AppError::NotFound)));
		assert!(matches!(CARS.compile(&params(&[("page", "two")]), SIZES), Err(AppError::NotFound)));
	}

	#[test]
	fn like_wildcards_in_terms_are_escaped() {
		assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
	}

	#[test]
	fn page_envelope_links_neighbouring_pages() {
		let base = RequestBase::new(Some("http://api.test".to_owned()));
		let uri: Uri = "/api/cars?page=2&search=suv".parse().unwrap();
		let query = CARS.compile(&params(&[("page", "2"), ("page_size", "2")]), SIZES).unwrap();

		let page = Page::new(vec![1, 2], 5, &query, &base, &uri);
		assert_eq!(page.next.as_deref(), Some("http://api.test/api/cars?search=suv&page=3"));
		assert_eq!(page.previous.as_deref(), Some("http://api.test/api/cars?search=suv"));

		let query = CARS.compile(&params(&[("page", "3"), ("page_size", "2")]), SIZES).unwrap();
		let last = Page::new(vec![5], 5, &query, &base, &uri);
		assert!(last.next.is_none());
	}
}
