use tokio_postgres::types::ToSql;

pub type SqlParam = Box<dyn ToSql + Sync + Send>;

pub fn param_refs(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
	params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect()
}

/// Collects `column = $n` pairs for an UPDATE built from optional fields.
#[derive(Default)]
pub struct Assignments {
	columns: Vec<&'static str>,
	params: Vec<SqlParam>,
}

impl Assignments {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set<T>(&mut self, column: &'static str, value: Option<T>) -> &mut Self
	where
		T: ToSql + Sync + Send + 'static,
	{
		if let Some(value) = value {
			self.columns.push(column);
			self.params.push(Box::new(value));
		}
		self
	}

	pub fn is_empty(&self) -> bool {
		self.columns.is_empty()
	}

	/// Builds `UPDATE <table> SET ... WHERE id = $n`. With `touch` the
	/// `updated_at` column is refreshed even when nothing else changes.
	pub fn into_update(self, table: &str, id: uuid::Uuid, touch: bool) -> Option<(String, Vec<SqlParam>)> {
		if self.columns.is_empty() && !touch {
			return None;
		}

		let mut sets: Vec<String> = self
			.columns
			.iter()
			.enumerate()
			.map(|(i, column)| format!("{} = ${}", quote(column), i + 1))
			.collect();
		if touch {
			sets.push("updated_at = now()".to_owned());
		}

		let mut params = self.params;
		params.push(Box::new(id));
		let statement = format!("UPDATE {} SET {} WHERE id = ${}", table, sets.join(", "), params.len());
		Some((statement, params))
	}
}

/// Quotes identifiers that collide with SQL keywords.
pub fn quote(column: &str) -> String {
	match column {
		"order" => "\"order\"".to_owned(),
		other => other.to_owned(),
	}
}
