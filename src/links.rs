use std::convert::Infallible;

use async_trait::async_trait;
use axum::{
	extract::{FromRef, FromRequestParts},
	http::{header, request::Parts, Uri},
};
use reqwest::Url;

use crate::state::LinkPolicy;

/// Scheme and host the client used to reach us, for building absolute URLs.
/// `None` when the request carries no host and no public base URL is
/// configured; links are then left relative.
#[derive(Debug, Clone)]
pub struct RequestBase(Option<String>);

impl RequestBase {
	pub fn new(base: Option<String>) -> Self {
		RequestBase(base.map(|b| b.trim_end_matches('/').to_owned()))
	}

	/// Origin taken from the request itself. Forwarded headers are client
	/// controlled unless a proxy overwrites them, so they count only when
	/// `trust_forwarded` is set.
	pub fn from_parts(parts: &Parts, trust_forwarded: bool) -> Self {
		let header_value = |name: &str| {
			parts
				.headers
				.get(name)
				.and_then(|v| v.to_str().ok())
				.map(|v| v.split(',').next().unwrap_or(v).trim().to_owned())
				.filter(|v| !v.is_empty())
		};

		let forwarded = |name: &str| if trust_forwarded { header_value(name) } else { None };

		let host = forwarded("x-forwarded-host")
			.or_else(|| header_value(header::HOST.as_str()))
			.or_else(|| parts.uri.authority().map(|a| a.to_string()));
		let scheme = forwarded("x-forwarded-proto")
			.or_else(|| parts.uri.scheme_str().map(str::to_owned))
			.unwrap_or_else(|| "http".to_owned());

		RequestBase::new(host.map(|host| format!("{}://{}", scheme, host)))
	}

	/// `scheme://host` without a trailing slash, or empty when unknown.
	pub fn origin(&self) -> &str {
		self.0.as_deref().unwrap_or_default()
	}

	pub fn absolute(&self, path: &str) -> String {
		match &self.0 {
			Some(base) => format!("{}{}", base, path),
			None => path.to_owned(),
		}
	}

	/// Link to the same listing with `page` replaced; `None` drops the
	/// parameter, which is how page one is addressed.
	pub fn page_link(&self, uri: &Uri, page: Option<u32>) -> String {
		let target = self.absolute(&uri.to_string());
		let Ok(mut url) = Url::parse(&target).or_else(|_| Url::parse(&format!("http://relative{}", target))) else {
			return target;
		};

		let kept: Vec<(String, String)> = url.query_pairs().filter(|(k, _)| k != "page").map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
		url.set_query(None);
		if !kept.is_empty() || page.is_some() {
			let mut pairs = url.query_pairs_mut();
			for (k, v) in &kept {
				pairs.append_pair(k, v);
			}
			if let Some(page) = page {
				pairs.append_pair("page", &page.to_string());
			}
		}

		if self.0.is_some() {
			url.to_string()
		} else {
			match url.query() {
				Some(q) => format!("{}?{}", url.path(), q),
				None => url.path().to_owned(),
			}
		}
	}
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestBase
where
	S: Send + Sync,
	LinkPolicy: FromRef<S>,
{
	type Rejection = Infallible;

	async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
		let policy = LinkPolicy::from_ref(state);
		match policy.public_base_url {
			Some(base) => Ok(RequestBase::new(Some(base))),
			None => Ok(RequestBase::from_parts(parts, policy.trust_forwarded)),
		}
	}
}
