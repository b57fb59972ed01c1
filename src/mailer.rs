use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
	pub from: String,
	pub to: Vec<String>,
	pub subject: String,
	pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
	async fn send(&self, message: &MailMessage) -> anyhow::Result<()>;
}

/// Posts messages to an HTTP mail relay.
pub struct HttpMailer {
	client: reqwest::Client,
	endpoint: String,
	api_key: Option<String>,
}

impl HttpMailer {
	pub fn new(endpoint: String, api_key: Option<String>) -> Self {
		HttpMailer {
			client: reqwest::Client::new(),
			endpoint,
			api_key,
		}
	}
}

#[async_trait]
impl Mailer for HttpMailer {
	async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
		let payload = json!({
			"sender": { "email": message.from },
			"to": message.to.iter().map(|email| json!({ "email": email })).collect::<Vec<_>>(),
			"subject": message.subject,
			"textContent": message.body,
		});

		let mut request = self.client.post(&self.endpoint).json(&payload);
		if let Some(key) = &self.api_key {
			request = request.header("api-key", key);
		}

		request
			.send()
			.await
			.context("mail relay unreachable")?
			.error_for_status()
			.context("mail relay rejected message")?;
		Ok(())
	}
}

/// Writes messages to the log instead of sending them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
	async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
		log::info!(
			"mail to {:?} from {}: {}\n{}",
			message.to,
			message.from,
			message.subject,
			message.body
		);
		Ok(())
	}
}

/// Review facts that go into the approval e-mail.
pub struct ReviewSummary<'a> {
	pub customer_name: &'a str,
	pub rating: i32,
	pub cust_location: &'a str,
}

/// Composes operator notifications and sends them off the request path.
#[derive(Clone)]
pub struct Notifier {
	mailer: Arc<dyn Mailer>,
	sender: String,
	operator: String,
}

impl Notifier {
	pub fn new(mailer: Arc<dyn Mailer>, sender: String, operator: String) -> Self {
		Notifier { mailer, sender, operator }
	}

	pub fn from_config(config: &MailConfig) -> Self {
		let mailer: Arc<dyn Mailer> = match &config.api_url {
			Some(url) => Arc::new(HttpMailer::new(url.clone(), config.api_key.clone())),
			None => {
				log::warn!("MAIL_API_URL not set, notifications are only logged");
				Arc::new(LogMailer)
			}
		};
		Notifier::new(mailer, config.sender.clone(), config.operator.clone())
	}

	pub fn review_pending(&self, review: &ReviewSummary<'_>, approve_link: &str) -> MailMessage {
		MailMessage {
			from: self.sender.clone(),
			to: vec![self.operator.clone()],
			subject: "New Review Pending Approval".to_owned(),
			body: format!(
				"A new review has been submitted:\n\n\
				 Customer: {}\n\
				 Rating: {}\n\
				 Location: {}\n\n\
				 Approve here: {}",
				review.customer_name, review.rating, review.cust_location, approve_link
			),
		}
	}

	/// Sends in the background; failures are logged, never returned.
	pub fn dispatch(&self, message: MailMessage) -> tokio::task::JoinHandle<()> {
		let mailer = self.mailer.clone();
		tokio::spawn(async move {
			match mailer.send(&message).await {
				Ok(()) => log::info!("notification '{}' sent to {:?}", message.subject, message.to),
				Err(e) => log::error!("notification '{}' to {:?} failed: {:#}", message.subject, message.to, e),
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct FailingMailer;

	#[async_trait]
	impl Mailer for FailingMailer {
		async fn send(&self, _message: &MailMessage) -> anyhow::Result<()> {
			anyhow::bail!("smtp down")
		}
	}

	fn notifier(mailer: Arc<dyn Mailer>) -> Notifier {
		Notifier::new(mailer, "noreply@travel.test".to_owned(), "owner@travel.test".to_owned())
	}

	#[test]
	fn approval_mail_carries_review_and_link() {
		let message = notifier(Arc::new(LogMailer)).review_pending(
			&ReviewSummary {
				customer_name: "Asha",
				rating: 5,
				cust_location: "Goa",
			},
			"http://api.test/api/reviews/verify?token=abc",
		);

		assert_eq!(message.from, "noreply@travel.test");
		assert_eq!(message.to, vec!["owner@travel.test"]);
		assert_eq!(message.subject, "New Review Pending Approval");
		assert_eq!(
			message.body,
			"A new review has been submitted:\n\nCustomer: Asha\nRating: 5\nLocation: Goa\n\n\
			 Approve here: http://api.test/api/reviews/verify?token=abc"
		);
	}

	#[tokio::test]
	async fn dispatch_swallows_transport_failures() {
		let n = notifier(Arc::new(FailingMailer));
		let message = n.review_pending(
			&ReviewSummary {
				customer_name: "Ravi",
				rating: 2,
				cust_location: "Pune",
			},
			"/verify",
		);
		assert!(n.dispatch(message).await.is_ok());
	}
}
