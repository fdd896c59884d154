use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{error, info, warn};

use domain_watch_core::{NotificationOutcome, TrackedDomain};
use domain_watch_providers::{EmailMessage, MailerClient};
use domain_watch_storage::{Database, NewNotificationRecord};

/// Result of a single notification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent { message_id: String },
    Failed { error: String },
}

impl Delivery {
    pub fn outcome(&self) -> NotificationOutcome {
        match self {
            Self::Sent { .. } => NotificationOutcome::Sent,
            Self::Failed { .. } => NotificationOutcome::Failed,
        }
    }
}

/// Emails the owner when a watched domain becomes available and logs every attempt.
#[derive(Clone)]
pub struct Notifier {
    mailer: MailerClient,
    database: Database,
    recipient: String,
    from: String,
}

impl Notifier {
    pub fn new(
        mailer: MailerClient,
        database: Database,
        recipient: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            mailer,
            database,
            recipient: recipient.into(),
            from: from.into(),
        }
    }

    /// Sends one availability notice for `domain` and appends the attempt to
    /// the notification log, whatever the outcome. The send is never retried.
    pub async fn notify(&self, domain: &TrackedDomain, transitioned_at: DateTime<Utc>) -> Delivery {
        let message = EmailMessage {
            from: &self.from,
            to: vec![self.recipient.as_str()],
            subject: format!("{} is available", domain.name),
            html: render_body(&domain.name, transitioned_at),
        };

        let delivery = match self.mailer.send(&message).await {
            Ok(sent) => {
                info!(
                    stage = "notify",
                    domain = %domain.name,
                    message_id = %sent.id,
                    "availability notice sent"
                );
                Delivery::Sent {
                    message_id: sent.id,
                }
            }
            Err(err) => {
                warn!(
                    stage = "notify",
                    domain = %domain.name,
                    error = %err,
                    "availability notice failed"
                );
                Delivery::Failed {
                    error: err.to_string(),
                }
            }
        };
        counter!("notifications_total", "outcome" => delivery.outcome().as_str()).increment(1);

        let (error_detail, provider_message_id) = match &delivery {
            Delivery::Sent { message_id } => (None, Some(message_id.as_str())),
            Delivery::Failed { error } => (Some(error.as_str()), None),
        };
        let record = NewNotificationRecord {
            domain_id: &domain.id,
            sent_at: transitioned_at,
            outcome: delivery.outcome(),
            error_detail,
            provider_message_id,
        };
        if let Err(err) = self.database.notification_log().append(record).await {
            error!(
                stage = "storage",
                domain = %domain.name,
                error = %err,
                "failed to record notification attempt"
            );
        }

        delivery
    }
}

fn render_body(domain: &str, transitioned_at: DateTime<Utc>) -> String {
    let name = escape_html(domain);
    let when = transitioned_at.format("%Y-%m-%d %H:%M UTC");
    format!(
        "<h2>{name} is available</h2>\
         <p><strong>{name}</strong> was reported available at {when}.</p>\
         <p>It may be registered by someone else at any time.</p>"
    )
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_watch_core::DomainStatus;
    use domain_watch_storage::NewTrackedDomain;
    use httpmock::prelude::*;
    use serde_json::json;
    use url::Url;

    use crate::router::test_support::{fixed_now, setup_database};

    async fn tracked(database: &Database) -> TrackedDomain {
        let mut domain = database
            .tracked_domains()
            .insert(NewTrackedDomain {
                name: "example.com",
                active: true,
                created_at: fixed_now(),
            })
            .await
            .expect("insert");
        domain.status = DomainStatus::Available;
        domain
    }

    fn notifier(server: &MockServer, database: &Database) -> Notifier {
        let mailer = MailerClient::new(
            "mail-key",
            Url::parse(&server.url("/")).expect("url"),
            reqwest::Client::builder().build().expect("client"),
        );
        Notifier::new(
            mailer,
            database.clone(),
            "owner@example.com",
            "alerts@domain-watch.dev",
        )
    }

    #[tokio::test]
    async fn successful_send_is_logged_with_message_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/emails")
                    .body_contains("example.com is available")
                    .body_contains("2024-01-01 00:00 UTC");
                then.status(200).json_body(json!({ "id": "msg-1" }));
            })
            .await;
        let database = setup_database().await;
        let domain = tracked(&database).await;

        let delivery = notifier(&server, &database)
            .notify(&domain, fixed_now())
            .await;
        mock.assert_async().await;

        assert_eq!(
            delivery,
            Delivery::Sent {
                message_id: "msg-1".to_string()
            }
        );
        let log = database
            .notification_log()
            .list_for_domain(&domain.id)
            .await
            .expect("log");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, NotificationOutcome::Sent);
        assert_eq!(log[0].provider_message_id.as_deref(), Some("msg-1"));
        assert_eq!(log[0].sent_at, fixed_now());
    }

    #[tokio::test]
    async fn failed_send_is_logged_with_error_detail() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/emails");
                then.status(503).body("mail relay down");
            })
            .await;
        let database = setup_database().await;
        let domain = tracked(&database).await;

        let delivery = notifier(&server, &database)
            .notify(&domain, fixed_now())
            .await;
        mock.assert_hits_async(1).await;

        assert_eq!(delivery.outcome(), NotificationOutcome::Failed);
        let log = database
            .notification_log()
            .list_for_domain(&domain.id)
            .await
            .expect("log");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, NotificationOutcome::Failed);
        let detail = log[0].error_detail.as_deref().expect("error detail");
        assert!(detail.contains("mail relay down"), "detail: {detail}");
    }

    #[test]
    fn body_escapes_markup() {
        let body = render_body("<b>&", fixed_now());
        assert!(body.contains("&lt;b&gt;&amp;"));
        assert!(!body.contains("<b>&"));
    }
}
