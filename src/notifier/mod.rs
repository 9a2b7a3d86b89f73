//! Notifier (§4.F): outbound Discord-style webhook with a structured
//! success/failure payload. Transport failures are logged and discarded —
//! the Job record, not the notification, is authoritative (§4.E).

use std::time::Duration;

use serde::Serialize;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

/// Fields rendered by the Discord embed (§4.F).
#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
struct Embed {
    title: String,
    fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, Serialize)]
struct WebhookPayload {
    embeds: Vec<Embed>,
}

/// A completed job's outcome, in the shape the Notifier renders (§4.F).
pub enum NotifyPayload {
    Success {
        filename: String,
        created: String,
        size: String,
        channels: usize,
        programs: usize,
        days: u32,
        memory_mb: f64,
        duration_seconds: f64,
    },
    Failure {
        error_message: String,
        job_id: String,
    },
}

impl NotifyPayload {
    fn into_embed(self) -> Embed {
        match self {
            NotifyPayload::Success {
                filename,
                created,
                size,
                channels,
                programs,
                days,
                memory_mb,
                duration_seconds,
            } => Embed {
                title: "Scheduled Merge Completed".to_string(),
                fields: vec![
                    EmbedField { name: "Filename".to_string(), value: filename },
                    EmbedField { name: "Created".to_string(), value: created },
                    EmbedField { name: "Size".to_string(), value: size },
                    EmbedField { name: "Channels".to_string(), value: channels.to_string() },
                    EmbedField { name: "Programs".to_string(), value: programs.to_string() },
                    EmbedField { name: "Days".to_string(), value: days.to_string() },
                    EmbedField { name: "Memory".to_string(), value: format!("{memory_mb:.1} MB") },
                    EmbedField { name: "Duration".to_string(), value: format!("{duration_seconds:.1}s") },
                ],
            },
            NotifyPayload::Failure { error_message, job_id } => Embed {
                title: "Scheduled Merge Failed".to_string(),
                fields: vec![
                    EmbedField { name: "Error message".to_string(), value: error_message },
                    EmbedField { name: "Job ID".to_string(), value: job_id },
                ],
            },
        }
    }
}

pub struct Notifier {
    client: reqwest::Client,
}

impl Notifier {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    /// POST the payload to `webhook_url`; non-2xx and transport errors are
    /// logged and swallowed (§4.F, §4.E "Notifier failure").
    pub async fn send(&self, webhook_url: &str, payload: NotifyPayload) {
        let body = WebhookPayload { embeds: vec![payload.into_embed()] };

        let result = self
            .client
            .post(webhook_url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!("notifier: webhook delivered");
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "notifier: webhook returned non-2xx, discarding");
            }
            Err(err) => {
                tracing::warn!(error = %err, "notifier: webhook send failed, discarding");
            }
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn success_payload_posts_json_with_expected_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new();
        notifier
            .send(
                &format!("{}/webhook", server.uri()),
                NotifyPayload::Success {
                    filename: "merged.xml.gz".to_string(),
                    created: "2026-01-19T00:00:00Z".to_string(),
                    size: "0.04MB".to_string(),
                    channels: 2,
                    programs: 10,
                    days: 3,
                    memory_mb: 42.5,
                    duration_seconds: 1.25,
                },
            )
            .await;
    }

    #[tokio::test]
    async fn non_2xx_response_is_discarded_without_panicking() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new();
        notifier
            .send(
                &format!("{}/webhook", server.uri()),
                NotifyPayload::Failure {
                    error_message: "upstream unavailable".to_string(),
                    job_id: "scheduled_merge_20260119_000000".to_string(),
                },
            )
            .await;
    }
}
