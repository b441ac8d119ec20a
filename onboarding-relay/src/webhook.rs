//! Webhook delivery: the submission as one JSON document POSTed to the workflow endpoint.
//!
//! ```json
//! {
//!   "nom": "Dupont",
//!   "immatriculation": "AB-123-CD",
//!   "submittedAt": "2024-03-05T09:41:07.512Z",
//!   "files": [
//!     { "field": "degat_1", "name": "avant.jpg", "contentType": "image/jpeg", "dataBase64": "/9j/4AAQ..." }
//!   ]
//! }
//! ```
//!
//! Text fields sit at the top level next to `submittedAt` and `files`; a form field with either
//! of those names is overwritten by the relay's own value.

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::errors::{Error, Result};
use crate::submission::{Attachment, Submission};

/// One file of the JSON payload, content inlined as base64.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub field: String,
    pub name: String,
    pub content_type: String,
    pub data_base64: String,
}

impl From<Attachment> for FileEntry {
    fn from(attachment: Attachment) -> Self {
        Self {
            data_base64: STANDARD.encode(&attachment.content),
            field: attachment.field,
            name: attachment.filename,
            content_type: attachment.content_type,
        }
    }
}

/// Builds the JSON document sent to the webhook.
pub fn build_payload(submission: Submission, submitted_at: DateTime<Utc>) -> Result<Value> {
    let mut payload: Map<String, Value> = submission.fields.into_iter().map(|(k, v)| (k, Value::String(v))).collect();

    let files: Vec<FileEntry> = submission.files.into_iter().map(FileEntry::from).collect();
    let files = serde_json::to_value(files).map_err(|e| Error::Internal {
        operation: format!("serialize file list: {e}"),
    })?;

    payload.insert(
        "submittedAt".to_string(),
        Value::String(submitted_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    payload.insert("files".to_string(), files);

    Ok(Value::Object(payload))
}

/// POSTs the payload. A non-2xx answer becomes [`Error::Upstream`] carrying the webhook's
/// status and body unchanged.
#[tracing::instrument(skip_all, fields(host = url.host_str().unwrap_or("")))]
pub async fn send(client: &reqwest::Client, url: &Url, payload: &Value) -> Result<()> {
    let response = client
        .post(url.clone())
        .json(payload)
        .send()
        .await
        .map_err(|e| Error::Internal {
            operation: format!("reach webhook: {e}"),
        })?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        tracing::warn!(status = %status, body_len = body.len(), "Webhook returned non-success status");
        return Err(Error::Upstream { status, body });
    }

    tracing::debug!(status = %status, "Webhook accepted submission");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{submission_with, test_http_client};
    use chrono::TimeZone;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn photo(field: &str, content: &[u8]) -> Attachment {
        Attachment {
            field: field.to_string(),
            filename: format!("{field}.jpg"),
            content_type: "image/jpeg".to_string(),
            content: content.to_vec(),
        }
    }

    #[test]
    fn test_payload_shape() {
        let submission = submission_with(
            &[("nom", "Dupont"), ("immatriculation", "AB-123-CD")],
            vec![photo("degat_1", b"hello")],
        );
        let submitted_at = Utc.with_ymd_and_hms(2024, 3, 5, 9, 41, 7).unwrap();

        let payload = build_payload(submission, submitted_at).unwrap();

        assert_eq!(payload["nom"], "Dupont");
        assert_eq!(payload["immatriculation"], "AB-123-CD");
        assert_eq!(payload["submittedAt"], "2024-03-05T09:41:07.000Z");
        assert_eq!(
            payload["files"],
            serde_json::json!([{
                "field": "degat_1",
                "name": "degat_1.jpg",
                "contentType": "image/jpeg",
                "dataBase64": "aGVsbG8="
            }])
        );
    }

    #[test]
    fn test_relay_keys_override_form_fields() {
        let submission = submission_with(&[("files", "spoofed"), ("submittedAt", "yesterday")], vec![]);
        let submitted_at = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();

        let payload = build_payload(submission, submitted_at).unwrap();

        assert_eq!(payload["files"], serde_json::json!([]));
        assert_eq!(payload["submittedAt"], "2024-03-05T00:00:00.000Z");
    }

    #[test]
    fn test_fields_keep_arrival_order() {
        let submission = submission_with(
            &[("nom", "Dupont"), ("adresse", "1 rue de Paris"), ("date", "2024-03-05")],
            vec![],
        );

        let payload = build_payload(submission, Utc::now()).unwrap();

        let keys: Vec<&str> = payload.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["nom", "adresse", "date", "submittedAt", "files"]);
    }

    #[tokio::test]
    async fn test_send_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flow"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/flow", server.uri())).unwrap();
        let client = test_http_client();

        send(&client, &url, &serde_json::json!({"nom": "Dupont"})).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_passes_failure_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Flow schema mismatch"))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let client = test_http_client();

        match send(&client, &url, &serde_json::json!({})).await {
            Err(Error::Upstream { status, body }) => {
                assert_eq!(status.as_u16(), 400);
                assert_eq!(body, "Flow schema mismatch");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }
}
