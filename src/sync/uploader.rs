use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upload timed out")]
    Timeout,

    #[error("server rejected upload with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UploadError::Timeout
        } else {
            UploadError::Network(e.to_string())
        }
    }
}

impl UploadError {
    /// Truncate a response body to avoid carrying excessive data in errors.
    /// The cut must land on a char boundary or slicing panics on multibyte
    /// UTF-8 bodies.
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}... (truncated, {} total bytes)",
            &body[..end],
            body.len()
        )
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        UploadError::Rejected {
            status,
            body: Self::truncate_body(body),
        }
    }
}

/// The network seam for the write path. Any 2xx is success and the server
/// body is returned verbatim for forwarding to observers.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload_photo(
        &self,
        bytes: &[u8],
        filename: &str,
        metadata: &Value,
    ) -> Result<String, UploadError>;

    async fn upload_event(&self, record: &Value) -> Result<String, UploadError>;
}

/// Uploader speaking the application API's upload contract:
/// multipart for photos (blob in field `photo`, JSON metadata in field
/// `metadata`), raw JSON body for events.
#[derive(Clone)]
pub struct HttpUploader {
    client: Client,
    photo_endpoint: String,
    event_endpoint: String,
}

impl HttpUploader {
    pub fn new(
        client: Client,
        photo_endpoint: impl Into<String>,
        event_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client,
            photo_endpoint: photo_endpoint.into(),
            event_endpoint: event_endpoint.into(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<String, UploadError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            Ok(body)
        } else {
            Err(UploadError::from_status(status.as_u16(), &body))
        }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload_photo(
        &self,
        bytes: &[u8],
        filename: &str,
        metadata: &Value,
    ) -> Result<String, UploadError> {
        let form = Form::new()
            .part(
                "photo",
                Part::bytes(bytes.to_vec()).file_name(filename.to_string()),
            )
            .text("metadata", metadata.to_string());

        debug!(filename, bytes = bytes.len(), "uploading photo");
        let response = self
            .client
            .post(&self.photo_endpoint)
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn upload_event(&self, record: &Value) -> Result<String, UploadError> {
        debug!("submitting event");
        let response = self
            .client
            .post(&self.event_endpoint)
            .json(record)
            .send()
            .await?;
        Self::check(response).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_truncates_long_bodies() {
        let body = "x".repeat(2000);
        match UploadError::from_status(500, &body) {
            UploadError::Rejected { status, body } => {
                assert_eq!(status, 500);
                assert!(body.len() < 600);
                assert!(body.contains("truncated"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_from_status_truncates_multibyte_body_on_char_boundary() {
        // 499 ASCII bytes, then two-byte chars straddling the 500-byte cut
        let body = format!("{}{}", "a".repeat(499), "é".repeat(10));
        match UploadError::from_status(500, &body) {
            UploadError::Rejected { body, .. } => {
                assert!(body.starts_with(&"a".repeat(499)));
                assert!(body.contains("truncated"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_from_status_keeps_short_bodies() {
        match UploadError::from_status(422, "bad metadata") {
            UploadError::Rejected { body, .. } => assert_eq!(body, "bad metadata"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
