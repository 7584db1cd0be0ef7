//! JSON-over-HTTP transform client.
//!
//! Wire contract: `POST {endpoint}` with `{ "image": <base64>, "mimeType": .. }`.
//! Success is `{ "image": <base64> }`; failure is `{ "message": .. }` with a
//! non-2xx status. The model answering without an image is reported either
//! as a 2xx body without `image`, a failure body with `"code": "no_output"`,
//! or the deployed service's 500 whose message starts with
//! [`NO_IMAGE_MESSAGE_PREFIX`] followed by the model's text.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{TransformClient, TransformError};
use crate::config::StudioConfig;

/// Maximum length of a service message carried into a job error.
const MAX_MESSAGE_LENGTH: usize = 500;

/// Failure code the service uses for "answered, but without an image".
const NO_OUTPUT_CODE: &str = "no_output";

/// Message prefix of the deployed service's "model returned no image" 500.
pub const NO_IMAGE_MESSAGE_PREFIX: &str = "Bildgenerierung fehlgeschlagen.";

fn truncate_message(message: &str) -> String {
    if message.len() > MAX_MESSAGE_LENGTH {
        let mut end = MAX_MESSAGE_LENGTH;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &message[..end])
    } else {
        message.to_string()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransformRequest<'a> {
    image: String,
    mime_type: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct TransformResponse {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Maps a raw HTTP answer onto the transform result.
fn interpret_response(status: StatusCode, body: &str) -> Result<Vec<u8>, TransformError> {
    if !status.is_success() {
        let parsed: TransformResponse = serde_json::from_str(body).unwrap_or_default();
        let message = parsed
            .message
            .filter(|m| !m.trim().is_empty())
            .map(|m| truncate_message(&m))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()))
            });

        if parsed.code.as_deref() == Some(NO_OUTPUT_CODE)
            || message.starts_with(NO_IMAGE_MESSAGE_PREFIX)
        {
            return Err(TransformError::NoOutput {
                detail: Some(message),
            });
        }
        return Err(TransformError::Remote {
            status: status.as_u16(),
            message,
        });
    }

    let parsed: TransformResponse = serde_json::from_str(body)?;
    match parsed.image.filter(|i| !i.is_empty()) {
        Some(encoded) => {
            let bytes = STANDARD.decode(encoded.trim())?;
            if bytes.is_empty() {
                return Err(TransformError::NoOutput { detail: None });
            }
            Ok(bytes)
        }
        None => Err(TransformError::NoOutput {
            detail: parsed.message.map(|m| truncate_message(&m)),
        }),
    }
}

/// Transform client talking to the enhancement endpoint over HTTP.
pub struct HttpTransformClient {
    client: Client,
    endpoint: String,
}

impl HttpTransformClient {
    pub fn new(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, TransformError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransformError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &StudioConfig) -> Result<Self, TransformError> {
        Self::new(
            config.transform_endpoint.clone(),
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TransformClient for HttpTransformClient {
    async fn transform(&self, image: &[u8], mime_type: &str) -> Result<Vec<u8>, TransformError> {
        if image.is_empty() {
            return Err(TransformError::InvalidRequest(
                "missing image data".to_string(),
            ));
        }
        if mime_type.trim().is_empty() {
            return Err(TransformError::InvalidRequest(
                "missing MIME type".to_string(),
            ));
        }

        let request = TransformRequest {
            image: STANDARD.encode(image),
            mime_type,
        };

        log::debug!(
            "Sending {} bytes ({}) to {}",
            image.len(),
            mime_type,
            self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(TransformError::Network)?;

        let status = response.status();
        let body = response.text().await.map_err(TransformError::Network)?;

        let result = interpret_response(status, &body);
        if let Err(TransformError::NoOutput { detail }) = &result {
            log::warn!(
                "Transform service returned no image. Response: {}",
                detail.as_deref().unwrap_or("<empty>")
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_decodes_image() {
        let body = format!(r#"{{"image":"{}"}}"#, STANDARD.encode(b"studio"));
        let bytes = interpret_response(StatusCode::OK, &body).unwrap();
        assert_eq!(bytes, b"studio");
    }

    #[test]
    fn test_success_without_image_is_no_output() {
        let body = r#"{"message":"Model said: cannot edit"}"#;
        match interpret_response(StatusCode::OK, body) {
            Err(TransformError::NoOutput { detail }) => {
                assert_eq!(detail.as_deref(), Some("Model said: cannot edit"));
            }
            other => panic!("Expected NoOutput, got {:?}", other),
        }
    }

    #[test]
    fn test_success_with_empty_decoded_image_is_no_output() {
        let body = r#"{"image":""}"#;
        assert!(matches!(
            interpret_response(StatusCode::OK, body),
            Err(TransformError::NoOutput { detail: None })
        ));
    }

    #[test]
    fn test_error_status_uses_message() {
        let body = r#"{"message":"Missing image data or MIME type."}"#;
        match interpret_response(StatusCode::BAD_REQUEST, body) {
            Err(TransformError::Remote { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "Missing image data or MIME type.");
            }
            other => panic!("Expected Remote, got {:?}", other),
        }
    }

    #[test]
    fn test_error_status_without_json_falls_back_to_reason() {
        match interpret_response(StatusCode::METHOD_NOT_ALLOWED, "<html>nope</html>") {
            Err(TransformError::Remote { status, message }) => {
                assert_eq!(status, 405);
                assert_eq!(message, "Method Not Allowed");
            }
            other => panic!("Expected Remote, got {:?}", other),
        }
    }

    #[test]
    fn test_error_status_with_no_output_code() {
        let body = r#"{"message":"Image generation failed. Model response: text only","code":"no_output"}"#;
        let err = interpret_response(StatusCode::INTERNAL_SERVER_ERROR, body).unwrap_err();
        assert!(err.is_no_output());
        assert!(err.to_string().contains("text only"));
    }

    #[test]
    fn test_deployed_service_no_image_message() {
        let body = r#"{"message":"Bildgenerierung fehlgeschlagen. Antwort des Modells: Ich kann das Bild nur beschreiben."}"#;
        let err = interpret_response(StatusCode::INTERNAL_SERVER_ERROR, body).unwrap_err();
        assert!(err.is_no_output());
        assert!(err.to_string().contains("Ich kann das Bild nur beschreiben."));

        let body = r#"{"message":"Quota exceeded for model"}"#;
        let err = interpret_response(StatusCode::INTERNAL_SERVER_ERROR, body).unwrap_err();
        assert!(!err.is_no_output());
    }

    #[test]
    fn test_invalid_base64_is_decode_error() {
        let body = r#"{"image":"***not base64***"}"#;
        assert!(matches!(
            interpret_response(StatusCode::OK, body),
            Err(TransformError::Decode(_))
        ));
    }

    #[test]
    fn test_malformed_success_body() {
        assert!(matches!(
            interpret_response(StatusCode::OK, "not json"),
            Err(TransformError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_truncate_message() {
        let long = "x".repeat(MAX_MESSAGE_LENGTH + 10);
        let truncated = truncate_message(&long);
        assert!(truncated.ends_with("... (truncated)"));
        assert_eq!(truncate_message("short"), "short");
    }

    #[tokio::test]
    async fn test_rejects_empty_input_before_network() {
        let client = HttpTransformClient::new(
            "http://127.0.0.1:9/api/transform",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();

        assert!(matches!(
            client.transform(&[], "image/png").await,
            Err(TransformError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.transform(b"bytes", "  ").await,
            Err(TransformError::InvalidRequest(_))
        ));
    }
}
