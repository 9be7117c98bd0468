use log::{debug, error};
use reqwest::blocking::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const MISSING_HEADER_SIGNATURE: &str = "MISSING_HEADER_SIGNATURE";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request error: {0}")]
    HttpRequestError(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("Deadline exceeded before {0}")]
    DeadlineExceeded(String),

    #[error("Empty response from {0}")]
    EmptyResponse(String),
}

/// One POST handed to the transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub timeout: Duration,
}

impl OutboundRequest {
    /// JSON POST of the current protocol.
    pub fn json(url: &str, body: String, signature: &str, timeout: Duration) -> Self {
        OutboundRequest {
            url: url.to_string(),
            headers: vec![
                ("Accept-language".to_string(), "EN".to_string()),
                ("Content-type".to_string(), "application/json".to_string()),
                ("Signature".to_string(), signature.to_string()),
            ],
            body,
            timeout,
        }
    }

    /// Form-encoded POST of the legacy protocol.
    pub fn form(url: &str, fields: &[(String, String)], timeout: Duration) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        OutboundRequest {
            url: url.to_string(),
            headers: vec![
                ("Accept-language".to_string(), "en".to_string()),
                (
                    "Content-type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                ),
            ],
            body,
            timeout,
        }
    }
}

/// Headers and body of a gateway response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawResponse {
    /// Splits a response captured as one text: header lines separated by
    /// `\r\n`, the last segment being the body.
    #[cfg(test)]
    pub fn from_raw(raw: &str) -> Self {
        let segments: Vec<&str> = raw.split("\r\n").collect();
        let body = segments.last().copied().unwrap_or_default().to_string();
        let mut status = 0;
        let mut headers = Vec::new();

        for line in &segments[..segments.len().saturating_sub(1)] {
            if line.starts_with("HTTP/") {
                status = line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|code| code.parse().ok())
                    .unwrap_or(0);
            } else if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        RawResponse {
            status,
            headers,
            body,
        }
    }

    /// Last header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn signature(&self) -> String {
        signature_from_headers(&self.headers)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub fn signature_from_headers(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .rev()
        .find(|(key, _)| key.eq_ignore_ascii_case("signature"))
        .map(|(_, value)| value.trim().to_string())
        .unwrap_or_else(|| MISSING_HEADER_SIGNATURE.to_string())
}

/// Time left before `deadline`, capped at `timeout`.
pub fn remaining_time(
    deadline: Option<Instant>,
    timeout: Duration,
    what: &str,
) -> Result<Duration, TransportError> {
    match deadline {
        None => Ok(timeout),
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                Err(TransportError::DeadlineExceeded(what.to_string()))
            } else {
                Ok(left.min(timeout))
            }
        }
    }
}

/// Outbound HTTP collaborator. One POST, no retries.
pub trait Transport {
    fn post(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn post(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError> {
        (**self).post(request)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn post(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError> {
        (**self).post(request)
    }
}

/// Blocking reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder().user_agent("curl").build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn post(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError> {
        debug!("POST {} ({} bytes)", request.url, request.body.len());

        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().map_err(|e| {
            error!("Request to {} failed: {}", request.url, e);
            TransportError::from(e)
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.text()?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_response_is_split_into_headers_and_body() {
        let raw = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nsignature: abc==\r\n\r\n{\"a\":1}";
        let response = RawResponse::from_raw(raw);
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "{\"a\":1}");
        assert_eq!(response.header("SIGNATURE"), Some("abc=="));
        assert_eq!(response.signature(), "abc==");
        assert!(response.is_success());
    }

    #[test]
    fn missing_signature_header_has_sentinel() {
        let response = RawResponse::from_raw("HTTP/1.1 500 Oops\r\n\r\n");
        assert_eq!(response.signature(), MISSING_HEADER_SIGNATURE);
        assert!(!response.is_success());
    }

    #[test]
    fn response_without_headers_has_sentinel() {
        let response = RawResponse {
            status: 200,
            headers: Vec::new(),
            body: "{}".to_string(),
        };
        assert_eq!(response.signature(), MISSING_HEADER_SIGNATURE);
    }

    #[test]
    fn form_request_is_urlencoded() {
        let request = OutboundRequest::form(
            "https://example.test/ios",
            &[
                ("MERCHANT".to_string(), "P 1".to_string()),
                ("REFNOEXT".to_string(), "a&b".to_string()),
            ],
            Duration::from_secs(5),
        );
        assert_eq!(request.body, "MERCHANT=P+1&REFNOEXT=a%26b");
    }

    #[test]
    fn expired_deadline_refuses_to_send() {
        let past = Instant::now() - Duration::from_millis(1);
        assert!(matches!(
            remaining_time(Some(past), Duration::from_secs(60), "start"),
            Err(TransportError::DeadlineExceeded(_))
        ));
        let left = remaining_time(
            Some(Instant::now() + Duration::from_secs(600)),
            Duration::from_secs(60),
            "start",
        )
        .unwrap();
        assert_eq!(left, Duration::from_secs(60));
    }
}
