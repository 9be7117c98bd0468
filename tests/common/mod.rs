#![allow(dead_code)]

use simplepay_sdk::services::legacy::ios::{Backoff, OrderStatus};
use simplepay_sdk::services::transport::{OutboundRequest, RawResponse, Transport, TransportError};
use simplepay_sdk::MerchantConfig;
use std::collections::VecDeque;
use std::sync::Mutex;

pub const MERCHANT: &str = "PUBLICTESTHUF";
pub const SECRET: &str = "FxDa5w314kLlNseq2sKuVwaqZshZT5d6";

pub fn config() -> MerchantConfig {
    MerchantConfig::from_pairs([("SANDBOX", "1")]).with_merchant("HUF", MERCHANT, SECRET)
}

/// Replays canned gateway answers and records what was posted.
/// A `None` entry fails the call like a dropped connection.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Option<RawResponse>>>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Option<RawResponse>>) -> Self {
        ScriptedTransport {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn post(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .flatten()
            .ok_or_else(|| TransportError::EmptyResponse(request.url.clone()))
    }
}

pub fn answer(status: u16, body: &str, signature: Option<&str>) -> Option<RawResponse> {
    let headers = signature
        .map(|s| vec![("Signature".to_string(), s.to_string())])
        .unwrap_or_default();
    Some(RawResponse {
        status,
        headers,
        body: body.to_string(),
    })
}

/// Remembers every pause instead of sleeping.
#[derive(Default)]
pub struct RecordingBackoff {
    pauses: Mutex<Vec<OrderStatus>>,
}

impl RecordingBackoff {
    pub fn pauses(&self) -> Vec<OrderStatus> {
        self.pauses.lock().unwrap().clone()
    }
}

impl Backoff for RecordingBackoff {
    fn pause(&self, status: &OrderStatus) {
        self.pauses.lock().unwrap().push(status.clone());
    }
}
