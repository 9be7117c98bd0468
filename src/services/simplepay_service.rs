use crate::models::common::{Interface, Operation};
use crate::models::config::MerchantConfig;
use crate::models::requests::{is_empty_value, TransactionRequest};
use crate::models::responses::{TransactionResult, TransactionState};
use crate::services::crypto::{canonical_json, CryptoError, HmacSha384Signer, Signer};
use crate::services::logger::{sink_for_config, LogContext, LogSink};
use crate::services::merchant::{resolve_for, ConfigurationError};
use crate::services::transport::{
    remaining_time, OutboundRequest, RawResponse, ReqwestTransport, Transport, TransportError,
};
use crate::services::views::{FormDetails, HtmlRenderer, Renderer};
use log::{error, info, warn};
use serde_json::{json, Map, Value};
use std::time::Instant;
use thiserror::Error;

pub const SIMPLEPAY_SANDBOX_URL: &str = "https://sandbox.simplepay.hu/payment";
pub const SIMPLEPAY_LIVE_URL: &str = "https://secure.simplepay.hu/payment";
pub const SDK_VERSION: &str = concat!("SimplePay_Rust_SDK_", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum SimplePayError {
    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to sign request: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Signature mismatch: computed {computed}, received {received}")]
    SignatureMismatch { computed: String, received: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: TransactionState,
        to: TransactionState,
    },
}

/// State tracker shared by outbound calls and inbound callbacks.
///
/// Collects the error messages and the log content of one call.
#[derive(Debug, Clone)]
pub struct Transaction {
    interface: Interface,
    state: TransactionState,
    errors: Vec<String>,
    log: Map<String, Value>,
}

impl Transaction {
    pub fn new(interface: Interface) -> Self {
        let mut log = Map::new();
        log.insert("runMode".to_string(), json!(interface.as_str().to_uppercase()));
        Transaction {
            interface,
            state: TransactionState::Built,
            errors: Vec::new(),
            log,
        }
    }

    pub fn interface(&self) -> Interface {
        self.interface
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn advance(&mut self, next: TransactionState) -> Result<(), SimplePayError> {
        if !self.state.can_transition_to(next) {
            return Err(SimplePayError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Moves to `Rejected` and records why. A terminal state is left untouched.
    pub fn reject(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("{} rejected: {}", self.interface, reason);
        self.errors.push(reason);
        if !self.state.is_terminal() {
            self.state = TransactionState::Rejected;
        }
    }

    pub fn note_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn log(&mut self, key: &str, value: impl Into<Value>) {
        self.log.insert(key.to_string(), value.into());
    }

    pub fn log_all(&mut self, content: &Map<String, Value>) {
        for (key, value) in content {
            self.log.insert(key.clone(), value.clone());
        }
    }

    pub fn log_content(&self) -> &Map<String, Value> {
        &self.log
    }

    pub fn write_log(&mut self, sink: &dyn LogSink, context: &LogContext) {
        if let Err(e) = sink.write(context, &self.log) {
            warn!("Could not write transaction log: {}", e);
            self.errors.push(format!("Log: {}", e));
        }
    }
}

/// Client of the current (V2) protocol: start, query, refund, finish.
pub struct SimplePayClient {
    config: MerchantConfig,
    transport: Box<dyn Transport + Send + Sync>,
    signer: Box<dyn Signer + Send + Sync>,
    log_sink: Box<dyn LogSink + Send + Sync>,
    renderer: Box<dyn Renderer + Send + Sync>,
    form_details: FormDetails,
}

impl SimplePayClient {
    /// Client with the blocking reqwest transport and the configured log sink.
    pub fn new(config: MerchantConfig) -> Result<Self, SimplePayError> {
        let transport = ReqwestTransport::new()?;
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: MerchantConfig, transport: impl Transport + Send + Sync + 'static) -> Self {
        let log_sink = sink_for_config(&config);
        SimplePayClient {
            config,
            transport: Box::new(transport),
            signer: Box::new(HmacSha384Signer),
            log_sink,
            renderer: Box::new(HtmlRenderer),
            form_details: FormDetails::default(),
        }
    }

    pub fn with_log_sink(mut self, sink: impl LogSink + Send + Sync + 'static) -> Self {
        self.log_sink = Box::new(sink);
        self
    }

    pub fn with_signer(mut self, signer: impl Signer + Send + Sync + 'static) -> Self {
        self.signer = Box::new(signer);
        self
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + Send + Sync + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    pub fn with_form_details(mut self, form_details: FormDetails) -> Self {
        self.form_details = form_details;
        self
    }

    pub fn config(&self) -> &MerchantConfig {
        &self.config
    }

    pub fn api_url(&self, operation: Operation) -> String {
        let base = if self.config.sandbox {
            SIMPLEPAY_SANDBOX_URL
        } else {
            SIMPLEPAY_LIVE_URL
        };
        format!("{}{}", base, operation.path())
    }

    pub fn start(&self, request: TransactionRequest) -> Result<TransactionResult, SimplePayError> {
        self.expect_operation(&request, Operation::Start)?;
        self.execute(request, None)
    }

    pub fn query(&self, request: TransactionRequest) -> Result<TransactionResult, SimplePayError> {
        self.expect_operation(&request, Operation::Query)?;
        self.execute(request, None)
    }

    pub fn refund(&self, request: TransactionRequest) -> Result<TransactionResult, SimplePayError> {
        self.expect_operation(&request, Operation::Refund)?;
        self.execute(request, None)
    }

    pub fn finish(&self, request: TransactionRequest) -> Result<TransactionResult, SimplePayError> {
        self.expect_operation(&request, Operation::Finish)?;
        self.execute(request, None)
    }

    fn expect_operation(&self, request: &TransactionRequest, operation: Operation) -> Result<(), SimplePayError> {
        if request.operation() != operation {
            return Err(SimplePayError::Validation(vec![format!(
                "Expected a {} request, got {}",
                operation,
                request.operation()
            )]));
        }
        Ok(())
    }

    /// Runs one call through build → sign → send → receive → verify.
    ///
    /// Validation and configuration problems abort before anything is sent.
    /// Transport and response problems come back as a `Rejected` result.
    pub fn execute(
        &self,
        request: TransactionRequest,
        deadline: Option<Instant>,
    ) -> Result<TransactionResult, SimplePayError> {
        let operation = request.operation();
        let mut transaction = Transaction::new(operation.interface());
        transaction.log(
            "environment",
            if self.config.sandbox { "SANDBOX" } else { "LIVE" },
        );

        // Built
        let missing = request.validate();
        if !missing.is_empty() {
            warn!("{} request is incomplete: {}", operation, missing.join(", "));
            return Err(SimplePayError::Validation(missing));
        }

        // Signed
        let merchant = resolve_for(
            &self.config,
            request.currency().as_deref(),
            request.merchant_account(),
        )?;
        transaction.log("callState1", "PREPARE");

        let mut payload = request.payload();
        stamp_payload(&mut payload, &merchant.credentials.merchant_id, &merchant.currency);
        let content = canonical_json(&payload)?;
        let signature = self
            .signer
            .sign(&merchant.credentials.secret_key, content.as_bytes())?;
        transaction.advance(TransactionState::Signed)?;
        transaction.log_all(&payload);

        let url = self.api_url(operation);
        transaction.log("callState2", "REQUEST");
        transaction.log("sendApiUrl", url.as_str());
        transaction.log("sendContent", content.as_str());
        transaction.log("sendSignature", signature.as_str());

        let mut result = TransactionResult {
            interface: operation.interface(),
            state: TransactionState::Signed,
            fields: Map::new(),
            response_body: String::new(),
            response_signature: String::new(),
            computed_signature: String::new(),
            errors: Vec::new(),
        };

        // Sent
        info!("Sending {} request to SimplePay", operation);
        let response = remaining_time(deadline, self.config.timeout, operation.path())
            .and_then(|timeout| {
                let outbound = OutboundRequest::json(&url, content.clone(), &signature, timeout);
                self.transport.post(&outbound)
            })
            .and_then(|response| {
                if response.is_success() {
                    Ok(response)
                } else {
                    Err(TransportError::UnexpectedStatus {
                        status: response.status,
                        url: url.clone(),
                    })
                }
            });

        match response {
            Ok(response) => {
                transaction.advance(TransactionState::Sent)?;
                self.receive(&mut transaction, &merchant.credentials.secret_key, response, &mut result)?;
            }
            Err(e) => {
                error!("Error sending {} request: {}", operation, e);
                transaction.log("runCommunicationException", e.to_string());
                transaction.reject(SimplePayError::Transport(e).to_string());
            }
        }

        let context = LogContext::new(operation.interface()).with_ids(
            result.order_ref().or_else(|| text_field(&payload, "orderRef")),
            result
                .transaction_id()
                .or_else(|| text_field(&payload, "transactionId")),
        );
        transaction.write_log(self.log_sink.as_ref(), &context);

        result.state = transaction.state();
        result.errors = transaction.errors().to_vec();
        Ok(result)
    }

    fn receive(
        &self,
        transaction: &mut Transaction,
        secret_key: &str,
        response: RawResponse,
        result: &mut TransactionResult,
    ) -> Result<(), SimplePayError> {
        transaction.advance(TransactionState::ResponseReceived)?;
        transaction.log("callState3", "RESULT");

        let received = response.signature();
        let computed = self
            .signer
            .sign(secret_key, response.body.as_bytes())
            .unwrap_or_default();
        let verified = self
            .signer
            .verify(secret_key, response.body.as_bytes(), &received);

        transaction.log("responseBody", response.body.as_str());
        transaction.log("responseSignature", received.as_str());
        transaction.log("computedSignature", computed.as_str());
        transaction.log("responseSignatureValid", verified);

        result.response_body = response.body.clone();
        result.response_signature = received.clone();
        result.computed_signature = computed.clone();

        let parsed = match serde_json::from_str::<Value>(&response.body) {
            Ok(Value::Object(fields)) => Some(fields),
            _ => None,
        };
        if let Some(fields) = &parsed {
            transaction.log_all(fields);
            result.fields = fields.clone();
        }

        if !verified {
            transaction.log("hashCheckResult", "fail");
            transaction.reject(
                SimplePayError::SignatureMismatch {
                    computed,
                    received,
                }
                .to_string(),
            );
            if parsed.is_none() {
                transaction.note_error(
                    SimplePayError::MalformedResponse("body is not a JSON object".to_string())
                        .to_string(),
                );
            }
            return Ok(());
        }

        transaction.log("hashCheckResult", "success");
        transaction.advance(TransactionState::Verified)?;
        match parsed {
            Some(_) => transaction.advance(TransactionState::Accepted)?,
            None => transaction.reject(
                SimplePayError::MalformedResponse("body is not a JSON object".to_string())
                    .to_string(),
            ),
        }
        Ok(())
    }

    /// Form that sends the customer to the payment page of a Start result.
    ///
    /// With `AUTOCHALLENGE` on, a 3-D Secure `redirectUrl` takes precedence.
    pub fn payment_form(&self, result: &TransactionResult) -> String {
        if self.config.auto_challenge && result.get_str("redirectUrl").is_some() {
            if let Some(form) = self.challenge(result) {
                return form;
            }
        }
        self.renderer
            .payment_form(result.payment_url(), &self.form_details)
    }

    /// Form for the card issuer's 3-D Secure challenge, when one was requested.
    pub fn challenge(&self, result: &TransactionResult) -> Option<String> {
        let context = LogContext::new(result.interface)
            .with_ids(result.order_ref(), result.transaction_id());
        let mut log = Map::new();
        log.insert(
            "3DSCheckResult".to_string(),
            json!("Card issuer bank wants to identify cardholder (challenge)"),
        );

        let form = match result.get_str("redirectUrl").filter(|url| !url.is_empty()) {
            Some(url) => {
                log.insert("3DSChallengeUrl".to_string(), json!(url));
                Some(self.renderer.payment_form(Some(url), &self.form_details))
            }
            None => {
                log.insert("3DSChallengeUrl_ERROR".to_string(), json!("Missing redirect URL"));
                None
            }
        };

        if let Err(e) = self.log_sink.write(&context, &log) {
            warn!("Could not write transaction log: {}", e);
        }
        form
    }
}

/// Fills the merchant, a fresh salt and the SDK version into their template slots.
fn stamp_payload(payload: &mut Map<String, Value>, merchant_id: &str, currency: &str) {
    payload.insert("salt".to_string(), json!(new_salt()));
    payload.insert("merchant".to_string(), json!(merchant_id));
    payload.insert("sdkVersion".to_string(), json!(SDK_VERSION));
    if payload.get("currency").map(is_empty_value).unwrap_or(false) {
        payload.insert("currency".to_string(), json!(currency));
    }
}

/// 32 random lowercase hex characters.
pub fn new_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn text_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_is_32_hex_chars() {
        let salt = new_salt();
        assert_eq!(salt.len(), 32);
        assert!(salt.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(salt, new_salt());
    }

    #[test]
    fn stamp_fills_template_slots_in_place() {
        let mut request = TransactionRequest::start();
        request.add_data("orderRef", "ORD-1").add_data("currency", "EUR");
        let mut payload = request.payload();
        stamp_payload(&mut payload, "M1", "EUR");

        let keys: Vec<&str> = payload.keys().map(String::as_str).collect();
        assert_eq!(keys, ["salt", "merchant", "orderRef", "currency", "sdkVersion", "methods"]);
        assert_eq!(payload["merchant"], json!("M1"));
        assert_eq!(payload["sdkVersion"], json!(SDK_VERSION));
    }

    #[test]
    fn stamp_fills_missing_currency_and_version() {
        let mut request = TransactionRequest::finish();
        request.add_data("orderRef", "ORD-1");
        let mut payload = request.payload();
        stamp_payload(&mut payload, "M1", "HUF");
        assert_eq!(payload["currency"], json!("HUF"));
        assert_eq!(payload["sdkVersion"], json!(SDK_VERSION));
    }

    #[test]
    fn every_operation_carries_sdk_version() {
        for mut request in [
            TransactionRequest::query(),
            TransactionRequest::refund(),
            TransactionRequest::finish(),
        ] {
            request.add_data("currency", "HUF");
            let mut payload = request.payload();
            stamp_payload(&mut payload, "M1", "HUF");
            assert_eq!(payload["sdkVersion"], json!(SDK_VERSION), "{}", request.operation());
        }
    }

    #[test]
    fn transaction_refuses_illegal_moves() {
        let mut transaction = Transaction::new(Interface::Start);
        assert!(transaction.advance(TransactionState::Sent).is_err());
        transaction.advance(TransactionState::Signed).unwrap();
        transaction.reject("network down");
        assert_eq!(transaction.state(), TransactionState::Rejected);
        assert!(transaction.advance(TransactionState::Sent).is_err());

        // rejecting twice keeps both reasons but stays terminal
        transaction.reject("again");
        assert_eq!(transaction.errors().len(), 2);
    }

    #[test]
    fn api_url_follows_environment() {
        struct NoTransport;
        impl Transport for NoTransport {
            fn post(&self, _request: &OutboundRequest) -> Result<RawResponse, TransportError> {
                Err(TransportError::EmptyResponse("test".to_string()))
            }
        }

        let live = SimplePayClient::with_transport(MerchantConfig::default(), NoTransport);
        assert_eq!(
            live.api_url(Operation::Start),
            "https://secure.simplepay.hu/payment/v2/start"
        );

        let sandbox = SimplePayClient::with_transport(
            MerchantConfig::from_pairs([("SANDBOX", "1")]),
            NoTransport,
        );
        assert_eq!(
            sandbox.api_url(Operation::Refund),
            "https://sandbox.simplepay.hu/payment/v2/refund"
        );
    }
}
