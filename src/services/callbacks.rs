use crate::models::common::Interface;
use crate::models::config::MerchantConfig;
use crate::models::responses::{
    value_text, BackNotification, BackResult, IpnConfirmation, IpnResult, TransactionState,
};
use crate::services::crypto::{canonical_json, HmacSha384Signer, Signer};
use crate::services::logger::{sink_for_config, LogContext, LogSink};
use crate::services::merchant::{currency_for_account, resolve};
use crate::services::simplepay_service::{SimplePayError, Transaction};
use crate::services::transport::signature_from_headers;
use crate::services::views::{HtmlRenderer, Renderer};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{Local, SecondsFormat};
use log::{info, warn};
use serde_json::{json, Map, Value};

/// Text the Back signature is checked against when `r` is not a JSON object.
const EMPTY_BACK_JSON: &str = "[]";

/// Verifies what the gateway sends to the merchant: the browser Back redirect
/// and the server-to-server IPN.
pub struct CallbackVerifier {
    config: MerchantConfig,
    signer: Box<dyn Signer + Send + Sync>,
    log_sink: Box<dyn LogSink + Send + Sync>,
    renderer: Box<dyn Renderer + Send + Sync>,
}

impl CallbackVerifier {
    pub fn new(config: MerchantConfig) -> Self {
        let log_sink = sink_for_config(&config);
        CallbackVerifier {
            config,
            signer: Box::new(HmacSha384Signer),
            log_sink,
            renderer: Box::new(HtmlRenderer),
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

    pub fn config(&self) -> &MerchantConfig {
        &self.config
    }

    /// Checks the `r` / `s` query parameters of a Back redirect.
    ///
    /// Never fails: a corrupt payload gives `N/A` fields and `verified == false`.
    pub fn check_back(&self, r: &str, s: &str) -> BackResult {
        let mut transaction = Transaction::new(Interface::Back);
        let _ = transaction.advance(TransactionState::ResponseReceived);

        let raw_json = decode_back_payload(r);
        let notification = match serde_json::from_str::<Value>(&raw_json) {
            Ok(Value::Object(decoded)) => BackNotification::from_map(decoded),
            _ => {
                transaction.note_error("Back payload is not a JSON object");
                BackNotification::default()
            }
        };
        transaction.log("rContent", r);
        transaction.log("rJson", raw_json.as_str());
        transaction.log("sContent", s);

        let received = s.trim().to_string();
        let mut computed = String::new();
        let merchant = notification.merchant();
        let verified = match currency_for_account(&self.config, &merchant)
            .and_then(|currency| resolve(&self.config, &currency))
        {
            Ok(credentials) => {
                computed = self
                    .signer
                    .sign(&credentials.secret_key, raw_json.as_bytes())
                    .unwrap_or_default();
                self.signer
                    .verify(&credentials.secret_key, raw_json.as_bytes(), &received)
            }
            Err(e) => {
                transaction.reject(SimplePayError::Configuration(e).to_string());
                false
            }
        };
        self.settle(&mut transaction, verified, &computed, &received);

        let context = LogContext::new(Interface::Back).with_ids(
            Some(notification.order_ref()),
            Some(notification.transaction_id()),
        );
        transaction.write_log(self.log_sink.as_ref(), &context);

        info!(
            "Back redirect for order {}: event {}, verified {}",
            notification.order_ref(),
            notification.event(),
            verified
        );
        BackResult {
            notification,
            raw_json,
            verified,
            computed_signature: computed,
            received_signature: received,
            errors: transaction.errors().to_vec(),
        }
    }

    /// HTML banner for the customer after a Back redirect.
    pub fn back_notification(&self, result: &BackResult) -> String {
        self.renderer.back_notification(&result.notification)
    }

    /// Checks an IPN body against its `Signature` header and prepares the confirmation.
    pub fn check_ipn_headers(&self, body: &str, headers: &[(String, String)]) -> IpnResult {
        self.check_ipn(body, &signature_from_headers(headers))
    }

    pub fn check_ipn(&self, body: &str, signature: &str) -> IpnResult {
        let mut transaction = Transaction::new(Interface::Ipn);
        let _ = transaction.advance(TransactionState::ResponseReceived);
        transaction.log("ipnBodyToCheck", body);

        let content = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(content)) => content,
            _ => {
                transaction.note_error(
                    SimplePayError::MalformedResponse("IPN body is not a JSON object".to_string())
                        .to_string(),
                );
                Map::new()
            }
        };

        let received = signature.trim().to_string();
        let mut computed = String::new();
        let mut confirmation = IpnConfirmation::unsuccessful();
        let merchant = content.get("merchant").map(value_text).unwrap_or_default();

        let credentials = currency_for_account(&self.config, &merchant)
            .and_then(|currency| resolve(&self.config, &currency));
        let verified = match &credentials {
            Ok(credentials) => {
                computed = self
                    .signer
                    .sign(&credentials.secret_key, body.as_bytes())
                    .unwrap_or_default();
                self.signer
                    .verify(&credentials.secret_key, body.as_bytes(), &received)
            }
            Err(e) => {
                transaction.reject(SimplePayError::Configuration(e.clone()).to_string());
                false
            }
        };
        self.settle(&mut transaction, verified, &computed, &received);

        if let (true, Ok(credentials)) = (verified, &credentials) {
            match self.confirmation_for(&content, &credentials.secret_key) {
                Ok(confirmed) => confirmation = confirmed,
                Err(e) => {
                    warn!("Could not sign IPN confirmation: {}", e);
                    transaction.note_error(e.to_string());
                }
            }
        }
        transaction.log("ipnConfirmContent", confirmation.confirm_content.as_str());
        transaction.log("ipnConfirmSignature", confirmation.signature.as_str());

        let context = LogContext::new(Interface::Ipn).with_ids(
            content.get("orderRef").map(value_text),
            content.get("transactionId").map(value_text),
        );
        transaction.write_log(self.log_sink.as_ref(), &context);

        IpnResult {
            content,
            verified,
            computed_signature: computed,
            received_signature: received,
            confirmation,
            errors: transaction.errors().to_vec(),
        }
    }

    /// Confirmation handed to the caller, who sends it on its own.
    pub fn ipn_confirm_content(&self, result: &IpnResult) -> IpnConfirmation {
        self.log_confirm_mode(result, "ipnReturnData provided as content");
        result.confirmation.clone()
    }

    /// Headers and body to answer the IPN request with directly.
    pub fn ipn_confirm_response(&self, result: &IpnResult) -> (Vec<(String, String)>, String) {
        self.log_confirm_mode(result, "Confirmed directly");
        let confirmation = &result.confirmation;
        let headers = vec![
            ("Accept-language".to_string(), "EN".to_string()),
            ("Content-type".to_string(), "application/json".to_string()),
            ("Signature".to_string(), confirmation.signature.clone()),
        ];
        (headers, confirmation.confirm_content.clone())
    }

    fn confirmation_for(
        &self,
        content: &Map<String, Value>,
        secret_key: &str,
    ) -> Result<IpnConfirmation, SimplePayError> {
        let mut echoed = content.clone();
        echoed.insert(
            "receiveDate".to_string(),
            json!(Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)),
        );
        let confirm_content = canonical_json(&echoed)?;
        let signature = self.signer.sign(secret_key, confirm_content.as_bytes())?;
        Ok(IpnConfirmation {
            confirm_content,
            signature,
        })
    }

    fn settle(&self, transaction: &mut Transaction, verified: bool, computed: &str, received: &str) {
        transaction.log("signatureToCheck", received);
        transaction.log("computedSignature", computed);
        transaction.log("signatureValid", verified);
        if verified {
            if transaction.advance(TransactionState::Verified).is_ok() {
                let _ = transaction.advance(TransactionState::Accepted);
            }
        } else if !transaction.state().is_terminal() {
            transaction.reject(
                SimplePayError::SignatureMismatch {
                    computed: computed.to_string(),
                    received: received.to_string(),
                }
                .to_string(),
            );
        }
    }

    fn log_confirm_mode(&self, result: &IpnResult, mode: &str) {
        let context = LogContext::new(Interface::Ipn).with_ids(
            result.content.get("orderRef").map(value_text),
            result.content.get("transactionId").map(value_text),
        );
        let mut log = Map::new();
        log.insert("confirmationMode".to_string(), json!(mode));
        if let Err(e) = self.log_sink.write(&context, &log) {
            warn!("Could not write transaction log: {}", e);
        }
    }
}

/// Base64 text of `r` decoded to its JSON text, or `[]` if it is not one.
pub fn decode_back_payload(r: &str) -> String {
    let decoded = BASE64
        .decode(r.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    match decoded {
        Some(text) if matches!(serde_json::from_str::<Value>(&text), Ok(Value::Object(_))) => text,
        _ => EMPTY_BACK_JSON.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::responses::{NOT_AVAILABLE, UNSUCCESSFUL_VALIDATION};
    use crate::services::logger::MemoryLogSink;
    use std::sync::Arc;

    fn config() -> MerchantConfig {
        MerchantConfig::default().with_merchant("HUF", "PUBLICTESTHUF", "FxDa5w314kLlNseq2sKuVwaqZshZT5d6")
    }

    fn sign(payload: &str) -> String {
        HmacSha384Signer
            .sign("FxDa5w314kLlNseq2sKuVwaqZshZT5d6", payload.as_bytes())
            .unwrap()
    }

    #[test]
    fn back_with_valid_signature_is_verified() {
        let json = r#"{"r":0,"t":99844942,"e":"SUCCESS","m":"PUBLICTESTHUF","o":"101010514"}"#;
        let r = BASE64.encode(json);
        let result = CallbackVerifier::new(config()).check_back(&r, &sign(json));

        assert!(result.verified, "{:?}", result.errors);
        assert_eq!(result.raw_json, json);
        assert_eq!(result.notification.transaction_id(), "99844942");
        assert!(result.notification.is_success_event());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn back_without_merchant_degrades_to_not_available() {
        let json = r#"{"r":0,"t":1,"e":"FAIL","o":"ORD-1"}"#;
        let result = CallbackVerifier::new(config()).check_back(&BASE64.encode(json), "sig");

        assert_eq!(result.notification.merchant(), NOT_AVAILABLE);
        assert!(!result.verified);
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn corrupt_back_payload_is_checked_as_empty_list() {
        assert_eq!(decode_back_payload("%%%not base64"), "[]");
        assert_eq!(decode_back_payload(&BASE64.encode("[1,2]")), "[]");

        let result = CallbackVerifier::new(config()).check_back("%%%", "");
        assert_eq!(result.raw_json, "[]");
        assert_eq!(result.notification, BackNotification::default());
        assert!(!result.verified);
    }

    #[test]
    fn valid_ipn_gets_signed_confirmation() {
        let sink = Arc::new(MemoryLogSink::new());
        let verifier = CallbackVerifier::new(config()).with_log_sink(sink.clone());
        let body = r#"{"salt":"abc","orderRef":"101010514","method":"CARD","merchant":"PUBLICTESTHUF","finishDate":"2020-01-01T10:00:00+01:00","paymentDate":"2020-01-01T09:59:00+01:00","transactionId":99844942,"status":"FINISHED"}"#;
        let headers = vec![("signature".to_string(), sign(body))];

        let result = verifier.check_ipn_headers(body, &headers);
        assert!(result.verified, "{:?}", result.errors);

        let confirmation = verifier.ipn_confirm_content(&result);
        assert!(confirmation.is_confirmed());
        let echoed: Value = serde_json::from_str(&confirmation.confirm_content).unwrap();
        assert_eq!(echoed["transactionId"], json!(99844942));
        assert!(echoed["receiveDate"].is_string());
        assert!(HmacSha384Signer.verify(
            "FxDa5w314kLlNseq2sKuVwaqZshZT5d6",
            confirmation.confirm_content.as_bytes(),
            &confirmation.signature
        ));

        let lines = sink.lines();
        assert!(lines.iter().any(|l| l.starts_with("101010514|99844942|ipn|")));
        assert!(lines.iter().any(|l| l.ends_with("|confirmationMode|ipnReturnData provided as content")));
    }

    #[test]
    fn tampered_ipn_is_not_confirmed() {
        let body = r#"{"orderRef":"1","merchant":"PUBLICTESTHUF","transactionId":1}"#;
        let verifier = CallbackVerifier::new(config());
        let result = verifier.check_ipn(body, &sign(r#"{"orderRef":"2"}"#));

        assert!(!result.verified);
        assert_eq!(result.confirmation, IpnConfirmation::unsuccessful());
        assert_ne!(result.computed_signature, result.received_signature);

        let (headers, content) = verifier.ipn_confirm_response(&result);
        assert_eq!(content, UNSUCCESSFUL_VALIDATION);
        assert!(headers.contains(&("Signature".to_string(), UNSUCCESSFUL_VALIDATION.to_string())));
    }

    #[test]
    fn ipn_for_unknown_merchant_is_rejected() {
        let body = r#"{"merchant":"SOMEONEELSE"}"#;
        let result = CallbackVerifier::new(config()).check_ipn(body, &sign(body));
        assert!(!result.verified);
        assert!(result.errors[0].contains("SOMEONEELSE"));
    }
}
