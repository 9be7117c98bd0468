use super::common::Interface;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const NOT_AVAILABLE: &str = "N/A";
pub const UNSUCCESSFUL_VALIDATION: &str = "UNSUCCESSFUL VALIDATION";

/// Lifecycle of one call: `Built → Signed → Sent → ResponseReceived → Verified → {Accepted | Rejected}`.
///
/// Inbound callbacks enter at `ResponseReceived`. Any non-terminal state may
/// drop straight to `Rejected`; nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Built,
    Signed,
    Sent,
    ResponseReceived,
    Verified,
    Accepted,
    Rejected,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Accepted | TransactionState::Rejected)
    }

    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        use TransactionState::*;
        match (self, next) {
            (Accepted, _) | (Rejected, _) => false,
            (_, Rejected) => true,
            (Built, Signed) | (Built, ResponseReceived) => true,
            (Signed, Sent) => true,
            (Sent, ResponseReceived) => true,
            (ResponseReceived, Verified) => true,
            (Verified, Accepted) => true,
            _ => false,
        }
    }
}

/// Outcome of one outbound call, handed to the caller once.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionResult {
    pub interface: Interface,
    pub state: TransactionState,
    /// Top-level fields of the response body.
    pub fields: Map<String, Value>,
    pub response_body: String,
    pub response_signature: String,
    pub computed_signature: String,
    pub errors: Vec<String>,
}

impl TransactionResult {
    pub fn is_valid(&self) -> bool {
        self.state == TransactionState::Accepted
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Field as text; numbers are rendered, missing keys give `None`.
    pub fn get_text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn transaction_id(&self) -> Option<String> {
        self.get_text("transactionId")
            .or_else(|| self.get_text("cardId"))
    }

    pub fn order_ref(&self) -> Option<String> {
        self.get_text("orderRef")
    }

    pub fn payment_url(&self) -> Option<&str> {
        self.get_str("paymentUrl").filter(|url| !url.is_empty())
    }

    pub fn error_codes(&self) -> Vec<String> {
        match self.fields.get("errorCodes") {
            Some(Value::Array(codes)) => codes
                .iter()
                .map(|code| match code {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Decoded browser return (`r` / `s` query parameters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackNotification {
    /// Gateway result code
    pub r: Value,
    /// Transaction id
    pub t: Value,
    /// Event: SUCCESS, FAIL, CANCEL, TIMEOUT
    pub e: Value,
    /// Merchant account
    pub m: Value,
    /// Order reference
    pub o: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for BackNotification {
    fn default() -> Self {
        let na = || Value::String(NOT_AVAILABLE.to_string());
        BackNotification {
            r: na(),
            t: na(),
            e: na(),
            m: na(),
            o: na(),
            extra: Map::new(),
        }
    }
}

impl BackNotification {
    /// Overlays decoded keys on the `N/A` defaults.
    pub fn from_map(decoded: Map<String, Value>) -> Self {
        let mut notification = BackNotification::default();
        for (key, value) in decoded {
            match key.as_str() {
                "r" => notification.r = value,
                "t" => notification.t = value,
                "e" => notification.e = value,
                "m" => notification.m = value,
                "o" => notification.o = value,
                _ => {
                    notification.extra.insert(key, value);
                }
            }
        }
        notification
    }

    pub fn event(&self) -> String {
        value_text(&self.e)
    }

    pub fn transaction_id(&self) -> String {
        value_text(&self.t)
    }

    pub fn order_ref(&self) -> String {
        value_text(&self.o)
    }

    pub fn merchant(&self) -> String {
        value_text(&self.m)
    }

    pub fn is_success_event(&self) -> bool {
        self.event() == "SUCCESS"
    }
}

/// Result of checking a Back redirect.
#[derive(Debug, Clone, Serialize)]
pub struct BackResult {
    pub notification: BackNotification,
    /// Decoded JSON text the signature was checked against.
    pub raw_json: String,
    pub verified: bool,
    pub computed_signature: String,
    pub received_signature: String,
    pub errors: Vec<String>,
}

/// Confirmation the merchant sends back to the gateway after a valid IPN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpnConfirmation {
    #[serde(rename = "confirmContent")]
    pub confirm_content: String,
    pub signature: String,
}

impl IpnConfirmation {
    pub fn unsuccessful() -> Self {
        IpnConfirmation {
            confirm_content: UNSUCCESSFUL_VALIDATION.to_string(),
            signature: UNSUCCESSFUL_VALIDATION.to_string(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.signature != UNSUCCESSFUL_VALIDATION
    }
}

/// Result of checking an IPN.
#[derive(Debug, Clone, Serialize)]
pub struct IpnResult {
    pub content: Map<String, Value>,
    pub verified: bool,
    pub computed_signature: String,
    pub received_signature: String,
    pub confirmation: IpnConfirmation,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
