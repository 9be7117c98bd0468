//! Legacy (V1) protocol: form posts, `<EPAYMENT>` answers and XML order status.

pub mod backref;
pub mod fields;
pub mod idn;
pub mod ios;
pub mod ipn;
pub mod irn;
pub mod live_update;
pub mod transaction;

use crate::models::common::Interface;
use crate::models::config::{MerchantConfig, MerchantCredentials};
use crate::services::crypto::{CryptoError, LegacyHmacSigner};
use crate::services::logger::{sink_for_config, LogContext, LogSink};
use crate::services::merchant::{resolve, ConfigurationError};
use log::warn;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub const LEGACY_LIVE_URL: &str = "https://secure.simplepay.hu/payment/";
pub const LEGACY_SANDBOX_URL: &str = "https://sandbox.simplepay.hu/payment/";
pub const LIVE_UPDATE_PATH: &str = "order/lu.php";
pub const IOS_PATH: &str = "order/ios.php";
pub const IRN_PATH: &str = "order/irn.php";
pub const IDN_PATH: &str = "order/idn.php";

#[derive(Error, Debug)]
pub enum LegacyError {
    #[error("Missing field: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Invalid field: {0}")]
    UnknownField(String),

    #[error("Missing post content")]
    MissingContent,

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Hash error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Merchant, digest and environment of one legacy call, resolved by currency.
pub struct LegacyContext {
    pub currency: String,
    pub credentials: MerchantCredentials,
    pub sandbox: bool,
    pub protocol: String,
    pub timeout: Duration,
    signer: LegacyHmacSigner,
    log_sink: Box<dyn LogSink + Send + Sync>,
}

impl LegacyContext {
    pub fn new(config: &MerchantConfig, currency: &str) -> Result<Self, LegacyError> {
        let credentials = resolve(config, currency)?;
        Ok(LegacyContext {
            currency: currency.trim().to_ascii_uppercase(),
            credentials,
            sandbox: config.sandbox,
            protocol: config.protocol.clone(),
            timeout: config.timeout,
            signer: LegacyHmacSigner::new(config.hash_algorithm),
            log_sink: sink_for_config(config),
        })
    }

    pub fn with_log_sink(mut self, sink: impl LogSink + Send + Sync + 'static) -> Self {
        self.log_sink = Box::new(sink);
        self
    }

    pub fn merchant_id(&self) -> &str {
        &self.credentials.merchant_id
    }

    pub fn url(&self, path: &str) -> String {
        let base = if self.sandbox {
            LEGACY_SANDBOX_URL
        } else {
            LEGACY_LIVE_URL
        };
        format!("{}{}", base, path)
    }

    /// Hex HMAC over the length-prefixed values.
    pub fn hash<I, S>(&self, values: I) -> Result<String, LegacyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self
            .signer
            .hash_values(&self.credentials.secret_key, values)?)
    }

    /// Writes `content` to the transaction log. Failures come back as a message.
    pub fn log(&self, interface: Interface, order_ref: &str, content: &Map<String, Value>) -> Option<String> {
        let context = LogContext::new(interface).with_ids(Some(order_ref.to_string()), None);
        match self.log_sink.write(&context, content) {
            Ok(()) => None,
            Err(e) => {
                warn!("Could not write transaction log: {}", e);
                Some(format!("Log: {}", e))
            }
        }
    }

    pub fn log_pairs(&self, interface: Interface, order_ref: &str, pairs: &[(String, String)]) -> Option<String> {
        let mut content = Map::new();
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (key, value) in pairs {
            // repeated product keys are numbered per product
            let key = match key.strip_suffix("[]") {
                Some(base) => {
                    let index = seen.entry(base).or_insert(0);
                    *index += 1;
                    format!("{}_{}", base, *index - 1)
                }
                None => key.clone(),
            };
            content.insert(key, Value::String(value.clone()));
        }
        self.log(interface, order_ref, &content)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn context_resolves_merchant_by_currency() {
        let ctx = context();
        assert_eq!(ctx.merchant_id(), "PUBLICTESTHUF");
        assert_eq!(ctx.url(IOS_PATH), "https://sandbox.simplepay.hu/payment/order/ios.php");
        assert!(LegacyContext::new(&config(), "EUR").is_err());
    }

    #[test]
    fn hash_is_lowercase_hex_md5_by_default() {
        let hash = context().hash(["PUBLICTESTHUF", "ORD-1"]).unwrap();
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
