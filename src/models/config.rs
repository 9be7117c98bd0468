use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_LOG_PATH: &str = "log";

/// Digest used by the legacy HMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegacyHashAlgorithm {
    #[default]
    Md5,
    Sha1,
    Sha256,
}

impl LegacyHashAlgorithm {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "md5" => Some(LegacyHashAlgorithm::Md5),
            "sha1" => Some(LegacyHashAlgorithm::Sha1),
            "sha256" => Some(LegacyHashAlgorithm::Sha256),
            _ => None,
        }
    }
}

/// One merchant account: the id sent to the gateway and its shared secret.
#[derive(Clone, PartialEq, Eq)]
pub struct MerchantCredentials {
    pub merchant_id: String,
    pub secret_key: String,
}

// The secret never shows up in debug output
impl std::fmt::Debug for MerchantCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantCredentials")
            .field("merchant_id", &self.merchant_id)
            .field("secret_key", &"***")
            .finish()
    }
}

/// Merchant configuration, loaded once and shared read-only.
///
/// Raw `<CUR>_MERCHANT` / `<CUR>_SECRET_KEY` entries are kept as given so the
/// resolver can do both forward (currency) and reverse (account) lookups.
#[derive(Clone)]
pub struct MerchantConfig {
    entries: BTreeMap<String, String>,
    pub sandbox: bool,
    pub logger: bool,
    pub log_path: PathBuf,
    pub auto_challenge: bool,
    pub timeout: Duration,
    pub hash_algorithm: LegacyHashAlgorithm,
    pub protocol: String,
}

impl Default for MerchantConfig {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            sandbox: false,
            logger: false,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            auto_challenge: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            hash_algorithm: LegacyHashAlgorithm::Md5,
            protocol: "http".to_string(),
        }
    }
}

impl MerchantConfig {
    /// Build from `KEY = value` pairs. Unknown keys are kept as raw entries.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = MerchantConfig::default();
        for (key, value) in pairs {
            config.set(key.into(), value.into());
        }
        config
    }

    /// Build from the process environment (after loading `.env`).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let pairs = std::env::vars().filter(|(key, _)| is_recognized_key(key));
        Self::from_pairs(pairs)
    }

    pub fn set(&mut self, key: String, value: String) {
        match key.as_str() {
            "SANDBOX" => self.sandbox = parse_flag(&value),
            "LOGGER" => self.logger = parse_flag(&value),
            "LOG_PATH" => self.log_path = PathBuf::from(value.trim()),
            "AUTOCHALLENGE" => self.auto_challenge = parse_flag(&value),
            "TIMEOUT" => {
                if let Ok(seconds) = value.trim().parse::<u64>() {
                    self.timeout = Duration::from_secs(seconds);
                } else {
                    log::warn!("Ignoring invalid TIMEOUT value: {}", value);
                }
            }
            "HASH_ALGO" => match LegacyHashAlgorithm::parse(&value) {
                Some(algorithm) => self.hash_algorithm = algorithm,
                None => log::warn!("Ignoring unsupported HASH_ALGO value: {}", value),
            },
            "PROTOCOL" => self.protocol = value.trim().to_string(),
            _ => {
                self.entries.insert(key, value);
            }
        }
    }

    pub fn with_merchant(mut self, currency: &str, merchant_id: &str, secret_key: &str) -> Self {
        let currency = currency.to_ascii_uppercase();
        self.entries
            .insert(format!("{}_MERCHANT", currency), merchant_id.to_string());
        self.entries
            .insert(format!("{}_SECRET_KEY", currency), secret_key.to_string());
        self
    }

    pub fn entry(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl std::fmt::Debug for MerchantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries: Vec<(&String, &str)> = self
            .entries
            .iter()
            .map(|(k, v)| {
                let shown = if k.ends_with("_SECRET_KEY") { "***" } else { v.as_str() };
                (k, shown)
            })
            .collect();
        f.debug_struct("MerchantConfig")
            .field("entries", &entries)
            .field("sandbox", &self.sandbox)
            .field("logger", &self.logger)
            .field("log_path", &self.log_path)
            .field("auto_challenge", &self.auto_challenge)
            .field("timeout", &self.timeout)
            .field("hash_algorithm", &self.hash_algorithm)
            .field("protocol", &self.protocol)
            .finish()
    }
}

fn is_recognized_key(key: &str) -> bool {
    matches!(
        key,
        "SANDBOX" | "LOGGER" | "LOG_PATH" | "AUTOCHALLENGE" | "TIMEOUT" | "HASH_ALGO" | "PROTOCOL"
    ) || key.ends_with("_MERCHANT")
        || key.ends_with("_SECRET_KEY")
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
