use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Currency whose amounts are always sent as whole units.
pub const WHOLE_UNIT_CURRENCY: &str = "HUF";

/// Monetary amount with the gateway's currency-dependent rounding rule.
///
/// - `HUF` amounts are truncated toward zero to whole forints
/// - every other currency keeps its decimal value unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Amount(pub Decimal);

impl Amount {
    pub fn new<T: Into<Decimal>>(value: T) -> Self {
        Amount(value.into())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .ok()
            .map(Amount)
    }

    /// The value as it is sent for `currency`.
    pub fn for_currency(&self, currency: &str) -> Decimal {
        if currency.eq_ignore_ascii_case(WHOLE_UNIT_CURRENCY) {
            self.0.trunc()
        } else {
            self.0.normalize()
        }
    }

    /// JSON number used in the current protocol payloads.
    pub fn to_json(&self, currency: &str) -> Value {
        let value = self.for_currency(currency);
        if value.fract().is_zero() {
            if let Some(whole) = value.to_i64() {
                return Value::from(whole);
            }
        }
        value
            .to_f64()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()))
    }

    /// Text form used in the legacy length-prefixed hash string.
    pub fn to_hash_string(&self, currency: &str) -> String {
        self.for_currency(currency).to_string()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl From<i32> for Amount {
    fn from(value: i32) -> Self {
        Amount(Decimal::from(value))
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Amount(Decimal::from(value))
    }
}

impl From<u32> for Amount {
    fn from(value: u32) -> Self {
        Amount(Decimal::from(value))
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount(value)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Accept either string or number
        let value = Value::deserialize(deserializer)?;
        let raw = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            _ => return Err(serde::de::Error::custom("Expected string or number")),
        };
        Amount::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("Invalid amount: {}", raw)))
    }
}

/// Gateway interface a call or notification belongs to. Written into every log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    Start,
    Back,
    Ipn,
    Query,
    Refund,
    Finish,
    LiveUpdate,
    Ios,
    Irn,
    Idn,
    LegacyIpn,
    BackRef,
}

impl Interface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interface::Start => "start",
            Interface::Back => "back",
            Interface::Ipn => "ipn",
            Interface::Query => "query",
            Interface::Refund => "refund",
            Interface::Finish => "finish",
            Interface::LiveUpdate => "liveupdate",
            Interface::Ios => "ios",
            Interface::Irn => "irn",
            Interface::Idn => "idn",
            Interface::LegacyIpn => "legacy_ipn",
            Interface::BackRef => "backref",
        }
    }
}

impl Serialize for Interface {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound operation kinds of the current protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    Query,
    Refund,
    Finish,
}

impl Operation {
    pub fn path(&self) -> &'static str {
        match self {
            Operation::Start => "/v2/start",
            Operation::Query => "/v2/query",
            Operation::Refund => "/v2/refund",
            Operation::Finish => "/v2/finish",
        }
    }

    pub fn interface(&self) -> Interface {
        match self {
            Operation::Start => Interface::Start,
            Operation::Query => Interface::Query,
            Operation::Refund => Interface::Refund,
            Operation::Finish => Interface::Finish,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.interface().as_str())
    }
}
