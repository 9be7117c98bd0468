use super::{LegacyContext, LegacyError};
use crate::models::common::Interface;
use crate::services::crypto::constant_time_eq;
use chrono::Local;
use log::{info, warn};

/// `ORDERSTATUS` values an IPN may carry.
pub const SUCCESSFUL_IPN_STATUSES: [&str; 4] = [
    "PAYMENT_AUTHORIZED", // IPN
    "COMPLETE",           // IDN
    "REFUND",             // IRN
    "PAYMENT_RECEIVED",   // wire transfer
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyIpnResult {
    pub valid: bool,
    pub computed_hash: String,
    pub received_hash: String,
    pub errors: Vec<String>,
}

/// Form-encoded IPN post: ordered pairs, products as repeated `NAME[]` keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpnPost {
    pairs: Vec<(String, String)>,
}

impl IpnPost {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        IpnPost { pairs }
    }

    pub fn parse(body: &str) -> Self {
        let pairs = url::form_urlencoded::parse(body.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        IpnPost { pairs }
    }

    /// First value of `name`, also matching `name[]` and `name[0]` style keys.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name || key.strip_prefix(name).map(|rest| rest.starts_with('[')).unwrap_or(false))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Every value except those under `skip`. Values of a repeated field are
    /// grouped at the position where the field first appears.
    pub fn values_except(&self, skip: &str) -> Vec<&str> {
        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for (key, value) in self.pairs.iter().filter(|(key, _)| key != skip) {
            let name = field_name(key);
            match groups.iter_mut().find(|(seen, _)| *seen == name) {
                Some((_, values)) => values.push(value.as_str()),
                None => groups.push((name, vec![value.as_str()])),
            }
        }
        groups.into_iter().flat_map(|(_, values)| values).collect()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

/// `IPN_PID[]` and `IPN_PID[0]` both belong to `IPN_PID`.
fn field_name(key: &str) -> &str {
    key.split('[').next().unwrap_or(key)
}

pub fn validate_received(ctx: &LegacyContext, post: &IpnPost) -> LegacyIpnResult {
    let mut result = LegacyIpnResult {
        valid: false,
        computed_hash: String::new(),
        received_hash: post.first("HASH").unwrap_or_default().to_string(),
        errors: Vec::new(),
    };
    let Some(refnoext) = post.first("REFNOEXT") else {
        result.errors.push(LegacyError::MissingContent.to_string());
        return result;
    };
    result.errors.extend(ctx.log_pairs(Interface::LegacyIpn, refnoext, post.pairs()));

    let status = post.first("ORDERSTATUS").unwrap_or_default().trim();
    if !SUCCESSFUL_IPN_STATUSES.contains(&status) {
        warn!("Invalid IPN order status for {}: {}", refnoext, status);
        result.errors.push(format!("INVALID IPN ORDER STATUS: {}", status));
        return result;
    }

    match ctx.hash(post.values_except("HASH")) {
        Ok(computed) => {
            result.valid = constant_time_eq(&computed, &result.received_hash);
            result.computed_hash = computed;
        }
        Err(e) => result.errors.push(e.to_string()),
    }
    if !result.valid {
        result.errors.push("IPN VALIDATION: FAILED".to_string());
    }
    info!("Legacy IPN for {} valid: {}", refnoext, result.valid);
    result
}

/// `<EPAYMENT>date|hash</EPAYMENT>` answer acknowledging the IPN.
pub fn confirm_received(ctx: &LegacyContext, post: &IpnPost) -> Result<String, LegacyError> {
    let server_date = Local::now().format("%Y%m%d%H%M%S").to_string();
    confirm_at(ctx, post, &server_date)
}

fn confirm_at(ctx: &LegacyContext, post: &IpnPost, server_date: &str) -> Result<String, LegacyError> {
    if post.is_empty() || post.first("REFNOEXT").is_none() {
        return Err(LegacyError::MissingContent);
    }
    let hash = ctx.hash([
        post.first("IPN_PID").unwrap_or_default(),
        post.first("IPN_PNAME").unwrap_or_default(),
        post.first("IPN_DATE").unwrap_or_default(),
        server_date,
    ])?;
    Ok(format!("<EPAYMENT>{}|{}</EPAYMENT>", server_date, hash))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::*;

    fn signed_post(status: &str) -> IpnPost {
        let ctx = context();
        let mut pairs: Vec<(String, String)> = [
            ("SALEDATE", "2020-01-01 10:00:00"),
            ("REFNO", "99844942"),
            ("REFNOEXT", "101010514"),
            ("ORDERSTATUS", status),
            ("IPN_PID[]", "1"),
            ("IPN_PNAME[]", "Lorem"),
            ("IPN_PID[]", "2"),
            ("IPN_PNAME[]", "Ipsum"),
            ("IPN_DATE", "20200101100500"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let hash = ctx
            .hash([
                "2020-01-01 10:00:00", "99844942", "101010514", status, "1", "2", "Lorem", "Ipsum",
                "20200101100500",
            ])
            .unwrap();
        pairs.push(("HASH".to_string(), hash));
        IpnPost::new(pairs)
    }

    #[test]
    fn signed_post_validates() {
        let result = validate_received(&context(), &signed_post("COMPLETE"));
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.computed_hash, result.received_hash);
    }

    #[test]
    fn tampered_post_fails() {
        let mut pairs = signed_post("COMPLETE").pairs().to_vec();
        pairs[1].1 = "1".to_string();
        let result = validate_received(&context(), &IpnPost::new(pairs));
        assert!(!result.valid);
        assert!(result.errors.contains(&"IPN VALIDATION: FAILED".to_string()));
    }

    #[test]
    fn unexpected_status_is_refused() {
        let result = validate_received(&context(), &signed_post("FRAUD"));
        assert!(!result.valid);
        assert_eq!(result.errors, ["INVALID IPN ORDER STATUS: FRAUD"]);
    }

    #[test]
    fn post_without_refnoext_has_no_content() {
        let post = IpnPost::parse("REFNO=1&HASH=x");
        assert!(!validate_received(&context(), &post).valid);
        assert!(matches!(confirm_received(&context(), &post), Err(LegacyError::MissingContent)));
    }

    #[test]
    fn confirmation_hashes_first_product_and_dates() {
        let ctx = context();
        let confirmation = confirm_at(&ctx, &signed_post("COMPLETE"), "20200101100600").unwrap();
        let hash = ctx.hash(["1", "Lorem", "20200101100500", "20200101100600"]).unwrap();
        assert_eq!(confirmation, format!("<EPAYMENT>20200101100600|{}</EPAYMENT>", hash));
    }

    #[test]
    fn form_body_keeps_array_keys() {
        let post = IpnPost::parse("REFNOEXT=1&IPN_PID%5B%5D=7&IPN_PID%5B%5D=8");
        assert_eq!(post.first("IPN_PID"), Some("7"));
        assert_eq!(post.values_except("HASH"), ["1", "7", "8"]);
        assert_eq!(post.first("IPN"), None);
    }

    #[test]
    fn interleaved_products_are_hashed_per_field() {
        let post = IpnPost::parse(
            "REFNOEXT=1&IPN_PID%5B%5D=7&IPN_PNAME%5B%5D=A&IPN_PID%5B%5D=8&IPN_PNAME%5B%5D=B&IPN_DATE=d&HASH=h",
        );
        assert_eq!(post.values_except("HASH"), ["1", "7", "8", "A", "B", "d"]);

        let indexed = IpnPost::parse("IPN_PID%5B0%5D=7&IPN_QTY%5B0%5D=1&IPN_PID%5B1%5D=8");
        assert_eq!(indexed.values_except("HASH"), ["7", "8", "1"]);
    }
}
