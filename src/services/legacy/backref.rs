use super::ios::{IosResult, OrderStatusPoller, StatusClass};
use super::LegacyContext;
use crate::models::common::Interface;
use crate::models::responses::NOT_AVAILABLE;
use crate::services::crypto::constant_time_eq;
use log::{info, warn};
use std::time::Instant;

/// `&ctrl=` plus a 32 character hash closes every BackRef URL.
const CTRL_SUFFIX_LEN: usize = 38;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackStatus {
    pub backref_date: String,
    pub refnoext: String,
    pub payrefno: String,
    pub order_status: String,
    pub paymethod: String,
    pub result: bool,
}

#[derive(Debug, Clone)]
pub struct BackRefResult {
    pub status: BackStatus,
    pub ctrl_valid: bool,
    pub ios: Option<IosResult>,
    pub errors: Vec<String>,
}

impl BackRefResult {
    pub fn is_successful(&self) -> bool {
        self.ctrl_valid && self.status.result
    }
}

/// Full URL the browser came back on.
pub fn request_url(protocol: &str, host: &str, request_uri: &str) -> String {
    let protocol = if protocol.is_empty() { "http" } else { protocol };
    format!("{}://{}{}", protocol, host, request_uri)
}

fn query_pairs(url: &str) -> Vec<(String, String)> {
    match url::Url::parse(url) {
        Ok(parsed) => parsed
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect(),
        Err(e) => {
            warn!("Unreadable BackRef URL {}: {}", url, e);
            Vec::new()
        }
    }
}

fn get<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Checks the `ctrl` hash of the return URL, then asks the order status.
///
/// `RT` starting with `000` or `001` counts as paid, an empty `RT` defers to
/// the order status, a missing `RT` is a failure.
pub fn check_response(
    ctx: &LegacyContext,
    url: &str,
    poller: &OrderStatusPoller<'_>,
    deadline: Option<Instant>,
) -> BackRefResult {
    let query = query_pairs(url);
    let text = |name: &str| get(&query, name).unwrap_or(NOT_AVAILABLE).to_string();
    let mut result = BackRefResult {
        status: BackStatus {
            backref_date: text("date"),
            refnoext: text("order_ref"),
            payrefno: text("payrefno"),
            order_status: NOT_AVAILABLE.to_string(),
            paymethod: NOT_AVAILABLE.to_string(),
            result: false,
        },
        ctrl_valid: false,
        ios: None,
        errors: Vec::new(),
    };

    let Some(order_ref) = get(&query, "order_ref") else {
        result.errors.push("CHECK RESPONSE: Missing order_ref variable!".to_string());
        return result;
    };
    result.errors.extend(ctx.log_pairs(Interface::BackRef, order_ref, &query));

    result.ctrl_valid = check_ctrl(ctx, url, get(&query, "ctrl"));
    if !result.ctrl_valid {
        result.errors.push("HASH: Calculated hash is not valid!".to_string());
        result.errors.push(format!(
            "BACKREF ERROR: {}",
            get(&query, "err").unwrap_or_default()
        ));
        result.errors.push("CHECK RESPONSE: INVALID CTRL!".to_string());
        return result;
    }

    let ios = poller.poll(ctx, order_ref, deadline);
    result.errors.extend(ios.errors.iter().cloned());
    result.status.order_status = ios.document.order_status.clone();
    result.status.paymethod = ios.document.paymethod.clone();
    match ios.status.class() {
        StatusClass::Success => result.status.result = true,
        _ if ios.status.is_unsuccessful() => {
            result.errors.push("IOS STATUS: UNSUCCESSFUL!".to_string());
        }
        _ => {}
    }

    match get(&query, "RT") {
        Some(rt) if rt.starts_with("000") || rt.starts_with("001") => result.status.result = true,
        Some("") => result.status.result = ios.status.class() == StatusClass::Success,
        Some(_) => {}
        None => {
            result.status.result = false;
            result.errors.push("Missing variables: (RT)!".to_string());
        }
    }

    let status_pairs = vec![
        ("BACKREF_DATE".to_string(), result.status.backref_date.clone()),
        ("REFNOEXT".to_string(), result.status.refnoext.clone()),
        ("PAYREFNO".to_string(), result.status.payrefno.clone()),
        ("ORDER_STATUS".to_string(), result.status.order_status.clone()),
        ("PAYMETHOD".to_string(), result.status.paymethod.clone()),
        ("RESULT".to_string(), result.status.result.to_string()),
    ];
    result.errors.extend(ctx.log_pairs(Interface::BackRef, order_ref, &status_pairs));
    info!(
        "BackRef for {}: status {}, result {}",
        order_ref, ios.status, result.status.result
    );
    result.ios = Some(ios);
    result
}

/// `ctrl` is the hash of the URL without its trailing `&ctrl=...` part.
pub fn check_ctrl(ctx: &LegacyContext, url: &str, ctrl: Option<&str>) -> bool {
    let Some(ctrl) = ctrl else {
        return false;
    };
    let end = url.len().saturating_sub(CTRL_SUFFIX_LEN);
    let Some(signed_url) = url.get(..end) else {
        return false;
    };
    match ctx.hash([signed_url]) {
        Ok(computed) => constant_time_eq(&computed, ctrl),
        Err(_) => false,
    }
}
