use super::{LegacyContext, IOS_PATH};
use crate::models::common::Interface;
use crate::models::responses::NOT_AVAILABLE;
use crate::services::transport::{remaining_time, OutboundRequest, Transport, TransportError};
use chrono::Local;
use log::{debug, info, warn};
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Units of work one poll may spend.
pub const MAX_RUN: u32 = 10;

pub const EMPTY_RESULT: &str = "EMPTY RESULT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    NotFound,
    CardNotAuthorized,
    InProgress,
    PaymentAuthorized,
    Complete,
    WaitingPayment,
    Fraud,
    Test,
    Refund,
    PaymentReceived,
    EmptyResult,
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Retryable,
    Success,
    Failure,
}

impl OrderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "NOT_FOUND" => OrderStatus::NotFound,
            "CARD_NOTAUTHORIZED" => OrderStatus::CardNotAuthorized,
            "IN_PROGRESS" => OrderStatus::InProgress,
            "PAYMENT_AUTHORIZED" => OrderStatus::PaymentAuthorized,
            "COMPLETE" => OrderStatus::Complete,
            "WAITING_PAYMENT" => OrderStatus::WaitingPayment,
            "FRAUD" => OrderStatus::Fraud,
            "TEST" => OrderStatus::Test,
            "REFUND" => OrderStatus::Refund,
            "PAYMENT_RECEIVED" => OrderStatus::PaymentReceived,
            EMPTY_RESULT => OrderStatus::EmptyResult,
            other => OrderStatus::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::NotFound => "NOT_FOUND",
            OrderStatus::CardNotAuthorized => "CARD_NOTAUTHORIZED",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::PaymentAuthorized => "PAYMENT_AUTHORIZED",
            OrderStatus::Complete => "COMPLETE",
            OrderStatus::WaitingPayment => "WAITING_PAYMENT",
            OrderStatus::Fraud => "FRAUD",
            OrderStatus::Test => "TEST",
            OrderStatus::Refund => "REFUND",
            OrderStatus::PaymentReceived => "PAYMENT_RECEIVED",
            OrderStatus::EmptyResult => EMPTY_RESULT,
            OrderStatus::Unknown(raw) => raw,
        }
    }

    /// Success covers the states a browser return counts as paid.
    pub fn class(&self) -> StatusClass {
        match self {
            OrderStatus::NotFound | OrderStatus::CardNotAuthorized => StatusClass::Retryable,
            OrderStatus::InProgress
            | OrderStatus::PaymentAuthorized
            | OrderStatus::Complete
            | OrderStatus::WaitingPayment => StatusClass::Success,
            _ => StatusClass::Failure,
        }
    }

    /// Statuses reported as an explicit failure on a browser return.
    pub fn is_unsuccessful(&self) -> bool {
        matches!(
            self,
            OrderStatus::CardNotAuthorized | OrderStatus::Fraud | OrderStatus::Test
        )
    }

    /// Units one answer with this status costs.
    pub fn poll_cost(&self, max_run: u32) -> u32 {
        match self {
            OrderStatus::NotFound => 1,
            OrderStatus::CardNotAuthorized => 5,
            _ => max_run,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<Order>` document of the order-status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename = "Order")]
pub struct IosDocument {
    #[serde(rename = "ORDER_DATE", default)]
    pub order_date: String,
    #[serde(rename = "REFNO", default)]
    pub refno: String,
    #[serde(rename = "REFNOEXT", default)]
    pub refnoext: String,
    #[serde(rename = "ORDER_STATUS", default)]
    pub order_status: String,
    #[serde(rename = "PAYMETHOD", default)]
    pub paymethod: String,
    #[serde(rename = "HASH", default)]
    pub hash: String,
}

impl IosDocument {
    /// Stand-in for an answer that never arrived.
    pub fn empty_result() -> Self {
        IosDocument {
            order_date: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            refno: NOT_AVAILABLE.to_string(),
            refnoext: NOT_AVAILABLE.to_string(),
            order_status: EMPTY_RESULT.to_string(),
            paymethod: NOT_AVAILABLE.to_string(),
            hash: NOT_AVAILABLE.to_string(),
        }
    }

    pub fn parse(xml: &str) -> Result<Self, quick_xml::de::DeError> {
        quick_xml::de::from_str(xml)
    }

    pub fn status(&self) -> OrderStatus {
        OrderStatus::parse(&self.order_status)
    }

    pub fn pairs(&self) -> Vec<(String, String)> {
        vec![
            ("ORDER_DATE".to_string(), self.order_date.clone()),
            ("REFNO".to_string(), self.refno.clone()),
            ("REFNOEXT".to_string(), self.refnoext.clone()),
            ("ORDER_STATUS".to_string(), self.order_status.clone()),
            ("PAYMETHOD".to_string(), self.paymethod.clone()),
            ("HASH".to_string(), self.hash.clone()),
        ]
    }
}

/// Pause between two status requests.
pub trait Backoff {
    fn pause(&self, status: &OrderStatus);
}

#[derive(Debug, Clone, Copy)]
pub struct ThreadSleep {
    pub delay: Duration,
}

impl Default for ThreadSleep {
    fn default() -> Self {
        ThreadSleep {
            delay: Duration::from_secs(1),
        }
    }
}

impl Backoff for ThreadSleep {
    fn pause(&self, _status: &OrderStatus) {
        std::thread::sleep(self.delay);
    }
}

#[derive(Debug, Clone)]
pub struct IosResult {
    pub order_ref: String,
    pub status: OrderStatus,
    pub document: IosDocument,
    pub calls: u32,
    pub units: u32,
    pub errors: Vec<String>,
}

/// Bounded order-status poll.
///
/// `NOT_FOUND` costs 1 unit and `CARD_NOTAUTHORIZED` 5, both followed by a
/// pause; any other answer spends the whole budget. A failed request counts
/// as an `EMPTY RESULT` answer.
pub struct OrderStatusPoller<'a> {
    transport: &'a dyn Transport,
    backoff: &'a dyn Backoff,
    max_run: u32,
}

impl<'a> OrderStatusPoller<'a> {
    pub fn new(transport: &'a dyn Transport, backoff: &'a dyn Backoff) -> Self {
        OrderStatusPoller {
            transport,
            backoff,
            max_run: MAX_RUN,
        }
    }

    pub fn with_max_run(mut self, max_run: u32) -> Self {
        self.max_run = max_run;
        self
    }

    pub fn poll(&self, ctx: &LegacyContext, order_ref: &str, deadline: Option<Instant>) -> IosResult {
        let mut errors = Vec::new();
        let request = match ctx.hash([ctx.merchant_id(), order_ref]) {
            Ok(hash) => vec![
                ("MERCHANT".to_string(), ctx.merchant_id().to_string()),
                ("REFNOEXT".to_string(), order_ref.to_string()),
                ("HASH".to_string(), hash),
            ],
            Err(e) => {
                errors.push(e.to_string());
                return IosResult {
                    order_ref: order_ref.to_string(),
                    status: OrderStatus::EmptyResult,
                    document: IosDocument::empty_result(),
                    calls: 0,
                    units: 0,
                    errors,
                };
            }
        };
        errors.extend(ctx.log_pairs(Interface::Ios, order_ref, &request));

        let url = ctx.url(IOS_PATH);
        let mut document = IosDocument::empty_result();
        let mut calls = 0;
        let mut units = 0;

        while units < self.max_run {
            let timeout = match remaining_time(deadline, ctx.timeout, IOS_PATH) {
                Ok(timeout) => timeout,
                Err(e) => {
                    warn!("Order status poll for {} stopped: {}", order_ref, e);
                    errors.push(e.to_string());
                    break;
                }
            };

            calls += 1;
            document = match self.request(&url, &request, timeout) {
                Ok(document) => document,
                Err(message) => {
                    warn!("Order status request for {} failed: {}", order_ref, message);
                    errors.push(message);
                    IosDocument::empty_result()
                }
            };

            let status = document.status();
            // a final answer spends what is left of the budget
            units = (units + status.poll_cost(self.max_run)).min(self.max_run);
            debug!("IOS ORDER_STATUS: {} ({} of {} units)", status, units, self.max_run);
            if status.class() == StatusClass::Retryable && units < self.max_run {
                self.backoff.pause(&status);
            }
        }

        let status = document.status();
        info!("Order status of {} after {} calls: {}", order_ref, calls, status);
        errors.extend(ctx.log_pairs(Interface::Ios, order_ref, &document.pairs()));
        IosResult {
            order_ref: order_ref.to_string(),
            status,
            document,
            calls,
            units,
            errors,
        }
    }

    fn request(&self, url: &str, fields: &[(String, String)], timeout: Duration) -> Result<IosDocument, String> {
        let response = self
            .transport
            .post(&OutboundRequest::form(url, fields, timeout))
            .map_err(|e| e.to_string())?;
        if !response.is_success() {
            return Err(TransportError::UnexpectedStatus {
                status: response.status,
                url: url.to_string(),
            }
            .to_string());
        }
        if response.body.trim().is_empty() {
            return Err(TransportError::EmptyResponse(url.to_string()).to_string());
        }
        IosDocument::parse(&response.body).map_err(|e| format!("Invalid order status XML: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, ScriptedTransport};
    use super::*;

    #[test]
    fn statuses_are_classified() {
        assert_eq!(OrderStatus::parse("NOT_FOUND").class(), StatusClass::Retryable);
        assert_eq!(OrderStatus::parse(" COMPLETE ").class(), StatusClass::Success);
        assert_eq!(OrderStatus::parse("FRAUD").class(), StatusClass::Failure);
        assert_eq!(OrderStatus::parse(EMPTY_RESULT), OrderStatus::EmptyResult);
        assert_eq!(
            OrderStatus::parse("SOMETHING"),
            OrderStatus::Unknown("SOMETHING".to_string())
        );
        assert!(OrderStatus::CardNotAuthorized.is_unsuccessful());
    }

    #[test]
    fn costs_follow_status() {
        assert_eq!(OrderStatus::NotFound.poll_cost(MAX_RUN), 1);
        assert_eq!(OrderStatus::CardNotAuthorized.poll_cost(MAX_RUN), 5);
        assert_eq!(OrderStatus::Complete.poll_cost(MAX_RUN), MAX_RUN);
        assert_eq!(OrderStatus::EmptyResult.poll_cost(MAX_RUN), MAX_RUN);
    }

    #[test]
    fn order_document_is_parsed() {
        let xml = r#"<?xml version="1.0"?>
            <Order>
                <ORDER_DATE>2020-01-01 10:00:00</ORDER_DATE>
                <REFNO>99844942</REFNO>
                <REFNOEXT>101010514</REFNOEXT>
                <ORDER_STATUS>COMPLETE</ORDER_STATUS>
                <PAYMETHOD>Visa/MasterCard/Eurocard</PAYMETHOD>
                <HASH>abc</HASH>
            </Order>"#;
        let document = IosDocument::parse(xml).unwrap();
        assert_eq!(document.refno, "99844942");
        assert_eq!(document.status(), OrderStatus::Complete);
    }

    #[test]
    fn synthetic_document_is_terminal() {
        let document = IosDocument::empty_result();
        assert_eq!(document.status(), OrderStatus::EmptyResult);
        assert_eq!(document.refno, NOT_AVAILABLE);
        assert_eq!(document.status().class(), StatusClass::Failure);
    }

    #[test]
    fn expired_deadline_makes_no_call() {
        struct Unreachable;
        impl Transport for Unreachable {
            fn post(&self, _request: &OutboundRequest) -> Result<crate::services::transport::RawResponse, TransportError> {
                panic!("no request expected");
            }
        }
        struct NoPause;
        impl Backoff for NoPause {
            fn pause(&self, _status: &OrderStatus) {}
        }

        let past = Instant::now() - Duration::from_millis(1);
        let result = OrderStatusPoller::new(&Unreachable, &NoPause).poll(&context(), "ORD-1", Some(past));
        assert_eq!(result.calls, 0);
        assert_eq!(result.status, OrderStatus::EmptyResult);
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn units_never_exceed_budget() {
        struct NoPause;
        impl Backoff for NoPause {
            fn pause(&self, _status: &OrderStatus) {}
        }
        let answer = |status: &str| {
            ScriptedTransport::ok(&format!(
                "<Order><REFNOEXT>ORD-1</REFNOEXT><ORDER_STATUS>{}</ORDER_STATUS></Order>",
                status
            ))
        };
        let transport = ScriptedTransport::new(vec![
            answer("NOT_FOUND"),
            answer("NOT_FOUND"),
            answer("CARD_NOTAUTHORIZED"),
            answer("COMPLETE"),
        ]);

        let result = OrderStatusPoller::new(&transport, &NoPause).poll(&context(), "ORD-1", None);
        assert_eq!(result.calls, 4);
        assert_eq!(result.units, MAX_RUN);
        assert_eq!(result.status, OrderStatus::Complete);
    }
}
