use super::fields::{IDN_FIELDS, IDN_HASH_FIELDS};
use super::transaction::{post_notification, EpaymentResponse, LegacyTransaction};
use super::{LegacyContext, LegacyError, IDN_PATH};
use crate::models::common::{Amount, Interface};
use crate::services::transport::Transport;
use chrono::Local;
use std::time::Instant;

/// Instant Delivery Notification: confirms delivery so an authorized order is captured.
#[derive(Debug, Clone)]
pub struct IdnRequest {
    pub order_ref: String,
    pub order_amount: Amount,
    pub order_currency: String,
    pub idn_date: String,
    /// Posted but not hashed.
    pub ref_url: Option<String>,
    pub refnoext: String,
}

impl IdnRequest {
    pub fn new(order_ref: &str, order_amount: impl Into<Amount>, currency: &str) -> Self {
        IdnRequest {
            order_ref: order_ref.to_string(),
            order_amount: order_amount.into(),
            order_currency: currency.to_string(),
            idn_date: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            ref_url: None,
            refnoext: String::new(),
        }
    }

    pub fn with_refnoext(mut self, refnoext: &str) -> Self {
        self.refnoext = refnoext.to_string();
        self
    }

    fn post_array(&self, ctx: &LegacyContext) -> Result<Vec<(String, String)>, LegacyError> {
        let currency = self.order_currency.as_str();
        let mut transaction = LegacyTransaction::new(&IDN_FIELDS, IDN_HASH_FIELDS);
        transaction.set_field("MERCHANT", ctx.merchant_id())?;
        transaction.set_field("ORDER_REF", &self.order_ref)?;
        transaction.set_field("ORDER_AMOUNT", &self.order_amount.to_hash_string(currency))?;
        transaction.set_field("ORDER_CURRENCY", currency)?;
        transaction.set_field("IDN_DATE", &self.idn_date)?;
        if let Some(ref_url) = &self.ref_url {
            transaction.set_field("REF_URL", ref_url)?;
        }
        transaction.post_array(ctx, "ORDER_HASH")
    }
}

pub fn request_idn(
    ctx: &LegacyContext,
    transport: &dyn Transport,
    request: &IdnRequest,
    deadline: Option<Instant>,
) -> Result<EpaymentResponse, LegacyError> {
    let fields = request.post_array(ctx)?;
    Ok(post_notification(
        ctx,
        transport,
        Interface::Idn,
        IDN_PATH,
        fields,
        &request.refnoext,
        deadline,
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, ScriptedTransport};
    use super::*;

    #[test]
    fn delivery_hash_leaves_out_ref_url() {
        let ctx = context();
        let mut request = IdnRequest::new("99844942", 207, "HUF").with_refnoext("101010514");
        request.idn_date = "2020-01-01 10:00:00".to_string();
        request.ref_url = Some("shop.test/idn".to_string());

        let transport = ScriptedTransport::new(vec![ScriptedTransport::ok("<EPAYMENT>99844942|1|OK|2020-01-01 10:00:01|bad</EPAYMENT>")]);
        let answer = request_idn(&ctx, &transport, &request, None).unwrap();
        assert!(!answer.hash_valid);
        assert_eq!(answer.date, "2020-01-01 10:00:01");

        let expected_hash = ctx
            .hash(["PUBLICTESTHUF", "99844942", "207", "HUF", "2020-01-01 10:00:00"])
            .unwrap();
        let body = &transport.sent()[0].body;
        assert!(body.contains("REF_URL=shop.test%2Fidn"));
        assert!(body.ends_with(&format!("ORDER_HASH={}", expected_hash)));
    }

    #[test]
    fn answer_without_epayment_is_flagged() {
        let transport = ScriptedTransport::new(vec![ScriptedTransport::ok("<html>maintenance</html>")]);
        let request = IdnRequest::new("1", 10, "HUF");
        let answer = request_idn(&context(), &transport, &request, None).unwrap();
        assert_eq!(answer.order_ref, "N/A");
        assert!(answer.errors.iter().any(|e| e.contains("EPAYMENT")));
    }
}
