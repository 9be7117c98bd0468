use super::fields::{IRN_FIELDS, IRN_HASH_FIELDS};
use super::transaction::{post_notification, EpaymentResponse, LegacyTransaction};
use super::{LegacyContext, LegacyError, IRN_PATH};
use crate::models::common::{Amount, Interface};
use crate::services::transport::Transport;
use chrono::Local;
use std::time::Instant;

/// Instant Refund Notification: refunds part or all of a paid order.
#[derive(Debug, Clone)]
pub struct IrnRequest {
    /// Gateway reference number of the order.
    pub order_ref: String,
    pub order_amount: Amount,
    pub order_currency: String,
    pub irn_date: String,
    /// Amount to refund.
    pub amount: Amount,
    /// Merchant's own order reference, used for logging.
    pub refnoext: String,
}

impl IrnRequest {
    pub fn new(order_ref: &str, order_amount: impl Into<Amount>, currency: &str, amount: impl Into<Amount>) -> Self {
        IrnRequest {
            order_ref: order_ref.to_string(),
            order_amount: order_amount.into(),
            order_currency: currency.to_string(),
            irn_date: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            amount: amount.into(),
            refnoext: String::new(),
        }
    }

    pub fn with_refnoext(mut self, refnoext: &str) -> Self {
        self.refnoext = refnoext.to_string();
        self
    }

    fn post_array(&self, ctx: &LegacyContext) -> Result<Vec<(String, String)>, LegacyError> {
        let currency = self.order_currency.as_str();
        let mut transaction = LegacyTransaction::new(&IRN_FIELDS, IRN_HASH_FIELDS);
        transaction.set_field("MERCHANT", ctx.merchant_id())?;
        transaction.set_field("ORDER_REF", &self.order_ref)?;
        transaction.set_field("ORDER_AMOUNT", &self.order_amount.to_hash_string(currency))?;
        transaction.set_field("ORDER_CURRENCY", currency)?;
        transaction.set_field("IRN_DATE", &self.irn_date)?;
        transaction.set_field("AMOUNT", &self.amount.to_hash_string(currency))?;
        transaction.post_array(ctx, "ORDER_HASH")
    }
}

pub fn request_irn(
    ctx: &LegacyContext,
    transport: &dyn Transport,
    request: &IrnRequest,
    deadline: Option<Instant>,
) -> Result<EpaymentResponse, LegacyError> {
    let fields = request.post_array(ctx)?;
    Ok(post_notification(
        ctx,
        transport,
        Interface::Irn,
        IRN_PATH,
        fields,
        &request.refnoext,
        deadline,
    ))
}
