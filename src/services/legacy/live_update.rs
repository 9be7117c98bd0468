use super::fields::{LIVE_UPDATE_FIELDS, LIVE_UPDATE_HASH_FIELDS};
use super::transaction::{FormValue, LegacyTransaction};
use super::{LegacyContext, LegacyError, LIVE_UPDATE_PATH};
use crate::models::common::Interface;
use crate::services::simplepay_service::SDK_VERSION;
use crate::services::views::{FormDetails, Renderer};
use chrono::Local;
use log::{info, warn};

const HASH_FIELD: &str = "ORDER_HASH";

/// Hosted payment page order, handed over as an auto-posting HTML form.
pub struct LiveUpdate<'a> {
    ctx: &'a LegacyContext,
    transaction: LegacyTransaction,
}

impl<'a> LiveUpdate<'a> {
    pub fn new(ctx: &'a LegacyContext) -> Result<Self, LegacyError> {
        let mut transaction = LegacyTransaction::new(&LIVE_UPDATE_FIELDS, LIVE_UPDATE_HASH_FIELDS);
        let order_date = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        transaction.set_field("PRICES_CURRENCY", &ctx.currency)?;
        transaction.set_field("ORDER_DATE", &order_date)?;
        transaction.set_field("MERCHANT", ctx.merchant_id())?;
        Ok(LiveUpdate { ctx, transaction })
    }

    pub fn set_field(&mut self, name: &str, value: &str) -> Result<&mut Self, LegacyError> {
        self.transaction.set_field(name, value)?;
        Ok(self)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.transaction.field(name)
    }

    pub fn add_product(&mut self, product: &[(&str, &str)]) -> &mut Self {
        self.transaction.add_product(product);
        self
    }

    pub fn target_url(&self) -> String {
        self.ctx.url(LIVE_UPDATE_PATH)
    }

    /// Hidden-field pairs of the form, return URLs decorated, hash and SDK version included.
    pub fn form_fields(&self) -> Result<Vec<(String, String)>, LegacyError> {
        let data = self.transaction.prepare(self.ctx, HASH_FIELD)?;
        let order_ref = self.transaction.field("ORDER_REF").unwrap_or_default();
        let currency = self.transaction.field("PRICES_CURRENCY").unwrap_or_default();

        let mut pairs = Vec::new();
        for (name, value) in data {
            match value {
                FormValue::Product(values) => {
                    pairs.extend(values.into_iter().map(|value| (format!("{}[]", name), value)));
                }
                FormValue::Single(value) if name == "BACK_REF" || name == "TIMEOUT_URL" => {
                    let url = return_url(&self.ctx.protocol, &value, order_ref, currency);
                    pairs.push((name, url));
                }
                FormValue::Single(value) => pairs.push((name, value)),
            }
        }
        pairs.push(("SDK_VERSION".to_string(), SDK_VERSION.to_string()));
        Ok(pairs)
    }

    /// Form posting the order to the LiveUpdate page.
    pub fn create_html_form(&self, renderer: &dyn Renderer, form: &FormDetails) -> Result<String, LegacyError> {
        let pairs = self.form_fields()?;
        let order_ref = self.transaction.field("ORDER_REF").unwrap_or_default();
        if let Some(message) = self.ctx.log_pairs(Interface::LiveUpdate, order_ref, &pairs) {
            warn!("LiveUpdate form for {} was not logged: {}", order_ref, message);
        }
        info!("LiveUpdate form created for order {}", order_ref);
        Ok(renderer.hidden_form(&self.target_url(), &pairs, form))
    }
}

/// `<protocol>://<url>` with `order_ref` and `order_currency` appended.
pub fn return_url(protocol: &str, url: &str, order_ref: &str, currency: &str) -> String {
    let concat = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}://{}{}order_ref={}&order_currency={}",
        protocol, url, concat, order_ref, currency
    )
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::*;
    use crate::services::logger::{LogContext, LogError, LogSink};
    use crate::services::views::HtmlRenderer;
    use serde_json::{Map, Value};

    fn filled(ctx: &LegacyContext) -> LiveUpdate<'_> {
        let mut lu = LiveUpdate::new(ctx).unwrap();
        for (name, value) in [
            ("ORDER_REF", "101010514"),
            ("BACK_REF", "shop.test/backref.php"),
            ("TIMEOUT_URL", "shop.test/timeout.php?x=1"),
            ("BILL_FNAME", "Tester"),
            ("BILL_LNAME", "SimplePay"),
            ("BILL_EMAIL", "sdk_test@otpmobil.com"),
            ("BILL_PHONE", "36201234567"),
            ("BILL_ADDRESS", "First line address"),
            ("BILL_ZIPCODE", "1234"),
            ("BILL_CITY", "City"),
            ("BILL_STATE", "State"),
            ("BILL_COUNTRYCODE", "HU"),
            ("DELIVERY_FNAME", "Tester"),
            ("DELIVERY_LNAME", "SimplePay"),
            ("DELIVERY_PHONE", "36201234567"),
            ("DELIVERY_ADDRESS", "First line address"),
            ("DELIVERY_ZIPCODE", "1234"),
            ("DELIVERY_CITY", "City"),
            ("DELIVERY_STATE", "State"),
            ("DELIVERY_COUNTRYCODE", "HU"),
        ] {
            lu.set_field(name, value).unwrap();
        }
        lu.add_product(&[("name", "Lorem"), ("code", "sku0001"), ("price", "30"), ("qty", "2")]);
        lu
    }

    #[test]
    fn return_urls_carry_order_and_currency() {
        assert_eq!(
            return_url("https", "shop.test/back", "R1", "HUF"),
            "https://shop.test/back?order_ref=R1&order_currency=HUF"
        );
        assert_eq!(
            return_url("http", "shop.test/back?a=b", "R1", "EUR"),
            "http://shop.test/back?a=b&order_ref=R1&order_currency=EUR"
        );
    }

    #[test]
    fn form_carries_hash_and_decorated_urls() {
        let ctx = context();
        let lu = filled(&ctx);
        let pairs = lu.form_fields().unwrap();
        let get = |name: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };

        assert_eq!(get("MERCHANT"), Some("PUBLICTESTHUF"));
        assert_eq!(
            get("BACK_REF"),
            Some("http://shop.test/backref.php?order_ref=101010514&order_currency=HUF")
        );
        assert_eq!(get("ORDER_VAT[]"), Some("0"));
        assert_eq!(get("SDK_VERSION"), Some(SDK_VERSION));

        let order_date = lu.field("ORDER_DATE").unwrap();
        let expected = ctx
            .hash([
                "PUBLICTESTHUF", "101010514", order_date, "Lorem", "sku0001", " ", "30", "2", "0",
                "0", "HUF", "0", "CCVISAMC",
            ])
            .unwrap();
        assert_eq!(get("ORDER_HASH"), Some(expected.as_str()));
    }

    #[test]
    fn html_form_posts_to_live_update() {
        let ctx = context();
        let html = filled(&ctx)
            .create_html_form(&HtmlRenderer, &FormDetails::default())
            .unwrap();
        assert!(html.contains("action='https://sandbox.simplepay.hu/payment/order/lu.php' method='POST'"));
        assert!(html.contains("name='ORDER_PNAME[]' id='ORDER_PNAME' value='Lorem'"));
    }

    #[test]
    fn incomplete_order_has_no_form() {
        let ctx = context();
        let lu = LiveUpdate::new(&ctx).unwrap();
        assert!(matches!(
            lu.create_html_form(&HtmlRenderer, &FormDetails::default()),
            Err(LegacyError::MissingFields(_))
        ));
    }

    #[test]
    fn new_order_is_stamped_from_context() {
        let ctx = context();
        let lu = LiveUpdate::new(&ctx).unwrap();
        assert_eq!(lu.field("MERCHANT"), Some("PUBLICTESTHUF"));
        assert_eq!(lu.field("PRICES_CURRENCY"), Some("HUF"));
        assert!(lu.field("ORDER_DATE").is_some());
    }

    #[test]
    fn unwritable_log_does_not_block_the_form() {
        struct BrokenSink;
        impl LogSink for BrokenSink {
            fn write(&self, _context: &LogContext, _content: &Map<String, Value>) -> Result<(), LogError> {
                Err(LogError::Folder("read-only".to_string()))
            }
        }

        let ctx = context().with_log_sink(BrokenSink);
        let html = filled(&ctx)
            .create_html_form(&HtmlRenderer, &FormDetails::default())
            .unwrap();
        assert!(html.contains("ORDER_HASH"));
    }
}
