use super::fields::{find, FieldKind, FieldSpec, PRODUCT_FIELDS};
use super::{LegacyContext, LegacyError};
use crate::models::common::Interface;
use crate::models::responses::NOT_AVAILABLE;
use crate::services::crypto::constant_time_eq;
use crate::services::transport::{remaining_time, OutboundRequest, Transport, TransportError};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::Instant;

const PRODUCT_PLACEHOLDER: &str = " ";

/// Value of one posted field; product fields repeat once per product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Single(String),
    Product(Vec<String>),
}

/// Field data of a legacy request, checked against its field table.
#[derive(Debug, Clone)]
pub struct LegacyTransaction {
    fields: &'static [FieldSpec],
    hash_fields: &'static [&'static str],
    values: HashMap<&'static str, String>,
    products: Vec<[String; 6]>,
}

impl LegacyTransaction {
    /// Starts from the table's single-field defaults.
    pub fn new(fields: &'static [FieldSpec], hash_fields: &'static [&'static str]) -> Self {
        let values = fields
            .iter()
            .filter(|spec| spec.kind == FieldKind::Single)
            .filter_map(|spec| spec.default.map(|default| (spec.name, default.to_string())))
            .collect();
        LegacyTransaction {
            fields,
            hash_fields,
            values,
            products: Vec::new(),
        }
    }

    pub fn set_field(&mut self, name: &str, value: &str) -> Result<(), LegacyError> {
        let spec = find(self.fields, name).ok_or_else(|| {
            debug!("Invalid field in set_field: {}", name);
            LegacyError::UnknownField(name.to_string())
        })?;
        let value = value.trim();
        self.values.insert(spec.name, value.to_string());
        if spec.name == "LU_ENABLE_TOKEN" && is_truthy(value) {
            self.values.insert("LU_TOKEN_TYPE", "PAY_BY_CLICK".to_string());
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Adds one product; keys outside `name, code, info, price, qty, vat` are ignored
    /// and missing ones become a single space.
    pub fn add_product(&mut self, product: &[(&str, &str)]) {
        let product = PRODUCT_FIELDS.map(|key| {
            product
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.trim().to_string())
                .unwrap_or_else(|| {
                    debug!("Missing product field: {}", key);
                    PRODUCT_PLACEHOLDER.to_string()
                })
        });
        self.products.push(product);
    }

    pub fn products(&self) -> usize {
        self.products.len()
    }

    fn product_values(&self, key: &str) -> Vec<String> {
        let Some(index) = PRODUCT_FIELDS.iter().position(|field| *field == key) else {
            return Vec::new();
        };
        self.products
            .iter()
            .map(|product| product[index].clone())
            .collect()
    }

    /// Values of the hash fields in table order, products expanded in product order.
    pub fn hash_data(&self) -> Vec<String> {
        let mut data = Vec::new();
        for name in self.hash_fields {
            let Some(spec) = find(self.fields, name) else {
                continue;
            };
            match spec.kind {
                FieldKind::Single => {
                    if let Some(value) = self.values.get(spec.name) {
                        data.push(value.clone());
                    }
                }
                FieldKind::Product(key) => data.extend(self.product_values(key)),
            }
        }
        data
    }

    /// Every set field, in table order.
    pub fn form_data(&self) -> Vec<(String, FormValue)> {
        let mut data = Vec::new();
        for spec in self.fields {
            match spec.kind {
                FieldKind::Single => {
                    if let Some(value) = self.values.get(spec.name) {
                        data.push((spec.name.to_string(), FormValue::Single(value.clone())));
                    }
                }
                FieldKind::Product(key) => {
                    data.push((spec.name.to_string(), FormValue::Product(self.product_values(key))));
                }
            }
        }
        data
    }

    /// Required single fields that are unset or blank, and required product
    /// fields when there is no product or a product left them blank.
    pub fn missing_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for spec in self.fields.iter().filter(|spec| spec.required) {
            match spec.kind {
                FieldKind::Single => {
                    if self.field(spec.name).map(str::is_empty).unwrap_or(true) {
                        missing.push(spec.name.to_string());
                    }
                }
                FieldKind::Product(key) => {
                    let values = self.product_values(key);
                    let blank = values.iter().any(|value| value.trim().is_empty());
                    if values.is_empty() || (blank && spec.default.is_none()) {
                        missing.push(spec.name.to_string());
                    }
                }
            }
        }
        missing
    }

    /// Form data plus the `hash_name` field, refused while anything required is missing.
    pub fn prepare(&self, ctx: &LegacyContext, hash_name: &str) -> Result<Vec<(String, FormValue)>, LegacyError> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(LegacyError::MissingFields(missing));
        }
        let filled = self.with_product_defaults();
        let hash = ctx.hash(filled.hash_data())?;
        let mut data = filled.form_data();
        data.push((hash_name.to_string(), FormValue::Single(hash)));
        Ok(data)
    }

    /// Flat name/value pairs for a form post; product fields become `NAME[]`.
    pub fn post_array(&self, ctx: &LegacyContext, hash_name: &str) -> Result<Vec<(String, String)>, LegacyError> {
        Ok(flatten_form(self.prepare(ctx, hash_name)?))
    }

    fn with_product_defaults(&self) -> LegacyTransaction {
        let mut filled = self.clone();
        for spec in self.fields {
            if let (FieldKind::Product(key), Some(default)) = (spec.kind, spec.default) {
                if let Some(index) = PRODUCT_FIELDS.iter().position(|field| *field == key) {
                    for product in filled.products.iter_mut() {
                        if product[index].trim().is_empty() {
                            product[index] = default.to_string();
                        }
                    }
                }
            }
        }
        filled
    }
}

pub fn flatten_form(data: Vec<(String, FormValue)>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (name, value) in data {
        match value {
            FormValue::Single(value) => pairs.push((name, value)),
            FormValue::Product(values) => {
                for value in values {
                    pairs.push((format!("{}[]", name), value));
                }
            }
        }
    }
    pairs
}

/// A posted flag is set unless empty or `0`.
fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0"
}

/// Answer of an IRN / IDN call: `<EPAYMENT>ref|code|msg|date|hash</EPAYMENT>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpaymentResponse {
    pub order_ref: String,
    pub response_code: String,
    pub response_msg: String,
    /// `IRN_DATE` or `IDN_DATE`.
    pub date: String,
    pub order_hash: String,
    pub hash_valid: bool,
    pub errors: Vec<String>,
}

impl EpaymentResponse {
    pub fn empty() -> Self {
        EpaymentResponse {
            order_ref: NOT_AVAILABLE.to_string(),
            response_code: NOT_AVAILABLE.to_string(),
            response_msg: NOT_AVAILABLE.to_string(),
            date: NOT_AVAILABLE.to_string(),
            order_hash: NOT_AVAILABLE.to_string(),
            hash_valid: false,
            errors: Vec::new(),
        }
    }

    /// Names the `|` separated values; absent ones stay `N/A`.
    pub fn from_values(values: &[String]) -> Self {
        let value = |index: usize| {
            values
                .get(index)
                .cloned()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };
        EpaymentResponse {
            order_ref: value(0),
            response_code: value(1),
            response_msg: value(2),
            date: value(3),
            order_hash: value(4),
            hash_valid: false,
            errors: Vec::new(),
        }
    }

    pub fn named_fields(&self, date_field: &str) -> Vec<(String, String)> {
        vec![
            ("ORDER_REF".to_string(), self.order_ref.clone()),
            ("RESPONSE_CODE".to_string(), self.response_code.clone()),
            ("RESPONSE_MSG".to_string(), self.response_msg.clone()),
            (date_field.to_string(), self.date.clone()),
            ("ORDER_HASH".to_string(), self.order_hash.clone()),
        ]
    }

    /// Checks `ORDER_HASH` against the hash of the values before it.
    pub fn check_hash(&mut self, ctx: &LegacyContext) -> bool {
        let signed = [
            &self.order_ref,
            &self.response_code,
            &self.response_msg,
            &self.date,
        ];
        self.hash_valid = match ctx.hash(signed) {
            Ok(computed) => {
                debug!("EPAYMENT hash received {}, computed {}", self.order_hash, computed);
                constant_time_eq(&computed, &self.order_hash)
            }
            Err(e) => {
                self.errors.push(e.to_string());
                false
            }
        };
        if !self.hash_valid {
            self.errors.push("HASH CHECK: Fail".to_string());
        }
        self.hash_valid
    }
}

/// Values between the first `<EPAYMENT>` and `</EPAYMENT>`.
pub fn parse_epayment(body: &str) -> Option<Vec<String>> {
    let start = body.find("<EPAYMENT>")? + "<EPAYMENT>".len();
    let end = start + body[start..].find("</EPAYMENT>")?;
    Some(body[start..end].split('|').map(str::to_string).collect())
}

/// Posts a hashed notification and checks the `<EPAYMENT>` answer.
///
/// Transport problems and unreadable answers come back in `errors`.
pub fn post_notification(
    ctx: &LegacyContext,
    transport: &dyn Transport,
    interface: Interface,
    path: &str,
    fields: Vec<(String, String)>,
    refnoext: &str,
    deadline: Option<Instant>,
) -> EpaymentResponse {
    let mut errors: Vec<String> = ctx.log_pairs(interface, refnoext, &fields).into_iter().collect();
    let url = ctx.url(path);

    let response = remaining_time(deadline, ctx.timeout, path)
        .and_then(|timeout| transport.post(&OutboundRequest::form(&url, &fields, timeout)))
        .and_then(|response| {
            if response.is_success() {
                Ok(response)
            } else {
                Err(TransportError::UnexpectedStatus {
                    status: response.status,
                    url: url.clone(),
                })
            }
        });

    let mut answer = match response {
        Ok(response) => match parse_epayment(&response.body) {
            Some(values) => {
                let mut answer = EpaymentResponse::from_values(&values);
                answer.check_hash(ctx);
                answer
            }
            None => {
                let mut answer = EpaymentResponse::empty();
                answer.errors.push(format!("{} answer has no EPAYMENT content", interface));
                answer
            }
        },
        Err(e) => {
            warn!("{} request for {} failed: {}", interface, refnoext, e);
            let mut answer = EpaymentResponse::empty();
            answer.errors.push(e.to_string());
            answer
        }
    };

    info!(
        "{} for {}: code {}, hash valid {}",
        interface, refnoext, answer.response_code, answer.hash_valid
    );
    errors.append(&mut answer.errors);
    answer.errors = errors;
    answer
}

#[cfg(test)]
mod tests {
    use super::super::fields::{LIVE_UPDATE_FIELDS, LIVE_UPDATE_HASH_FIELDS};
    use super::super::test_support::context;
    use super::*;

    fn live_update() -> LegacyTransaction {
        LegacyTransaction::new(&LIVE_UPDATE_FIELDS, LIVE_UPDATE_HASH_FIELDS)
    }

    #[test]
    fn defaults_are_preset() {
        let transaction = live_update();
        assert_eq!(transaction.field("PRICES_CURRENCY"), Some("HUF"));
        assert_eq!(transaction.field("PAY_METHOD"), Some("CCVISAMC"));
        assert_eq!(transaction.field("ORDER_REF"), None);
    }

    #[test]
    fn set_field_trims_and_rejects_unknown_fields() {
        let mut transaction = live_update();
        transaction.set_field("ORDER_REF", "  ORD-1 ").unwrap();
        assert_eq!(transaction.field("ORDER_REF"), Some("ORD-1"));
        assert!(matches!(
            transaction.set_field("NOPE", "x"),
            Err(LegacyError::UnknownField(_))
        ));
    }

    #[test]
    fn enabling_token_sets_token_type() {
        let mut transaction = live_update();
        transaction.set_field("LU_ENABLE_TOKEN", "0").unwrap();
        assert_eq!(transaction.field("LU_TOKEN_TYPE"), None);
        transaction.set_field("LU_ENABLE_TOKEN", "1").unwrap();
        assert_eq!(transaction.field("LU_TOKEN_TYPE"), Some("PAY_BY_CLICK"));
    }

    #[test]
    fn hash_data_expands_products_in_order() {
        let mut transaction = live_update();
        transaction.set_field("MERCHANT", "M").unwrap();
        transaction.set_field("ORDER_REF", "R").unwrap();
        transaction.set_field("ORDER_DATE", "D").unwrap();
        transaction.add_product(&[("name", "A"), ("price", "10"), ("qty", "1"), ("vat", "0")]);
        transaction.add_product(&[("name", "B"), ("price", "20"), ("qty", "2"), ("vat", "0")]);

        assert_eq!(
            transaction.hash_data(),
            ["M", "R", "D", "A", "B", " ", " ", " ", " ", "10", "20", "1", "2", "0", "0", "0", "HUF", "0", "CCVISAMC"]
        );
    }

    #[test]
    fn missing_required_fields_are_listed() {
        let transaction = live_update();
        let missing = transaction.missing_fields();
        assert!(missing.contains(&"ORDER_REF".to_string()));
        assert!(missing.contains(&"ORDER_PRICE".to_string()));
        assert!(!missing.contains(&"PAY_METHOD".to_string()));
        assert!(matches!(
            transaction.prepare(&context(), "ORDER_HASH"),
            Err(LegacyError::MissingFields(_))
        ));
    }

    #[test]
    fn products_flatten_to_array_names() {
        let pairs = flatten_form(vec![
            ("ORDER_REF".to_string(), FormValue::Single("R".to_string())),
            (
                "ORDER_PNAME".to_string(),
                FormValue::Product(vec!["A".to_string(), "B".to_string()]),
            ),
        ]);
        assert_eq!(
            pairs,
            [
                ("ORDER_REF".to_string(), "R".to_string()),
                ("ORDER_PNAME[]".to_string(), "A".to_string()),
                ("ORDER_PNAME[]".to_string(), "B".to_string()),
            ]
        );
    }

    #[test]
    fn epayment_values_are_named() {
        let values = parse_epayment("<html><EPAYMENT>123|1|OK|2020-01-01 10:00:00|abc</EPAYMENT></html>").unwrap();
        let response = EpaymentResponse::from_values(&values);
        assert_eq!(response.order_ref, "123");
        assert_eq!(response.date, "2020-01-01 10:00:00");
        assert_eq!(response.order_hash, "abc");

        let short = EpaymentResponse::from_values(&values[..2]);
        assert_eq!(short.response_msg, NOT_AVAILABLE);
        assert!(parse_epayment("no payload").is_none());
    }

    #[test]
    fn epayment_hash_covers_preceding_values() {
        let ctx = context();
        let hash = ctx.hash(["123", "1", "OK", "2020-01-01 10:00:00"]).unwrap();
        let body = format!("<EPAYMENT>123|1|OK|2020-01-01 10:00:00|{}</EPAYMENT>", hash);
        let mut response = EpaymentResponse::from_values(&parse_epayment(&body).unwrap());
        assert!(response.check_hash(&ctx));

        response.response_code = "2".to_string();
        assert!(!response.check_hash(&ctx));
    }
}
