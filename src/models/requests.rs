use super::common::{Amount, Operation};
use serde_json::{json, Map, Value};

/// A product or service line of a Start request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Item {
    pub reference: String,
    pub title: String,
    pub description: String,
    pub amount: u32,
    pub price: Amount,
    pub tax: Amount,
}

impl Item {
    pub fn new(title: &str, price: impl Into<Amount>, amount: u32) -> Self {
        Item {
            title: title.to_string(),
            price: price.into(),
            amount,
            ..Item::default()
        }
    }

    pub fn with_reference(mut self, reference: &str) -> Self {
        self.reference = reference.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_tax(mut self, tax: impl Into<Amount>) -> Self {
        self.tax = tax.into();
        self
    }

    fn to_json(&self, currency: &str) -> Value {
        json!({
            "ref": self.reference,
            "title": self.title,
            "description": self.description,
            "amount": self.amount,
            "price": self.price.to_json(currency),
            "tax": self.tax.to_json(currency),
        })
    }
}

/// Ordered field set of one outbound call.
///
/// Keys keep their insertion order; the operation template fixes the leading
/// keys so the signed JSON always starts the same way.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    operation: Operation,
    fields: Map<String, Value>,
    items: Vec<Item>,
    amounts: Vec<(String, Amount)>,
    currency_hint: Option<String>,
    merchant_account: Option<String>,
}

impl TransactionRequest {
    pub fn new(operation: Operation) -> Self {
        let template: &[(&str, Value)] = match operation {
            Operation::Start => &[
                ("salt", Value::Null),
                ("merchant", Value::Null),
                ("orderRef", Value::Null),
                ("currency", Value::Null),
                ("sdkVersion", Value::Null),
                ("methods", Value::Null),
            ],
            Operation::Refund => &[
                ("salt", Value::Null),
                ("merchant", Value::Null),
                ("orderRef", Value::Null),
                ("transactionId", Value::Null),
                ("currency", Value::Null),
            ],
            Operation::Finish => &[
                ("salt", Value::Null),
                ("merchant", Value::Null),
                ("orderRef", Value::Null),
                ("transactionId", Value::Null),
                ("originalTotal", Value::Null),
                ("approveTotal", Value::Null),
                ("currency", Value::Null),
            ],
            Operation::Query => &[("salt", Value::Null), ("merchant", Value::Null)],
        };

        let mut fields = Map::new();
        for (key, value) in template {
            fields.insert((*key).to_string(), value.clone());
        }

        TransactionRequest {
            operation,
            fields,
            items: Vec::new(),
            amounts: Vec::new(),
            currency_hint: None,
            merchant_account: None,
        }
    }

    pub fn start() -> Self {
        Self::new(Operation::Start)
    }

    pub fn query() -> Self {
        Self::new(Operation::Query)
    }

    pub fn refund() -> Self {
        Self::new(Operation::Refund)
    }

    pub fn finish() -> Self {
        Self::new(Operation::Finish)
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn add_data(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        let key = if key.is_empty() { "EMPTY_DATA_KEY" } else { key };
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Adds `key` to the nested object `group`, creating it when missing.
    pub fn add_group_data(&mut self, group: &str, key: &str, value: impl Into<Value>) -> &mut Self {
        let entry = self
            .fields
            .entry(group.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(map) = entry {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// Monetary field rendered with the currency rounding rule at payload time.
    pub fn add_amount(&mut self, key: &str, amount: impl Into<Amount>) -> &mut Self {
        self.fields.entry(key.to_string()).or_insert(Value::Null);
        self.amounts.retain(|(existing, _)| existing != key);
        self.amounts.push((key.to_string(), amount.into()));
        self
    }

    pub fn add_item(&mut self, item: Item) -> &mut Self {
        self.fields
            .entry("items".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        self.items.push(item);
        self
    }

    pub fn add_transaction_id(&mut self, transaction_id: &str) -> &mut Self {
        self.push_to_list("transactionIds", transaction_id)
    }

    pub fn add_order_ref(&mut self, order_ref: &str) -> &mut Self {
        self.push_to_list("orderRefs", order_ref)
    }

    fn push_to_list(&mut self, key: &str, value: &str) -> &mut Self {
        let entry = self
            .fields
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(list) => list.push(Value::from(value)),
            other => *other = Value::Array(vec![Value::from(value)]),
        }
        self
    }

    /// Currency used to pick the merchant when the payload has none of its own.
    pub fn with_currency_hint(&mut self, currency: &str) -> &mut Self {
        self.currency_hint = Some(currency.to_ascii_uppercase());
        self
    }

    /// Merchant account id used for a reverse currency lookup.
    pub fn with_merchant_account(&mut self, account: &str) -> &mut Self {
        self.merchant_account = Some(account.to_string());
        self
    }

    pub fn merchant_account(&self) -> Option<&str> {
        self.merchant_account.as_deref()
    }

    pub fn currency(&self) -> Option<String> {
        match self.fields.get("currency") {
            Some(Value::String(currency)) if !currency.trim().is_empty() => {
                Some(currency.trim().to_ascii_uppercase())
            }
            _ => self.currency_hint.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Field set as it will be signed, without the merchant/salt/version stamp.
    pub fn payload(&self) -> Map<String, Value> {
        let currency = self.currency().unwrap_or_default();
        let mut payload = self.fields.clone();

        for (key, amount) in &self.amounts {
            payload.insert(key.clone(), amount.to_json(&currency));
        }
        if !self.items.is_empty() {
            let items = self.items.iter().map(|item| item.to_json(&currency)).collect();
            payload.insert("items".to_string(), Value::Array(items));
        }

        // Refund identifies the payment by either reference; drop the unused one
        if self.operation == Operation::Refund {
            for key in ["orderRef", "transactionId"] {
                if payload.get(key).map(is_empty_value).unwrap_or(false) {
                    payload.remove(key);
                }
            }
        }

        payload
    }

    /// Missing or invalid fields for this operation, one message each.
    pub fn validate(&self) -> Vec<String> {
        let payload = self.payload();
        let present = |key: &str| payload.get(key).map(|v| !is_empty_value(v)).unwrap_or(false);
        let mut errors = Vec::new();

        let required: &[&str] = match self.operation {
            Operation::Start => &["orderRef", "currency", "items", "methods"],
            Operation::Refund => &["currency"],
            Operation::Finish => &["orderRef", "transactionId", "originalTotal", "approveTotal"],
            Operation::Query => &[],
        };
        for key in required {
            if !present(key) {
                errors.push(format!("Missing field: {}", key));
            }
        }

        match self.operation {
            Operation::Refund if !present("orderRef") && !present("transactionId") => {
                errors.push("Missing field: orderRef or transactionId".to_string());
            }
            Operation::Query if !present("transactionIds") && !present("orderRefs") => {
                errors.push("Missing field: transactionIds or orderRefs".to_string());
            }
            _ => {}
        }

        for (index, item) in self.items.iter().enumerate() {
            if item.title.trim().is_empty() {
                errors.push(format!("Missing field: items[{}].title", index));
            }
            if item.amount == 0 {
                errors.push(format!("Missing field: items[{}].amount", index));
            }
            if item.price.0.is_zero() {
                errors.push(format!("Missing field: items[{}].price", index));
            }
        }

        errors
    }
}

pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(list) => list.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
