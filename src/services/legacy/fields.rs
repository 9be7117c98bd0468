use lazy_static::lazy_static;

/// Per-product keys, in the order products are filled.
pub const PRODUCT_FIELDS: [&str; 6] = ["name", "code", "info", "price", "qty", "vat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Single,
    /// One value per product, taken from the named product key.
    Product(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<&'static str>,
}

impl FieldSpec {
    fn single(name: &'static str) -> Self {
        FieldSpec {
            name,
            kind: FieldKind::Single,
            required: false,
            default: None,
        }
    }

    fn product(name: &'static str, key: &'static str) -> Self {
        FieldSpec {
            name,
            kind: FieldKind::Product(key),
            required: false,
            default: None,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn default_value(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }
}

pub const LIVE_UPDATE_HASH_FIELDS: &[&str] = &[
    "MERCHANT",
    "ORDER_REF",
    "ORDER_DATE",
    "ORDER_PNAME",
    "ORDER_PCODE",
    "ORDER_PINFO",
    "ORDER_PRICE",
    "ORDER_QTY",
    "ORDER_VAT",
    "ORDER_SHIPPING",
    "PRICES_CURRENCY",
    "DISCOUNT",
    "PAY_METHOD",
];

pub const IRN_HASH_FIELDS: &[&str] = &[
    "MERCHANT",
    "ORDER_REF",
    "ORDER_AMOUNT",
    "ORDER_CURRENCY",
    "IRN_DATE",
    "AMOUNT",
];

pub const IDN_HASH_FIELDS: &[&str] = &[
    "MERCHANT",
    "ORDER_REF",
    "ORDER_AMOUNT",
    "ORDER_CURRENCY",
    "IDN_DATE",
];

lazy_static! {
    pub static ref LIVE_UPDATE_FIELDS: Vec<FieldSpec> = vec![
        // order
        FieldSpec::single("MERCHANT").required(),
        FieldSpec::single("ORDER_REF").required(),
        FieldSpec::single("ORDER_DATE").required(),
        FieldSpec::product("ORDER_PNAME", "name"),
        FieldSpec::product("ORDER_PCODE", "code"),
        FieldSpec::product("ORDER_PINFO", "info"),
        FieldSpec::product("ORDER_PRICE", "price").required(),
        FieldSpec::product("ORDER_QTY", "qty").required(),
        FieldSpec::product("ORDER_VAT", "vat").required().default_value("0"),
        FieldSpec::single("PRICES_CURRENCY").required().default_value("HUF"),
        FieldSpec::single("ORDER_SHIPPING").default_value("0"),
        FieldSpec::single("DISCOUNT").default_value("0"),
        FieldSpec::single("PAY_METHOD").required().default_value("CCVISAMC"),
        FieldSpec::single("LANGUAGE").default_value("HU"),
        FieldSpec::single("ORDER_TIMEOUT").default_value("300"),
        FieldSpec::single("TIMEOUT_URL").required(),
        FieldSpec::single("BACK_REF").required(),
        FieldSpec::single("LU_ENABLE_TOKEN"),
        FieldSpec::single("LU_TOKEN_TYPE"),
        // billing
        FieldSpec::single("BILL_FNAME").required(),
        FieldSpec::single("BILL_LNAME").required(),
        FieldSpec::single("BILL_COMPANY"),
        FieldSpec::single("BILL_FISCALCODE"),
        FieldSpec::single("BILL_EMAIL").required(),
        FieldSpec::single("BILL_PHONE").required(),
        FieldSpec::single("BILL_FAX"),
        FieldSpec::single("BILL_ADDRESS").required(),
        FieldSpec::single("BILL_ADDRESS2"),
        FieldSpec::single("BILL_ZIPCODE").required(),
        FieldSpec::single("BILL_CITY").required(),
        FieldSpec::single("BILL_STATE").required(),
        FieldSpec::single("BILL_COUNTRYCODE").required(),
        // delivery
        FieldSpec::single("DELIVERY_FNAME").required(),
        FieldSpec::single("DELIVERY_LNAME").required(),
        FieldSpec::single("DELIVERY_COMPANY"),
        FieldSpec::single("DELIVERY_EMAIL"),
        FieldSpec::single("DELIVERY_PHONE").required(),
        FieldSpec::single("DELIVERY_ADDRESS").required(),
        FieldSpec::single("DELIVERY_ADDRESS2"),
        FieldSpec::single("DELIVERY_ZIPCODE").required(),
        FieldSpec::single("DELIVERY_CITY").required(),
        FieldSpec::single("DELIVERY_STATE").required(),
        FieldSpec::single("DELIVERY_COUNTRYCODE").required(),
    ];

    pub static ref IRN_FIELDS: Vec<FieldSpec> = vec![
        FieldSpec::single("MERCHANT").required(),
        FieldSpec::single("ORDER_REF").required(),
        FieldSpec::single("ORDER_AMOUNT").required(),
        FieldSpec::single("ORDER_CURRENCY").required(),
        FieldSpec::single("IRN_DATE").required(),
        FieldSpec::single("AMOUNT").required(),
    ];

    pub static ref IDN_FIELDS: Vec<FieldSpec> = vec![
        FieldSpec::single("MERCHANT").required(),
        FieldSpec::single("ORDER_REF").required(),
        FieldSpec::single("ORDER_AMOUNT").required(),
        FieldSpec::single("ORDER_CURRENCY").required(),
        FieldSpec::single("IDN_DATE").required(),
        FieldSpec::single("REF_URL"),
    ];
}

pub fn find(fields: &[FieldSpec], name: &str) -> Option<FieldSpec> {
    fields.iter().find(|spec| spec.name == name).copied()
}
