mod common;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use common::{config, SECRET};
use serde_json::Value;
use simplepay_sdk::models::responses::NOT_AVAILABLE;
use simplepay_sdk::services::crypto::{HmacSha384Signer, Signer};
use simplepay_sdk::services::legacy::ipn::{validate_received, IpnPost};
use simplepay_sdk::services::legacy::LegacyContext;
use simplepay_sdk::services::logger::FileLogSink;
use simplepay_sdk::CallbackVerifier;

#[test]
fn back_without_merchant_reports_not_available() {
    let json = r#"{"r":0,"t":99844942,"e":"CANCEL","o":"ORD-1"}"#;
    let verifier = CallbackVerifier::new(config());

    let result = verifier.check_back(&BASE64.encode(json), "anything");
    assert!(!result.verified);
    assert_eq!(result.notification.merchant(), NOT_AVAILABLE);
    assert_eq!(result.notification.order_ref(), "ORD-1");

    let html = verifier.back_notification(&result);
    assert!(html.contains("Failed payment!"));
}

#[test]
fn ipn_confirmation_is_logged_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let verifier = CallbackVerifier::new(config()).with_log_sink(FileLogSink::new(dir.path()));
    let body = r#"{"salt":"223G0O2OLGL1nOVfT7Wk4ZEf8zQjVxGF","orderRef":"ORD-1","method":"CARD","merchant":"PUBLICTESTHUF","finishDate":"2020-01-01T10:00:00+01:00","paymentDate":"2020-01-01T09:59:00+01:00","transactionId":99844942,"status":"FINISHED"}"#;
    let signature = HmacSha384Signer.sign(SECRET, body.as_bytes()).unwrap();

    let result = verifier.check_ipn(body, &signature);
    assert!(result.verified, "{:?}", result.errors);
    let (headers, content) = verifier.ipn_confirm_response(&result);

    let confirmed: Value = serde_json::from_str(&content).unwrap();
    assert_eq!(confirmed["orderRef"], "ORD-1");
    let receive_date = confirmed["receiveDate"].as_str().unwrap();
    assert!(!receive_date.ends_with('Z'));
    let header_signature = headers
        .iter()
        .find(|(name, _)| name == "Signature")
        .map(|(_, value)| value.as_str())
        .unwrap();
    assert!(HmacSha384Signer.verify(SECRET, content.as_bytes(), header_signature));

    let log = std::fs::read_to_string(FileLogSink::new(dir.path()).file_for_today()).unwrap();
    assert!(log.contains("ORD-1|99844942|ipn|"));
    assert!(log.contains("|confirmationMode|Confirmed directly"));
}

#[test]
fn legacy_ipn_checks_every_posted_value() {
    let ctx = LegacyContext::new(&config(), "HUF").unwrap();
    let values = ["2020-01-01 10:00:00", "99844942", "ORD-7", "COMPLETE", "HUF"];
    let hash = ctx.hash(values).unwrap();
    let body = format!(
        "SALEDATE=2020-01-01+10%3A00%3A00&REFNO=99844942&REFNOEXT=ORD-7&ORDERSTATUS=COMPLETE&CURRENCY=HUF&HASH={}",
        hash
    );

    let result = validate_received(&ctx, &IpnPost::parse(&body));
    assert!(result.valid, "{:?}", result.errors);

    let forged = body.replace("REFNO=99844942", "REFNO=1");
    assert!(!validate_received(&ctx, &IpnPost::parse(&forged)).valid);
}
