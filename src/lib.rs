//! Client SDK for the SimplePay payment gateway.
//!
//! Outbound calls (start, query, refund, finish) go through [`SimplePayClient`];
//! inbound Back redirects and IPN posts are checked by [`CallbackVerifier`].
//! The V1 form protocol lives under [`services::legacy`].

pub mod api;
pub mod models;
pub mod services;

pub use models::common::{Amount, Interface, Operation};
pub use models::config::{MerchantConfig, MerchantCredentials};
pub use models::requests::{Item, TransactionRequest};
pub use models::responses::{
    BackNotification, BackResult, IpnConfirmation, IpnResult, TransactionResult, TransactionState,
};
pub use services::callbacks::CallbackVerifier;
pub use services::simplepay_service::{SimplePayClient, SimplePayError};
