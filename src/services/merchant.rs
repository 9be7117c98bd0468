use crate::models::config::{MerchantConfig, MerchantCredentials};
use log::debug;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("No merchant configured for currency {0}")]
    UnknownCurrency(String),

    #[error("No currency configured for merchant account {0}")]
    UnknownAccount(String),

    #[error("Neither currency nor merchant account given")]
    NothingToResolve,
}

/// Merchant account selected for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMerchant {
    pub currency: String,
    pub credentials: MerchantCredentials,
}

/// Picks the `<CUR>_MERCHANT` / `<CUR>_SECRET_KEY` pair for `currency`.
/// Never falls back to another currency's merchant.
pub fn resolve(config: &MerchantConfig, currency: &str) -> Result<MerchantCredentials, ConfigurationError> {
    let currency = currency.trim().to_ascii_uppercase();
    let merchant_id = config.entry(&format!("{}_MERCHANT", currency));
    let secret_key = config.entry(&format!("{}_SECRET_KEY", currency));

    match (merchant_id, secret_key) {
        (Some(merchant_id), Some(secret_key))
            if !merchant_id.trim().is_empty() && !secret_key.trim().is_empty() =>
        {
            Ok(MerchantCredentials {
                merchant_id: merchant_id.trim().to_string(),
                secret_key: secret_key.to_string(),
            })
        }
        _ => Err(ConfigurationError::UnknownCurrency(currency)),
    }
}

/// Reverse lookup: the currency whose `<CUR>_MERCHANT` entry holds `account`.
pub fn currency_for_account(config: &MerchantConfig, account: &str) -> Result<String, ConfigurationError> {
    let account = account.trim();
    config
        .entries()
        .find_map(|(key, value)| {
            let currency = key.strip_suffix("_MERCHANT")?;
            if !currency.is_empty() && value.trim() == account && !account.is_empty() {
                Some(currency.to_string())
            } else {
                None
            }
        })
        .ok_or_else(|| ConfigurationError::UnknownAccount(account.to_string()))
}

/// Currency first; account only when no currency is known.
pub fn resolve_for(
    config: &MerchantConfig,
    currency: Option<&str>,
    account: Option<&str>,
) -> Result<ResolvedMerchant, ConfigurationError> {
    let currency = match (currency.filter(|c| !c.trim().is_empty()), account) {
        (Some(currency), _) => currency.trim().to_ascii_uppercase(),
        (None, Some(account)) => currency_for_account(config, account)?,
        (None, None) => return Err(ConfigurationError::NothingToResolve),
    };

    let credentials = resolve(config, &currency)?;
    debug!(
        "Resolved merchant {} for currency {}",
        credentials.merchant_id, currency
    );
    Ok(ResolvedMerchant {
        currency,
        credentials,
    })
}
