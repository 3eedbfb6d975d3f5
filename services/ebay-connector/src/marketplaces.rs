//! eBay marketplace reference data
//!
//! Static site/marketplace/currency/locale table. Not used by the token path.

use axum::Router;
use axum::routing::get;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Marketplace {
    pub site_id: u32,
    pub marketplace_id: &'static str,
    pub global_id: &'static str,
    pub site_code: &'static str,
    pub name: &'static str,
    pub currency: &'static str,
    pub locale: &'static str,
}

const fn marketplace(
    site_id: u32,
    marketplace_id: &'static str,
    global_id: &'static str,
    site_code: &'static str,
    name: &'static str,
    currency: &'static str,
    locale: &'static str,
) -> Marketplace {
    Marketplace {
        site_id,
        marketplace_id,
        global_id,
        site_code,
        name,
        currency,
        locale,
    }
}

pub const MARKETPLACES: &[Marketplace] = &[
    marketplace(0, "EBAY_US", "EBAY-US", "US", "United States", "USD", "en_US"),
    marketplace(2, "EBAY_CA", "EBAY-ENCA", "CA", "Canada", "CAD", "en_CA"),
    marketplace(3, "EBAY_GB", "EBAY-GB", "GB", "United Kingdom", "GBP", "en_GB"),
    marketplace(15, "EBAY_AU", "EBAY-AU", "AU", "Australia", "AUD", "en_AU"),
    marketplace(16, "EBAY_AT", "EBAY-AT", "AT", "Austria", "EUR", "de_AT"),
    marketplace(23, "EBAY_BE_FR", "EBAY-FRBE", "BE_FR", "Belgium (French)", "EUR", "fr_BE"),
    marketplace(71, "EBAY_FR", "EBAY-FR", "FR", "France", "EUR", "fr_FR"),
    marketplace(77, "EBAY_DE", "EBAY-DE", "DE", "Germany", "EUR", "de_DE"),
    marketplace(100, "EBAY_MOTORS_US", "EBAY-MOTOR", "MOTORS_US", "eBay Motors", "USD", "en_US"),
    marketplace(101, "EBAY_IT", "EBAY-IT", "IT", "Italy", "EUR", "it_IT"),
    marketplace(123, "EBAY_BE_NL", "EBAY-NLBE", "BE_NL", "Belgium (Dutch)", "EUR", "nl_BE"),
    marketplace(146, "EBAY_NL", "EBAY-NL", "NL", "Netherlands", "EUR", "nl_NL"),
    marketplace(186, "EBAY_ES", "EBAY-ES", "ES", "Spain", "EUR", "es_ES"),
    marketplace(193, "EBAY_CH", "EBAY-CH", "CH", "Switzerland", "CHF", "de_CH"),
    marketplace(201, "EBAY_HK", "EBAY-HK", "HK", "Hong Kong", "HKD", "zh_HK"),
    marketplace(205, "EBAY_IE", "EBAY-IE", "IE", "Ireland", "EUR", "en_IE"),
    marketplace(207, "EBAY_MY", "EBAY-MY", "MY", "Malaysia", "MYR", "ms_MY"),
    marketplace(210, "EBAY_CA_FR", "EBAY-FRCA", "CA_FR", "Canada (French)", "CAD", "fr_CA"),
    marketplace(211, "EBAY_PH", "EBAY-PH", "PH", "Philippines", "PHP", "en_PH"),
    marketplace(212, "EBAY_PL", "EBAY-PL", "PL", "Poland", "PLN", "pl_PL"),
    marketplace(216, "EBAY_SG", "EBAY-SG", "SG", "Singapore", "SGD", "en_SG"),
];

pub fn find_by_site_id(site_id: u32) -> Option<&'static Marketplace> {
    MARKETPLACES.iter().find(|m| m.site_id == site_id)
}

pub fn find_by_marketplace_id(marketplace_id: &str) -> Option<&'static Marketplace> {
    MARKETPLACES
        .iter()
        .find(|m| m.marketplace_id == marketplace_id)
}

pub fn find_by_site_code(site_code: &str) -> Option<&'static Marketplace> {
    MARKETPLACES.iter().find(|m| m.site_code == site_code)
}

/// GET /ebay/marketplaces
pub fn router() -> Router {
    Router::new().route(
        "/ebay/marketplaces",
        get(|| async { axum::Json(serde_json::json!({ "marketplaces": MARKETPLACES })) }),
    )
}
