//! Public contract data models

use chrono::{DateTime, Utc};
use sqlx::types::BigDecimal;

// ============================================================================
// Contract type
// ============================================================================

/// Contract types that are ingested. Couriers, loans and anything the
/// publisher adds later are dropped when rows are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractType {
    Auction,
    ItemExchange,
}

impl ContractType {
    /// Returns `None` for types that are not ingested.
    pub fn from_row_value(value: &str) -> Option<Self> {
        match value.trim() {
            "auction" => Some(ContractType::Auction),
            "item_exchange" => Some(ContractType::ItemExchange),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Auction => "auction",
            ContractType::ItemExchange => "item_exchange",
        }
    }
}

impl std::fmt::Display for ContractType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Contract
// ============================================================================

/// A public contract, created once on first sight and never updated here.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    /// External identifier, unique across all time
    pub contract_id: i64,
    pub region_id: i64,
    pub contract_type: ContractType,

    pub buyout: Option<BigDecimal>,
    pub collateral: Option<BigDecimal>,
    pub price: Option<BigDecimal>,
    pub reward: Option<BigDecimal>,

    pub date_issued: DateTime<Utc>,
    pub date_expired: DateTime<Utc>,
    pub days_to_complete: Option<i32>,

    pub issuer_id: i64,
    pub issuer_corporation_id: i64,
    pub for_corporation: Option<bool>,

    pub start_location_id: Option<i64>,
    pub end_location_id: Option<i64>,

    pub title: Option<String>,
    pub volume: Option<f64>,

    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Contract item
// ============================================================================

/// One line of a contract's item list.
///
/// `record_id` is only unique within its contract; the identity of an item is
/// the pair returned by [`ContractItem::key`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContractItem {
    /// External id of the owning contract
    pub contract_id: i64,
    pub record_id: i64,

    pub item_id: Option<i64>,
    pub type_id: i64,
    pub quantity: i32,
    pub runs: Option<i32>,
    pub material_efficiency: Option<i32>,
    pub time_efficiency: Option<i32>,
    pub is_blueprint_copy: Option<bool>,
    pub is_included: bool,

    pub created_at: DateTime<Utc>,
}

/// `(contract_id, record_id)`
pub type ItemKey = (i64, i64);

impl ContractItem {
    pub fn key(&self) -> ItemKey {
        (self.contract_id, self.record_id)
    }
}
