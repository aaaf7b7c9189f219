//! Persistence for contracts and their items
//!
//! The sync engine only needs two lookups (what is already stored in the
//! retention window) and two conflict-tolerant bulk inserts.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Contract, ContractItem, ItemKey};

pub mod memory;
pub mod postgres;

pub use memory::MemoryContractStore;
pub use postgres::PgContractStore;

#[async_trait]
pub trait ContractRepository: Send + Sync {
    /// Ids of stored contracts with `date_issued >= since`
    async fn contract_ids_issued_since(&self, since: DateTime<Utc>) -> Result<HashSet<i64>>;

    /// `(contract_id, record_id)` of stored items whose contract was issued
    /// at or after `since`
    async fn item_keys_issued_since(&self, since: DateTime<Utc>) -> Result<HashSet<ItemKey>>;

    /// Insert contracts, silently skipping ids that already exist.
    ///
    /// The batch is applied atomically. Returns the number of rows inserted.
    async fn insert_contracts(&self, contracts: &[Contract]) -> Result<u64>;

    /// Insert items, silently skipping keys that already exist.
    ///
    /// Every item's contract must already be stored. The batch is applied
    /// atomically. Returns the number of rows inserted.
    async fn insert_items(&self, items: &[ContractItem]) -> Result<u64>;
}

#[async_trait]
impl<R> ContractRepository for Arc<R>
where
    R: ContractRepository + ?Sized,
{
    async fn contract_ids_issued_since(&self, since: DateTime<Utc>) -> Result<HashSet<i64>> {
        (**self).contract_ids_issued_since(since).await
    }

    async fn item_keys_issued_since(&self, since: DateTime<Utc>) -> Result<HashSet<ItemKey>> {
        (**self).item_keys_issued_since(since).await
    }

    async fn insert_contracts(&self, contracts: &[Contract]) -> Result<u64> {
        (**self).insert_contracts(contracts).await
    }

    async fn insert_items(&self, items: &[ContractItem]) -> Result<u64> {
        (**self).insert_items(items).await
    }
}
