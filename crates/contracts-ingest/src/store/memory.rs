//! In-memory repository with the same key rules as the Postgres tables

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::ContractRepository;
use crate::error::{Result, SyncError};
use crate::models::{Contract, ContractItem, ItemKey};

#[derive(Debug, Default)]
struct Tables {
    contracts: BTreeMap<i64, Contract>,
    items: BTreeMap<ItemKey, ContractItem>,
}

#[derive(Debug, Default)]
pub struct MemoryContractStore {
    tables: Mutex<Tables>,
}

impl MemoryContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored contracts ordered by id
    pub async fn contracts(&self) -> Vec<Contract> {
        self.tables.lock().await.contracts.values().cloned().collect()
    }

    /// Stored items ordered by `(contract_id, record_id)`
    pub async fn items(&self) -> Vec<ContractItem> {
        self.tables.lock().await.items.values().cloned().collect()
    }

    pub async fn contract_count(&self) -> usize {
        self.tables.lock().await.contracts.len()
    }

    pub async fn item_count(&self) -> usize {
        self.tables.lock().await.items.len()
    }
}

#[async_trait]
impl ContractRepository for MemoryContractStore {
    async fn contract_ids_issued_since(&self, since: DateTime<Utc>) -> Result<HashSet<i64>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .contracts
            .values()
            .filter(|c| c.date_issued >= since)
            .map(|c| c.contract_id)
            .collect())
    }

    async fn item_keys_issued_since(&self, since: DateTime<Utc>) -> Result<HashSet<ItemKey>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .items
            .keys()
            .filter(|(contract_id, _)| {
                tables
                    .contracts
                    .get(contract_id)
                    .is_some_and(|c| c.date_issued >= since)
            })
            .copied()
            .collect())
    }

    async fn insert_contracts(&self, contracts: &[Contract]) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut inserted = 0;
        for contract in contracts {
            if !tables.contracts.contains_key(&contract.contract_id) {
                tables.contracts.insert(contract.contract_id, contract.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn insert_items(&self, items: &[ContractItem]) -> Result<u64> {
        let mut tables = self.tables.lock().await;

        // Reject the whole batch before touching anything, like a failed statement
        if let Some(orphan) = items
            .iter()
            .find(|item| !tables.contracts.contains_key(&item.contract_id))
        {
            return Err(SyncError::Repository(format!(
                "item {} references unknown contract {}",
                orphan.record_id, orphan.contract_id
            )));
        }

        let mut inserted = 0;
        for item in items {
            if !tables.items.contains_key(&item.key()) {
                tables.items.insert(item.key(), item.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
