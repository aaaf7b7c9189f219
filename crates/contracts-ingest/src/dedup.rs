//! Novelty filters for snapshot rows
//!
//! Each snapshot repeats most of the previous one, so rows are checked against
//! what the store already holds for the retention window before anything is
//! parsed into records. A row that cannot be read or parsed is skipped and
//! counted; it never fails the snapshot.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::models::{Contract, ContractItem, ItemKey};
use crate::parser::{self, Row};
use crate::store::ContractRepository;

/// Row counts for one table of one snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Rows read from the table
    pub seen: u64,
    /// Rows dropped as not ingested or already known
    pub filtered: u64,
    /// Rows that could not be decoded or parsed
    pub rejected: u64,
}

impl FilterStats {
    /// Rows passed on to the loader
    pub fn accepted(&self) -> u64 {
        self.seen - self.filtered - self.rejected
    }

    fn reject(&mut self, table: &str, err: &SyncError) {
        self.rejected += 1;
        warn!(table, row = self.seen, error = %err, "Skipping malformed row");
    }
}

// ============================================================================
// Contracts
// ============================================================================

/// Passes auction and item exchange contracts whose id is not already stored.
///
/// Ids accepted here are remembered, so a contract repeated later in the same
/// table is dropped too.
#[derive(Debug)]
pub struct ContractFilter {
    known_ids: HashSet<i64>,
    accepted_ids: HashSet<i64>,
    created_at: DateTime<Utc>,
    stats: FilterStats,
}

impl ContractFilter {
    pub fn new(known_ids: HashSet<i64>, created_at: DateTime<Utc>) -> Self {
        Self {
            known_ids,
            accepted_ids: HashSet::new(),
            created_at,
            stats: FilterStats::default(),
        }
    }

    /// Seed from contracts issued at or after `window_start`
    pub async fn load<R>(repo: &R, window_start: DateTime<Utc>, created_at: DateTime<Utc>) -> Result<Self>
    where
        R: ContractRepository + ?Sized,
    {
        let known_ids = repo.contract_ids_issued_since(window_start).await?;
        debug!(known = known_ids.len(), "Contract filter ready");
        Ok(Self::new(known_ids, created_at))
    }

    /// Lazily yield the novel contracts among `rows`
    pub fn filter<'a, I>(&'a mut self, rows: I) -> impl Iterator<Item = Contract> + 'a
    where
        I: IntoIterator<Item = Result<Row>>,
        I::IntoIter: 'a,
    {
        rows.into_iter().filter_map(move |row| self.check(row))
    }

    /// Decide on a single row
    pub fn check(&mut self, row: Result<Row>) -> Option<Contract> {
        self.stats.seen += 1;

        let row = match row {
            Ok(row) => row,
            Err(e) => {
                self.stats.reject("contracts", &e);
                return None;
            },
        };

        if parser::contract_type(&row).is_none() {
            self.stats.filtered += 1;
            return None;
        }

        let contract_id = match parser::contract_id(&row) {
            Ok(id) => id,
            Err(e) => {
                self.stats.reject("contracts", &e);
                return None;
            },
        };
        if self.known_ids.contains(&contract_id) {
            self.stats.filtered += 1;
            return None;
        }

        match parser::parse_contract(&row, self.created_at) {
            Ok(contract) => {
                self.known_ids.insert(contract_id);
                self.accepted_ids.insert(contract_id);
                Some(contract)
            },
            Err(e) => {
                self.stats.reject("contracts", &e);
                None
            },
        }
    }

    /// Ids passed on during this pass
    pub fn accepted_ids(&self) -> &HashSet<i64> {
        &self.accepted_ids
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }
}

// ============================================================================
// Contract items
// ============================================================================

/// Passes items whose contract is known and whose
/// `(contract_id, record_id)` is not already stored.
///
/// Record ids are only unique within a contract, so the existing set is keyed
/// on the pair; an item of one contract never hides an item of another.
#[derive(Debug)]
pub struct ItemFilter {
    contract_ids: HashSet<i64>,
    existing: HashSet<ItemKey>,
    created_at: DateTime<Utc>,
    stats: FilterStats,
}

impl ItemFilter {
    pub fn new(contract_ids: HashSet<i64>, existing: HashSet<ItemKey>, created_at: DateTime<Utc>) -> Self {
        Self {
            contract_ids,
            existing,
            created_at,
            stats: FilterStats::default(),
        }
    }

    /// Seed from the store's retention window plus the contracts accepted
    /// earlier in the same snapshot.
    pub async fn load<R>(
        repo: &R,
        window_start: DateTime<Utc>,
        accepted_contract_ids: &HashSet<i64>,
        created_at: DateTime<Utc>,
    ) -> Result<Self>
    where
        R: ContractRepository + ?Sized,
    {
        let mut contract_ids = repo.contract_ids_issued_since(window_start).await?;
        contract_ids.extend(accepted_contract_ids.iter().copied());
        let existing = repo.item_keys_issued_since(window_start).await?;

        debug!(
            contracts = contract_ids.len(),
            existing_items = existing.len(),
            "Item filter ready"
        );
        Ok(Self::new(contract_ids, existing, created_at))
    }

    /// Lazily yield the novel items among `rows`
    pub fn filter<'a, I>(&'a mut self, rows: I) -> impl Iterator<Item = ContractItem> + 'a
    where
        I: IntoIterator<Item = Result<Row>>,
        I::IntoIter: 'a,
    {
        rows.into_iter().filter_map(move |row| self.check(row))
    }

    /// Decide on a single row
    pub fn check(&mut self, row: Result<Row>) -> Option<ContractItem> {
        self.stats.seen += 1;

        let row = match row {
            Ok(row) => row,
            Err(e) => {
                self.stats.reject("contract_items", &e);
                return None;
            },
        };

        let contract_id = match parser::contract_id(&row) {
            Ok(id) => id,
            Err(e) => {
                self.stats.reject("contract_items", &e);
                return None;
            },
        };
        if !self.contract_ids.contains(&contract_id) {
            self.stats.filtered += 1;
            return None;
        }

        let record_id = match parser::item_record_id(&row) {
            Ok(id) => id,
            Err(e) => {
                self.stats.reject("contract_items", &e);
                return None;
            },
        };
        if self.existing.contains(&(contract_id, record_id)) {
            self.stats.filtered += 1;
            return None;
        }

        match parser::parse_contract_item(&row, self.created_at) {
            Ok(item) => {
                self.existing.insert(item.key());
                Some(item)
            },
            Err(e) => {
                self.stats.reject("contract_items", &e);
                None
            },
        }
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }
}
