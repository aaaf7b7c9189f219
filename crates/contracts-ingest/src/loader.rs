//! Bounded-size bulk loading of filtered records

use tracing::debug;

use crate::dedup::FilterStats;
use crate::error::Result;
use crate::models::{Contract, ContractItem};
use crate::store::ContractRepository;

/// Splits an iterator into `Vec`s of at most `size` items
pub struct Chunks<I> {
    inner: I,
    size: usize,
}

impl<I: Iterator> Iterator for Chunks<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk: Vec<I::Item> = self.inner.by_ref().take(self.size).collect();
        if chunk.is_empty() {
            None
        } else {
            Some(chunk)
        }
    }
}

pub fn chunked<I: IntoIterator>(iter: I, size: usize) -> Chunks<I::IntoIter> {
    Chunks {
        inner: iter.into_iter(),
        size: size.max(1),
    }
}

/// Outcome of loading one table of one snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub seen: u64,
    pub filtered: u64,
    pub rejected: u64,
    /// Rows the store actually inserted; lower than accepted rows when a
    /// conflict was absorbed
    pub inserted: u64,
}

impl LoadStats {
    pub fn new(filter: FilterStats, inserted: u64) -> Self {
        Self {
            seen: filter.seen,
            filtered: filter.filtered,
            rejected: filter.rejected,
            inserted,
        }
    }
}

/// Writes records to a repository one chunk per bulk insert.
///
/// Chunks are independent: a failure leaves earlier chunks in place, which is
/// safe because inserts ignore rows that already exist.
pub struct BatchLoader<'a, R: ?Sized> {
    repo: &'a R,
    batch_size: usize,
}

impl<'a, R> BatchLoader<'a, R>
where
    R: ContractRepository + ?Sized,
{
    pub fn new(repo: &'a R, batch_size: usize) -> Self {
        Self {
            repo,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn load_contracts<I>(&self, contracts: I) -> Result<u64>
    where
        I: IntoIterator<Item = Contract>,
    {
        let mut inserted = 0;
        for (n, batch) in chunked(contracts, self.batch_size).enumerate() {
            let count = self.repo.insert_contracts(&batch).await?;
            debug!(batch = n, rows = batch.len(), inserted = count, "Loaded contracts chunk");
            inserted += count;
        }
        Ok(inserted)
    }

    pub async fn load_items<I>(&self, items: I) -> Result<u64>
    where
        I: IntoIterator<Item = ContractItem>,
    {
        let mut inserted = 0;
        for (n, batch) in chunked(items, self.batch_size).enumerate() {
            let count = self.repo.insert_items(&batch).await?;
            debug!(batch = n, rows = batch.len(), inserted = count, "Loaded contract items chunk");
            inserted += count;
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::models::{ContractType, ItemKey};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records the size of every insert call
    #[derive(Default)]
    struct RecordingRepo {
        contract_batches: Mutex<Vec<usize>>,
        item_batches: Mutex<Vec<usize>>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl ContractRepository for RecordingRepo {
        async fn contract_ids_issued_since(&self, _since: DateTime<Utc>) -> Result<HashSet<i64>> {
            Ok(HashSet::new())
        }

        async fn item_keys_issued_since(&self, _since: DateTime<Utc>) -> Result<HashSet<ItemKey>> {
            Ok(HashSet::new())
        }

        async fn insert_contracts(&self, contracts: &[Contract]) -> Result<u64> {
            let mut batches = self.contract_batches.lock().unwrap();
            if self.fail_on_call == Some(batches.len()) {
                return Err(SyncError::Repository("connection reset".to_string()));
            }
            batches.push(contracts.len());
            Ok(contracts.len() as u64)
        }

        async fn insert_items(&self, items: &[ContractItem]) -> Result<u64> {
            self.item_batches.lock().unwrap().push(items.len());
            // Pretend one row per chunk was a conflict
            Ok(items.len() as u64 - 1)
        }
    }

    fn contract(contract_id: i64) -> Contract {
        let ts = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap();
        Contract {
            contract_id,
            region_id: 10000002,
            contract_type: ContractType::ItemExchange,
            buyout: None,
            collateral: None,
            price: None,
            reward: None,
            date_issued: ts,
            date_expired: ts,
            days_to_complete: None,
            issuer_id: 1,
            issuer_corporation_id: 2,
            for_corporation: None,
            start_location_id: None,
            end_location_id: None,
            title: None,
            volume: None,
            created_at: ts,
        }
    }

    fn item(record_id: i64) -> ContractItem {
        ContractItem {
            contract_id: 1,
            record_id,
            item_id: None,
            type_id: 34,
            quantity: 1,
            runs: None,
            material_efficiency: None,
            time_efficiency: None,
            is_blueprint_copy: None,
            is_included: true,
            created_at: Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_chunked() {
        let chunks: Vec<Vec<i32>> = chunked(1..=7, 3).collect();
        assert_eq!(chunks, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
        assert_eq!(chunked(Vec::<i32>::new(), 3).count(), 0);
    }

    #[test]
    fn test_chunked_zero_size_is_one() {
        assert_eq!(chunked(1..=2, 0).count(), 2);
    }

    #[tokio::test]
    async fn test_contracts_are_loaded_in_chunks() {
        let repo = RecordingRepo::default();
        let loader = BatchLoader::new(&repo, 4);

        let inserted = loader.load_contracts((1..=10).map(contract)).await.unwrap();
        assert_eq!(inserted, 10);
        assert_eq!(*repo.contract_batches.lock().unwrap(), vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_nothing_to_load_makes_no_calls() {
        let repo = RecordingRepo::default();
        let loader = BatchLoader::new(&repo, 4);

        assert_eq!(loader.load_items(Vec::new()).await.unwrap(), 0);
        assert!(repo.item_batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inserted_counts_what_the_store_reports() {
        let repo = RecordingRepo::default();
        let loader = BatchLoader::new(&repo, 5);

        let inserted = loader.load_items((1..=10).map(item)).await.unwrap();
        assert_eq!(inserted, 8);
    }

    #[tokio::test]
    async fn test_failed_chunk_stops_loading() {
        let repo = RecordingRepo {
            fail_on_call: Some(1),
            ..Default::default()
        };
        let loader = BatchLoader::new(&repo, 2);

        let err = loader.load_contracts((1..=6).map(contract)).await.unwrap_err();
        assert!(matches!(err, SyncError::Repository(_)));
        assert_eq!(*repo.contract_batches.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_load_stats_from_filter() {
        let stats = LoadStats::new(
            FilterStats {
                seen: 10,
                filtered: 3,
                rejected: 1,
            },
            5,
        );
        assert_eq!(stats.inserted, 5);
        assert_eq!(stats.seen, 10);
    }
}
