//! Incremental sync of public contract snapshots
//!
//! One run:
//!
//! 1. take the run lock (give up quietly if another run holds it)
//! 2. read the checkpoint
//! 3. for each snapshot newer than the checkpoint, oldest first:
//!    extract, load new contracts, load new items, then advance the
//!    checkpoint to the snapshot's creation time
//!
//! The checkpoint write is the commit point of a snapshot. A failure before it
//! stops the run and leaves that snapshot to be processed again next time.

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument};

use crate::archive::ArchiveExtractor;
use crate::checkpoint::CheckpointFile;
use crate::config::SyncConfig;
use crate::dedup::{ContractFilter, ItemFilter};
use crate::discovery::{SnapshotDirectory, SnapshotRef};
use crate::error::{Result, SyncError};
use crate::http::HttpFetcher;
use crate::loader::{BatchLoader, LoadStats};
use crate::lock::RunLock;
use crate::store::ContractRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every snapshot newer than the checkpoint was loaded
    Completed,
    /// Another run held the lock; nothing was done
    LockContended,
}

/// What happened to one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotReport {
    pub file_name: String,
    pub created_at: DateTime<Utc>,
    pub contracts: LoadStats,
    pub items: LoadStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub checkpoint_before: DateTime<Utc>,
    pub checkpoint_after: DateTime<Utc>,
    pub snapshots: Vec<SnapshotReport>,
}

impl SyncReport {
    pub fn contracts_inserted(&self) -> u64 {
        self.snapshots.iter().map(|s| s.contracts.inserted).sum()
    }

    pub fn items_inserted(&self) -> u64 {
        self.snapshots.iter().map(|s| s.items.inserted).sum()
    }
}

pub struct SyncOrchestrator<R, L> {
    config: SyncConfig,
    repository: R,
    lock: L,
    checkpoint: CheckpointFile,
    directory: SnapshotDirectory,
    extractor: ArchiveExtractor,
}

impl<R, L> SyncOrchestrator<R, L>
where
    R: ContractRepository,
    L: RunLock,
{
    pub fn new(config: SyncConfig, repository: R, lock: L) -> Result<Self> {
        config.validate()?;
        let fetcher = HttpFetcher::new(&config)?;

        Ok(Self {
            checkpoint: CheckpointFile::from_config(&config),
            directory: SnapshotDirectory::new(&config, fetcher.clone())?,
            extractor: ArchiveExtractor::new(fetcher),
            config,
            repository,
            lock,
        })
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn checkpoint(&self) -> &CheckpointFile {
        &self.checkpoint
    }

    pub async fn run(&self) -> Result<SyncReport> {
        self.run_at(Utc::now()).await
    }

    /// Run one sync as of `now`. The default checkpoint and the dedup
    /// retention window are both measured back from it.
    #[instrument(skip(self))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SyncReport> {
        let _guard = match self.lock.try_acquire() {
            Ok(guard) => guard,
            Err(SyncError::LockContention { path }) => {
                info!(lock = %path.display(), "Another sync run holds the lock, returning");
                let checkpoint = self.checkpoint.read_at(now);
                return Ok(SyncReport {
                    outcome: SyncOutcome::LockContended,
                    checkpoint_before: checkpoint,
                    checkpoint_after: checkpoint,
                    snapshots: Vec::new(),
                });
            },
            Err(e) => return Err(e),
        };

        let checkpoint_before = self.checkpoint.read_at(now);
        let mut checkpoint_after = checkpoint_before;
        let mut snapshots = Vec::new();

        let mut listing = self.directory.list_snapshots_since(checkpoint_before);
        while let Some(snapshot) = listing.next().await? {
            let report = match self.process_snapshot(&snapshot, now).await {
                Ok(report) => report,
                Err(e) => {
                    error!(
                        file_name = %snapshot.file_name,
                        url = %snapshot.url,
                        error = %e,
                        "Snapshot failed, checkpoint left at {}",
                        checkpoint_after
                    );
                    return Err(e);
                },
            };

            self.checkpoint.write(snapshot.created_at)?;
            checkpoint_after = snapshot.created_at;

            info!(
                file_name = %report.file_name,
                created_at = %report.created_at,
                contracts_inserted = report.contracts.inserted,
                contracts_filtered = report.contracts.filtered,
                contracts_rejected = report.contracts.rejected,
                items_inserted = report.items.inserted,
                items_filtered = report.items.filtered,
                items_rejected = report.items.rejected,
                "Snapshot committed"
            );
            snapshots.push(report);
        }

        info!(
            snapshots = snapshots.len(),
            checkpoint = %checkpoint_after,
            "Sync complete"
        );
        Ok(SyncReport {
            outcome: SyncOutcome::Completed,
            checkpoint_before,
            checkpoint_after,
            snapshots,
        })
    }

    async fn process_snapshot(&self, snapshot: &SnapshotRef, now: DateTime<Utc>) -> Result<SnapshotReport> {
        info!(
            file_name = %snapshot.file_name,
            url = %snapshot.url,
            created_at = %snapshot.created_at,
            "Processing snapshot"
        );

        let tables = self.extractor.extract(&snapshot.url).await?;
        let window_start = now - self.config.retention();
        let loader = BatchLoader::new(&self.repository, self.config.batch_size);

        let mut contract_filter = ContractFilter::load(&self.repository, window_start, now).await?;
        let inserted = loader.load_contracts(contract_filter.filter(tables.contract_rows())).await?;
        let contracts = LoadStats::new(contract_filter.stats(), inserted);

        let mut item_filter = ItemFilter::load(
            &self.repository,
            window_start,
            contract_filter.accepted_ids(),
            now,
        )
        .await?;
        let inserted = loader.load_items(item_filter.filter(tables.item_rows())).await?;
        let items = LoadStats::new(item_filter.stats(), inserted);

        Ok(SnapshotReport {
            file_name: snapshot.file_name.clone(),
            created_at: snapshot.created_at,
            contracts,
            items,
        })
    }
}
