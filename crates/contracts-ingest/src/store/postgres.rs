//! Postgres repository
//!
//! Tables are `public_contracts` and `public_contract_items` (see
//! `migrations/`). Unique keys are `contract_id` and
//! `(contract_id, record_id)`; inserts use `ON CONFLICT DO NOTHING`.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use super::ContractRepository;
use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{Contract, ContractItem, ItemKey};

/// Postgres caps a statement at 65535 bind parameters; contracts bind 18
/// columns per row.
const CONTRACT_ROWS_PER_STATEMENT: usize = 3_000;

/// Items bind 11 columns per row.
const ITEM_ROWS_PER_STATEMENT: usize = 5_000;

#[derive(Debug, Clone)]
pub struct PgContractStore {
    pool: PgPool,
}

impl PgContractStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect(&config.url)
            .await?;
        info!(max_connections = config.max_connections, "Connected to database");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ContractRepository for PgContractStore {
    async fn contract_ids_issued_since(&self, since: DateTime<Utc>) -> Result<HashSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT contract_id FROM public_contracts WHERE date_issued >= $1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = ids.len(), since = %since, "Loaded stored contract ids");
        Ok(ids.into_iter().collect())
    }

    async fn item_keys_issued_since(&self, since: DateTime<Utc>) -> Result<HashSet<ItemKey>> {
        let keys: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT i.contract_id, i.record_id
            FROM public_contract_items i
            JOIN public_contracts c ON c.contract_id = i.contract_id
            WHERE c.date_issued >= $1
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = keys.len(), since = %since, "Loaded stored item keys");
        Ok(keys.into_iter().collect())
    }

    async fn insert_contracts(&self, contracts: &[Contract]) -> Result<u64> {
        if contracts.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for rows in contracts.chunks(CONTRACT_ROWS_PER_STATEMENT) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO public_contracts (
                    contract_id, region_id, type, buyout, collateral, price, reward,
                    date_issued, date_expired, days_to_complete, issuer_id,
                    issuer_corporation_id, for_corporation, start_location_id,
                    end_location_id, title, volume, created_at
                )
                "#,
            );

            query_builder.push_values(rows.iter(), |mut b, contract| {
                b.push_bind(contract.contract_id)
                    .push_bind(contract.region_id)
                    .push_bind(contract.contract_type.as_str())
                    .push_bind(contract.buyout.clone())
                    .push_bind(contract.collateral.clone())
                    .push_bind(contract.price.clone())
                    .push_bind(contract.reward.clone())
                    .push_bind(contract.date_issued)
                    .push_bind(contract.date_expired)
                    .push_bind(contract.days_to_complete)
                    .push_bind(contract.issuer_id)
                    .push_bind(contract.issuer_corporation_id)
                    .push_bind(contract.for_corporation)
                    .push_bind(contract.start_location_id)
                    .push_bind(contract.end_location_id)
                    .push_bind(contract.title.clone())
                    .push_bind(contract.volume)
                    .push_bind(contract.created_at);
            });
            query_builder.push(" ON CONFLICT DO NOTHING");

            inserted += query_builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(rows = contracts.len(), inserted, "Inserted contract batch");
        Ok(inserted)
    }

    async fn insert_items(&self, items: &[ContractItem]) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for rows in items.chunks(ITEM_ROWS_PER_STATEMENT) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO public_contract_items (
                    contract_id, record_id, item_id, type_id, quantity, runs,
                    material_efficiency, time_efficiency, is_blueprint_copy,
                    is_included, created_at
                )
                "#,
            );

            query_builder.push_values(rows.iter(), |mut b, item| {
                b.push_bind(item.contract_id)
                    .push_bind(item.record_id)
                    .push_bind(item.item_id)
                    .push_bind(item.type_id)
                    .push_bind(item.quantity)
                    .push_bind(item.runs)
                    .push_bind(item.material_efficiency)
                    .push_bind(item.time_efficiency)
                    .push_bind(item.is_blueprint_copy)
                    .push_bind(item.is_included)
                    .push_bind(item.created_at);
            });
            query_builder.push(" ON CONFLICT DO NOTHING");

            inserted += query_builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(rows = items.len(), inserted, "Inserted contract item batch");
        Ok(inserted)
    }
}
