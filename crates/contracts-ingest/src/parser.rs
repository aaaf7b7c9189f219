//! CSV row decoding for contract snapshot tables
//!
//! Rows are read as header-keyed string maps and only turned into typed
//! records once the dedup filters decide they are worth keeping.

use std::collections::HashMap;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::types::BigDecimal;

use crate::error::{Result, SyncError};
use crate::models::{Contract, ContractItem, ContractType};

/// One CSV row keyed by column name
pub type Row = HashMap<String, String>;

/// Naive timestamp layouts accepted after RFC 3339, interpreted as UTC
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

// ============================================================================
// Row reader
// ============================================================================

/// Lazily decodes rows from one CSV member of a snapshot archive.
///
/// Yields `Err` for a record that cannot be decoded; the reader keeps going
/// after it. Readers over the same member share its buffer.
pub struct RowReader {
    records: Option<csv::DeserializeRecordsIntoIter<Cursor<Arc<[u8]>>, Row>>,
}

impl RowReader {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(Cursor::new(data.into()));
        Self {
            records: Some(reader.into_deserialize()),
        }
    }

    /// Reader over a member that was not present in the archive
    pub fn empty() -> Self {
        Self { records: None }
    }
}

impl Iterator for RowReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let records = self.records.as_mut()?;
        records.next().map(|r| r.map_err(SyncError::from))
    }
}

// ============================================================================
// Field access
// ============================================================================

struct Fields<'a> {
    row: &'a Row,
}

impl<'a> Fields<'a> {
    fn new(row: &'a Row) -> Self {
        Self { row }
    }

    /// Trimmed value, `None` when missing or empty
    fn raw(&self, column: &str) -> Option<&'a str> {
        self.row
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, column: &str) -> Result<&'a str> {
        self.raw(column)
            .ok_or_else(|| SyncError::parse(format!("missing required column {}", column)))
    }

    fn parse<T>(&self, column: &str, value: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        value
            .parse::<T>()
            .map_err(|e| SyncError::parse(format!("invalid {} {:?}: {}", column, value, e)))
    }

    fn required_parsed<T>(&self, column: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.parse(column, self.required(column)?)
    }

    fn optional_parsed<T>(&self, column: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.raw(column).map(|v| self.parse(column, v)).transpose()
    }

    /// "true"/"false"; anything else is unknown
    fn optional_bool(&self, column: &str) -> Option<bool> {
        match self.raw(column)?.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    fn required_bool(&self, column: &str) -> Result<bool> {
        self.optional_bool(column).ok_or_else(|| {
            SyncError::parse(format!(
                "{} must be true or false, got {:?}",
                column,
                self.raw(column).unwrap_or_default()
            ))
        })
    }

    fn required_timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        let value = self.required(column)?;
        parse_timestamp(value)
            .ok_or_else(|| SyncError::parse(format!("invalid {} {:?}", column, value)))
    }

    fn optional_string(&self, column: &str) -> Option<String> {
        self.raw(column).map(str::to_string)
    }
}

/// RFC 3339, or one of the naive layouts taken as UTC
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Contracts
// ============================================================================

/// The row's contract type, `None` if it is not one we ingest
pub fn contract_type(row: &Row) -> Option<ContractType> {
    Fields::new(row).raw("type").and_then(ContractType::from_row_value)
}

pub fn contract_id(row: &Row) -> Result<i64> {
    Fields::new(row).required_parsed("contract_id")
}

/// Build a [`Contract`] from a `contracts.csv` row
pub fn parse_contract(row: &Row, created_at: DateTime<Utc>) -> Result<Contract> {
    let f = Fields::new(row);

    let contract_type = contract_type(row).ok_or_else(|| {
        SyncError::parse(format!(
            "contract type {:?} is not ingested",
            f.raw("type").unwrap_or_default()
        ))
    })?;

    Ok(Contract {
        contract_id: f.required_parsed("contract_id")?,
        region_id: f.required_parsed("region_id")?,
        contract_type,
        buyout: f.optional_parsed::<BigDecimal>("buyout")?,
        collateral: f.optional_parsed::<BigDecimal>("collateral")?,
        price: f.optional_parsed::<BigDecimal>("price")?,
        reward: f.optional_parsed::<BigDecimal>("reward")?,
        date_issued: f.required_timestamp("date_issued")?,
        date_expired: f.required_timestamp("date_expired")?,
        days_to_complete: f.optional_parsed("days_to_complete")?,
        issuer_id: f.required_parsed("issuer_id")?,
        issuer_corporation_id: f.required_parsed("issuer_corporation_id")?,
        for_corporation: f.optional_bool("for_corporation"),
        start_location_id: f.optional_parsed("start_location_id")?,
        end_location_id: f.optional_parsed("end_location_id")?,
        title: f.optional_string("title"),
        volume: f.optional_parsed("volume")?,
        created_at,
    })
}

// ============================================================================
// Contract items
// ============================================================================

pub fn item_record_id(row: &Row) -> Result<i64> {
    Fields::new(row).required_parsed("record_id")
}

/// Build a [`ContractItem`] from a `contract_items.csv` row
pub fn parse_contract_item(row: &Row, created_at: DateTime<Utc>) -> Result<ContractItem> {
    let f = Fields::new(row);

    Ok(ContractItem {
        contract_id: f.required_parsed("contract_id")?,
        record_id: f.required_parsed("record_id")?,
        item_id: f.optional_parsed("item_id")?,
        type_id: f.required_parsed("type_id")?,
        quantity: f.required_parsed("quantity")?,
        runs: f.optional_parsed("runs")?,
        material_efficiency: f.optional_parsed("material_efficiency")?,
        time_efficiency: f.optional_parsed("time_efficiency")?,
        is_blueprint_copy: f.optional_bool("is_blueprint_copy"),
        is_included: f.required_bool("is_included")?,
        created_at,
    })
}
