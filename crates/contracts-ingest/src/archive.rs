//! Snapshot archive download and table extraction

use std::sync::Arc;

use tracing::{info, instrument, warn};
use url::Url;

use crate::decompression::extract_tar_bz2_members;
use crate::error::Result;
use crate::http::HttpFetcher;
use crate::parser::RowReader;

pub const CONTRACTS_MEMBER: &str = "contracts.csv";
pub const CONTRACT_ITEMS_MEMBER: &str = "contract_items.csv";

/// The two tables of one snapshot. Either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotTables {
    pub contracts: Option<Arc<[u8]>>,
    pub items: Option<Arc<[u8]>>,
}

impl SnapshotTables {
    /// Decompress a `.tar.bz2` snapshot and pull out its tables
    pub fn from_archive_bytes(data: &[u8]) -> Result<Self> {
        let mut members = extract_tar_bz2_members(data, &[CONTRACTS_MEMBER, CONTRACT_ITEMS_MEMBER])?;
        Ok(Self {
            contracts: members.remove(CONTRACTS_MEMBER).map(Arc::from),
            items: members.remove(CONTRACT_ITEMS_MEMBER).map(Arc::from),
        })
    }

    /// Rows of `contracts.csv`; empty when the member is missing
    pub fn contract_rows(&self) -> RowReader {
        Self::rows(&self.contracts)
    }

    /// Rows of `contract_items.csv`; empty when the member is missing
    pub fn item_rows(&self) -> RowReader {
        Self::rows(&self.items)
    }

    fn rows(member: &Option<Arc<[u8]>>) -> RowReader {
        match member {
            Some(data) => RowReader::new(Arc::clone(data)),
            None => RowReader::empty(),
        }
    }
}

/// Downloads snapshot archives and splits them into tables
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    fetcher: HttpFetcher,
}

impl ArchiveExtractor {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }

    /// Fetch and unpack one archive. Fails as a whole if the download or the
    /// decompression fails; missing members are only logged.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn extract(&self, url: &Url) -> Result<SnapshotTables> {
        let data = self.fetcher.get_bytes(url).await?;
        let tables = SnapshotTables::from_archive_bytes(&data)?;

        if tables.contracts.is_none() {
            warn!(member = CONTRACTS_MEMBER, "Archive has no contracts table");
        }
        if tables.items.is_none() {
            warn!(member = CONTRACT_ITEMS_MEMBER, "Archive has no contract items table");
        }
        info!(
            archive_bytes = data.len(),
            contracts_bytes = tables.contracts.as_ref().map_or(0, |d| d.len()),
            items_bytes = tables.items.as_ref().map_or(0, |d| d.len()),
            "Extracted snapshot archive"
        );
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use bzip2::write::BzEncoder;
    use bzip2::Compression;
    use std::io::Write;

    fn archive(members: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, content.as_bytes()).unwrap();
        }
        let tar = builder.into_inner().unwrap();

        let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_both_tables() {
        let data = archive(&[
            ("contracts.csv", "contract_id,type\n1,auction\n"),
            ("contract_items.csv", "contract_id,record_id\n1,7\n"),
        ]);
        let tables = SnapshotTables::from_archive_bytes(&data).unwrap();

        let contracts: Vec<_> = tables.contract_rows().collect::<Result<_>>().unwrap();
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0]["type"], "auction");

        let items: Vec<_> = tables.item_rows().collect::<Result<_>>().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["record_id"], "7");
    }

    #[test]
    fn test_missing_items_table_yields_empty_rows() {
        let data = archive(&[("contracts.csv", "contract_id,type\n1,auction\n")]);
        let tables = SnapshotTables::from_archive_bytes(&data).unwrap();

        assert!(tables.items.is_none());
        assert_eq!(tables.item_rows().count(), 0);
        assert_eq!(tables.contract_rows().count(), 1);
    }

    #[test]
    fn test_rows_can_be_read_twice() {
        let data = archive(&[("contracts.csv", "contract_id,type\n1,auction\n2,courier\n")]);
        let tables = SnapshotTables::from_archive_bytes(&data).unwrap();
        assert_eq!(tables.contract_rows().count(), 2);
        assert_eq!(tables.contract_rows().count(), 2);
    }

    #[test]
    fn test_row_readers_share_the_member_buffer() {
        let data = archive(&[("contracts.csv", "contract_id,type\n1,auction\n")]);
        let tables = SnapshotTables::from_archive_bytes(&data).unwrap();
        let member = tables.contracts.as_ref().unwrap();

        let first = tables.contract_rows();
        let second = tables.contract_rows();
        assert_eq!(Arc::strong_count(member), 3);

        drop(first);
        drop(second);
        assert_eq!(Arc::strong_count(member), 1);
    }

    #[test]
    fn test_corrupt_archive_is_decode_error() {
        let err = SnapshotTables::from_archive_bytes(b"definitely not bzip2").unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
    }
}
