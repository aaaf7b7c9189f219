//! Shared fixtures for integration tests
//!
//! - in-memory `.tar.bz2` snapshot archives
//! - a `wiremock` server laid out like the public contracts history index

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use bzip2::write::BzEncoder;
use bzip2::Compression;
use chrono::{DateTime, TimeZone, Utc};
use contracts_ingest::config::SyncConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const HISTORY_PATH: &str = "/public-contracts/history/";

pub const CONTRACTS_HEADER: &str = "contract_id,buyout,collateral,date_expired,date_issued,days_to_complete,end_location_id,for_corporation,issuer_corporation_id,issuer_id,price,reward,start_location_id,title,type,volume,region_id";

pub const ITEMS_HEADER: &str = "contract_id,is_blueprint_copy,is_included,item_id,material_efficiency,quantity,record_id,runs,time_efficiency,type_id";

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,contracts_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// "Now" for sync runs in tests: two weeks after the fixture snapshots
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 5, 15, 0, 0, 0).unwrap()
}

pub fn sync_config(server: &MockServer, dir: &Path) -> SyncConfig {
    SyncConfig::new()
        .with_base_url(server.uri())
        .with_checkpoint_path(dir.join("update_contracts.json"))
        .with_lock_path(dir.join("update_contracts.json.lock"))
        .with_retries(0, 1)
}

// ============================================================================
// Snapshot content
// ============================================================================

/// A `contracts.csv` line issued on `issued` (`YYYY-MM-DD`)
pub fn contract_line(contract_id: i64, contract_type: &str, issued: &str) -> String {
    format!(
        "{contract_id},1000000.00,,{issued}T00:00:00Z,{issued}T00:00:00Z,0,,false,98000001,2110000001,,,60003760,,{contract_type},10.0,10000002"
    )
}

/// A `contract_items.csv` line
pub fn item_line(contract_id: i64, record_id: i64) -> String {
    format!("{contract_id},,true,,,1,{record_id},,,34")
}

pub fn contracts_csv(lines: &[String]) -> String {
    table(CONTRACTS_HEADER, lines)
}

pub fn items_csv(lines: &[String]) -> String {
    table(ITEMS_HEADER, lines)
}

fn table(header: &str, lines: &[String]) -> String {
    let mut csv = format!("{}\n", header);
    for line in lines {
        csv.push_str(line);
        csv.push('\n');
    }
    csv
}

/// bzip2-compressed tarball with the given members
pub fn archive(members: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content.as_bytes()).unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

/// Snapshot with both tables
pub fn snapshot_archive(contracts: &[String], items: &[String]) -> Vec<u8> {
    let contracts = contracts_csv(contracts);
    let items = items_csv(items);
    archive(&[
        ("contracts.csv", contracts.as_str()),
        ("contract_items.csv", items.as_str()),
    ])
}

// ============================================================================
// Index pages
// ============================================================================

pub fn directory_page(links: &[(String, String)]) -> String {
    page(links, "url")
}

pub fn file_page(links: &[(String, String)]) -> String {
    page(links, "data-file-url")
}

fn page(links: &[(String, String)], class: &str) -> String {
    let mut html = String::from("<html><body><h1>Index</h1><a href=\"../\">Parent directory</a><ul>\n");
    for (href, text) in links {
        html.push_str(&format!("<li><a class=\"{}\" href=\"{}\">{}</a></li>\n", class, href, text));
    }
    html.push_str("</ul></body></html>\n");
    html
}

/// Builds a mock mirror from snapshot archives keyed by file name
#[derive(Default)]
pub struct MockMirror {
    snapshots: BTreeMap<String, Vec<u8>>,
    listed_only_years: BTreeSet<String>,
}

impl MockMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `archive` as `file_name`; year and day pages are derived from it
    pub fn snapshot(mut self, file_name: &str, archive: Vec<u8>) -> Self {
        self.snapshots.insert(file_name.to_string(), archive);
        self
    }

    /// List a year in the root index without serving its page
    pub fn listed_year(mut self, year: &str) -> Self {
        self.listed_only_years.insert(year.to_string());
        self
    }

    pub async fn start(self) -> MockServer {
        let server = MockServer::start().await;

        // year -> day -> files
        let mut tree: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for file_name in self.snapshots.keys() {
            let day = file_name["public-contracts-".len().."public-contracts-YYYY-MM-DD".len()].to_string();
            let year = day[..4].to_string();
            tree.entry(year).or_default().entry(day).or_default().push(file_name.clone());
        }

        let mut years: Vec<(String, String)> = tree
            .keys()
            .chain(self.listed_only_years.iter())
            .map(|y| (format!("{}{}/", HISTORY_PATH, y), y.clone()))
            .collect();
        // The live index lists newest first
        years.sort_by(|a, b| b.1.cmp(&a.1));
        mount_page(&server, HISTORY_PATH, directory_page(&years)).await;

        for (year, days) in &tree {
            let year_path = format!("{}{}/", HISTORY_PATH, year);
            let mut day_links: Vec<(String, String)> = days
                .keys()
                .map(|d| (format!("{}{}/", year_path, d), d.clone()))
                .collect();
            day_links.reverse();
            mount_page(&server, &year_path, directory_page(&day_links)).await;

            for (day, files) in days {
                let day_path = format!("{}{}/", year_path, day);
                let mut file_links: Vec<(String, String)> = files
                    .iter()
                    .map(|f| (format!("{}{}", day_path, f), f.clone()))
                    .collect();
                file_links.reverse();
                mount_page(&server, &day_path, file_page(&file_links)).await;

                for file in files {
                    Mock::given(method("GET"))
                        .and(path(format!("{}{}", day_path, file)))
                        .respond_with(
                            ResponseTemplate::new(200).set_body_bytes(self.snapshots[file].clone()),
                        )
                        .mount(&server)
                        .await;
                }
            }
        }

        server
    }
}

pub async fn mount_page(server: &MockServer, page_path: &str, html: String) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(server)
        .await;
}
