//! Snapshot discovery on the public contracts history index
//!
//! The mirror publishes a three-level HTML listing:
//!
//! ```text
//! /public-contracts/history/                  years   (a.url)
//! /public-contracts/history/2023/             days    (a.url, text "2023-05-01")
//! /public-contracts/history/2023/2023-05-01/  files   (a.data-file-url)
//! ```
//!
//! File names embed the snapshot creation time, e.g.
//! `public-contracts-2023-05-01_00-00-00.v2.tar.bz2` (UTC).

use std::cmp::Ordering;
use std::collections::VecDeque;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::http::HttpFetcher;

/// `strftime` layout of snapshot file names
pub const SNAPSHOT_FILE_FORMAT: &str = "public-contracts-%Y-%m-%d_%H-%M-%S.v2.tar.bz2";

const DIRECTORY_LINK_SELECTOR: &str = "a.url";
const FILE_LINK_SELECTOR: &str = "a.data-file-url";

/// A snapshot archive published on the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub file_name: String,
    pub url: Url,
    pub created_at: DateTime<Utc>,
}

impl PartialOrd for SnapshotRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SnapshotRef {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.created_at.cmp(&other.created_at) {
            Ordering::Equal => self.file_name.cmp(&other.file_name),
            other => other,
        }
    }
}

/// Creation time embedded in a snapshot file name
pub fn parse_snapshot_file_name(file_name: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(file_name.trim(), SNAPSHOT_FILE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// An anchor found on an index page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLink {
    pub text: String,
    pub url: Url,
}

/// Collect the anchors matching `selector`, resolving hrefs against `page`.
pub fn parse_index_links(html: &str, selector: &str, page: &Url) -> Result<Vec<IndexLink>> {
    let selector = Selector::parse(selector)
        .map_err(|e| SyncError::parse(format!("invalid selector {:?}: {:?}", selector, e)))?;
    let document = Html::parse_document(html);

    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let text = element.text().collect::<String>().trim().to_string();
        match page.join(href.trim()) {
            Ok(url) => links.push(IndexLink { text, url }),
            Err(e) => warn!(href, error = %e, "Skipping index link with invalid href"),
        }
    }
    Ok(links)
}

// ============================================================================
// Directory client
// ============================================================================

/// Enumerates snapshot archives newer than a checkpoint
#[derive(Debug, Clone)]
pub struct SnapshotDirectory {
    fetcher: HttpFetcher,
    history_url: Url,
    lookback: TimeDelta,
}

impl SnapshotDirectory {
    pub fn new(config: &SyncConfig, fetcher: HttpFetcher) -> Result<Self> {
        Ok(Self {
            fetcher,
            history_url: config.history_url()?,
            lookback: config.lookback(),
        })
    }

    /// Lazily list snapshots created strictly after `checkpoint`, oldest first.
    ///
    /// Nothing is fetched until [`SnapshotListing::next`] is called. Listing is
    /// restartable: calling this again walks the index from the top.
    pub fn list_snapshots_since(&self, checkpoint: DateTime<Utc>) -> SnapshotListing {
        info!(
            checkpoint = %checkpoint,
            index = %self.history_url,
            "Listing snapshots since checkpoint"
        );
        let day_cutoff = checkpoint
            .checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        SnapshotListing {
            fetcher: self.fetcher.clone(),
            checkpoint,
            day_cutoff,
            root: Some(self.history_url.clone()),
            years: VecDeque::new(),
            days: VecDeque::new(),
            files: VecDeque::new(),
        }
    }
}

/// Cursor over the history index; fetches one page at a time as it advances.
pub struct SnapshotListing {
    fetcher: HttpFetcher,
    checkpoint: DateTime<Utc>,
    /// Days that start before this are skipped without being fetched
    day_cutoff: DateTime<Utc>,
    root: Option<Url>,
    years: VecDeque<IndexLink>,
    days: VecDeque<IndexLink>,
    files: VecDeque<SnapshotRef>,
}

impl SnapshotListing {
    /// Next snapshot in chronological order, or `None` when the index is exhausted.
    ///
    /// Any HTTP failure ends the listing with an error.
    pub async fn next(&mut self) -> Result<Option<SnapshotRef>> {
        loop {
            if let Some(snapshot) = self.files.pop_front() {
                return Ok(Some(snapshot));
            }
            if let Some(day) = self.days.pop_front() {
                self.files = self.fetch_files(&day).await?;
                continue;
            }
            if let Some(year) = self.years.pop_front() {
                self.days = self.fetch_days(&year).await?;
                continue;
            }
            if let Some(root) = self.root.take() {
                self.years = self.fetch_years(&root).await?;
                continue;
            }
            return Ok(None);
        }
    }

    /// Drain the listing into a vector
    pub async fn collect_all(mut self) -> Result<Vec<SnapshotRef>> {
        let mut snapshots = Vec::new();
        while let Some(snapshot) = self.next().await? {
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    #[instrument(skip(self), fields(url = %root))]
    async fn fetch_years(&self, root: &Url) -> Result<VecDeque<IndexLink>> {
        let html = self.fetcher.get_text(root).await?;
        let links = parse_index_links(&html, DIRECTORY_LINK_SELECTOR, root)?;
        let cutoff_year = self.day_cutoff.year();

        let mut years: Vec<(i32, IndexLink)> = Vec::new();
        for link in links {
            let Ok(year) = link.text.parse::<i32>() else {
                warn!(text = %link.text, url = %link.url, "Skipping year entry with unexpected name");
                continue;
            };
            if year < cutoff_year {
                debug!(year, "Skipping year before checkpoint");
                continue;
            }
            years.push((year, link));
        }
        years.sort_by(|(a, _), (b, _)| a.cmp(b));

        debug!(count = years.len(), "Year listings to scan");
        Ok(years.into_iter().map(|(_, link)| link).collect())
    }

    #[instrument(skip(self), fields(year = %year.text))]
    async fn fetch_days(&self, year: &IndexLink) -> Result<VecDeque<IndexLink>> {
        let html = self.fetcher.get_text(&year.url).await?;
        let links = parse_index_links(&html, DIRECTORY_LINK_SELECTOR, &year.url)?;

        let mut days: Vec<(NaiveDate, IndexLink)> = Vec::new();
        for link in links {
            let Ok(date) = NaiveDate::parse_from_str(&link.text, "%Y-%m-%d") else {
                warn!(text = %link.text, url = %link.url, "Skipping day entry with unexpected name");
                continue;
            };
            if date.and_time(chrono::NaiveTime::MIN).and_utc() < self.day_cutoff {
                continue;
            }
            days.push((date, link));
        }
        days.sort_by(|(a, _), (b, _)| a.cmp(b));

        debug!(count = days.len(), "Day listings to scan");
        Ok(days.into_iter().map(|(_, link)| link).collect())
    }

    #[instrument(skip(self), fields(day = %day.text))]
    async fn fetch_files(&self, day: &IndexLink) -> Result<VecDeque<SnapshotRef>> {
        let html = self.fetcher.get_text(&day.url).await?;
        let links = parse_index_links(&html, FILE_LINK_SELECTOR, &day.url)?;

        let mut files: Vec<SnapshotRef> = Vec::new();
        for link in links {
            let Some(created_at) = parse_snapshot_file_name(&link.text) else {
                warn!(text = %link.text, url = %link.url, "Skipping file entry with unexpected name");
                continue;
            };
            if created_at <= self.checkpoint {
                continue;
            }
            files.push(SnapshotRef {
                file_name: link.text,
                url: link.url,
                created_at,
            });
        }
        files.sort();

        debug!(count = files.len(), "New snapshots in day listing");
        Ok(files.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_snapshot_file_name() {
        assert_eq!(
            parse_snapshot_file_name("public-contracts-2023-05-01_13-45-07.v2.tar.bz2"),
            Some(Utc.with_ymd_and_hms(2023, 5, 1, 13, 45, 7).unwrap())
        );
        assert_eq!(parse_snapshot_file_name("public-contracts-latest.v2.tar.bz2"), None);
        assert_eq!(parse_snapshot_file_name("public-contracts-2023-05-01_13-45-07.v1.tar.bz2"), None);
    }

    #[test]
    fn test_parse_index_links_filters_by_class_and_resolves_hrefs() {
        let page = Url::parse("https://data.everef.net/public-contracts/history/2023/").unwrap();
        let html = r#"
            <html><body>
              <a href="/">home</a>
              <a class="url" href="/public-contracts/history/2023/2023-05-01/">2023-05-01</a>
              <a class="url" href="2023-05-02/"> 2023-05-02 </a>
              <a class="url">no href</a>
            </body></html>
        "#;

        let links = parse_index_links(html, DIRECTORY_LINK_SELECTOR, &page).unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].text, "2023-05-01");
        assert_eq!(
            links[0].url.as_str(),
            "https://data.everef.net/public-contracts/history/2023/2023-05-01/"
        );
        assert_eq!(links[1].text, "2023-05-02");
        assert_eq!(
            links[1].url.as_str(),
            "https://data.everef.net/public-contracts/history/2023/2023-05-02/"
        );
    }

    #[test]
    fn test_parse_file_links() {
        let page = Url::parse("https://data.everef.net/public-contracts/history/2023/2023-05-01/")
            .unwrap();
        let html = r#"
            <a class="url" href="/public-contracts/history/2023/">..</a>
            <a class="data-file-url" href="/public-contracts/history/2023/2023-05-01/public-contracts-2023-05-01_00-00-00.v2.tar.bz2">public-contracts-2023-05-01_00-00-00.v2.tar.bz2</a>
        "#;

        let links = parse_index_links(html, FILE_LINK_SELECTOR, &page).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].text, "public-contracts-2023-05-01_00-00-00.v2.tar.bz2");
    }

    #[test]
    fn test_snapshot_ordering() {
        let url = Url::parse("https://data.everef.net/x").unwrap();
        let older = SnapshotRef {
            file_name: "public-contracts-2023-05-01_00-00-00.v2.tar.bz2".to_string(),
            url: url.clone(),
            created_at: Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap(),
        };
        let newer = SnapshotRef {
            file_name: "public-contracts-2023-05-01_00-30-00.v2.tar.bz2".to_string(),
            url,
            created_at: Utc.with_ymd_and_hms(2023, 5, 1, 0, 30, 0).unwrap(),
        };

        let mut snapshots = vec![newer.clone(), older.clone()];
        snapshots.sort();
        assert_eq!(snapshots, vec![older, newer]);
    }
}
