//! Loading and saving the baseline and checked proxy lists.
//!
//! Both files hold one record per line as whitespace-separated `key=value`
//! pairs. `proxy` is required; `weight`, `status`, `last_check` and
//! `check_used` fall back to their defaults when absent and to 0 when they do
//! not parse.

use crate::error::{Error, Result};
use crate::proxy::{Proxy, ProxyRecord, ProxyStatus};

use log::{info, warn};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use url::Url;

/// Parse a proxy list, dropping lines without a usable `proxy` address.
pub fn parse_records(content: &str) -> Vec<ProxyRecord> {
    content.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<ProxyRecord> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let fields: HashMap<&str, &str> = line
        .split_whitespace()
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect();

    let address = *fields.get("proxy")?;
    if Url::parse(address).is_err() {
        return None;
    }

    let int = |name: &str, default: i64| match fields.get(name) {
        Some(value) => value.parse::<i64>().unwrap_or(0),
        None => default,
    };
    let defaults = ProxyRecord::new(address);

    Some(ProxyRecord {
        weight: int("weight", defaults.weight),
        status: ProxyStatus::from_code(int("status", defaults.status.code())),
        last_check: int("last_check", defaults.last_check),
        check_used: int("check_used", defaults.check_used),
        address: defaults.address,
    })
}

/// Render records in the checked-list format, one line each.
pub fn render_records(records: &[ProxyRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.to_string());
        out.push('\n');
    }
    out
}

/// Persistence for one pool: a baseline list and the list written after each sweep.
#[derive(Debug, Clone)]
pub struct Store {
    baseline: PathBuf,
    checked: PathBuf,
}

impl Store {
    pub fn new(baseline: impl Into<PathBuf>, checked: impl Into<PathBuf>) -> Self {
        Self {
            baseline: baseline.into(),
            checked: checked.into(),
        }
    }

    pub fn checked_path(&self) -> &Path {
        &self.checked
    }

    /// Load every proxy, preferring the checked list and adding baseline entries it lacks.
    ///
    /// A missing file counts as empty; other read errors are fatal.
    pub async fn load(&self, max_rps: f64) -> Result<Vec<Proxy>> {
        let checked = read_records(&self.checked).await?;
        let baseline = read_records(&self.baseline).await?;
        info!(
            "loaded {} checked and {} baseline proxy records",
            checked.len(),
            baseline.len()
        );

        let mut merged: HashMap<String, ProxyRecord> = HashMap::new();
        for record in checked {
            merged.insert(record.address.clone(), record);
        }
        for record in baseline {
            merged.entry(record.address.clone()).or_insert(record);
        }

        let proxies: Vec<Proxy> = merged
            .values()
            .filter_map(|record| Proxy::from_record(record, max_rps))
            .collect();

        if proxies.is_empty() {
            let dir = self.baseline.parent().map(Path::to_path_buf).unwrap_or_default();
            return Err(Error::EmptyPool(dir));
        }
        Ok(proxies)
    }

    /// Rewrite the checked list with `records`.
    pub async fn save(&self, records: &[ProxyRecord]) -> Result<()> {
        tokio::fs::write(&self.checked, render_records(records))
            .await
            .map_err(|source| Error::Io {
                path: self.checked.clone(),
                source,
            })
    }
}

async fn read_records(path: &Path) -> Result<Vec<ProxyRecord>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(parse_records(&content)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("proxy list {} not found", path.display());
            Ok(Vec::new())
        }
        Err(source) => Err(Error::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
