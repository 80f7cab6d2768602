//! Reading many files at once
//!
//! Parallelism is across files only: each file gets its own reader on a
//! rayon worker, and the registry is shared read-only.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;
use parsely_core::{FormatId, Registry};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::ReaderConfig;
use crate::error::ReaderError;
use crate::reader::{FileReader, ReadItem};

/// What one pass over a file produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSummary {
    pub path: PathBuf,
    pub format: Option<FormatId>,
    pub datagrams: u64,
    pub skipped: u64,
    /// Decoded datagrams per catalog name
    pub by_type: BTreeMap<&'static str, u64>,
    /// Set when the pass stopped early
    pub error: Option<String>,
}

/// Read every file to the end, detecting each format. Results come back in
/// the order of `paths`.
pub fn read_files<P: AsRef<Path> + Sync>(
    paths: &[P],
    registry: Arc<Registry>,
    config: &ReaderConfig,
) -> Vec<FileSummary> {
    paths
        .par_iter()
        .map(|path| summarize(path.as_ref(), registry.clone(), config.clone()))
        .collect()
}

fn summarize(path: &Path, registry: Arc<Registry>, config: ReaderConfig) -> FileSummary {
    let mut summary = FileSummary {
        path: path.to_path_buf(),
        format: None,
        datagrams: 0,
        skipped: 0,
        by_type: BTreeMap::new(),
        error: None,
    };
    if let Err(e) = read_one(path, registry, config, &mut summary) {
        warn!("{}: {}", path.display(), e);
        summary.error = Some(e.to_string());
    }
    summary
}

fn read_one(
    path: &Path,
    registry: Arc<Registry>,
    config: ReaderConfig,
    summary: &mut FileSummary,
) -> Result<(), ReaderError> {
    let mut reader = FileReader::open_auto_with(path, registry, config)?;
    summary.format = Some(reader.format());

    for item in reader.datagrams() {
        match item? {
            ReadItem::Record(d) => {
                summary.datagrams += 1;
                *summary.by_type.entry(d.name).or_default() += 1;
            }
            ReadItem::Skip(_) => summary.skipped += 1,
            ReadItem::EndOfStream => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{frame, init_logging, ping, registry, write_file};

    #[test]
    fn test_read_files() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();

        let mut good = ping(1, 0);
        good.extend(frame(0xFFFF, 0, &[0u8; 4]));
        good.extend(ping(2, 0));
        let good = write_file(&dir, "a.bin", &good);

        let mut bad = ping(1, 0);
        bad.extend_from_slice(&[0xAB; 300]);
        let bad = write_file(&dir, "b.bin", &bad);

        let missing = dir.path().join("c.bin");

        let config = ReaderConfig {
            resync_window: 32,
            ..Default::default()
        };
        let summaries = read_files(&[&good, &bad, &missing], registry(), &config);
        assert_eq!(summaries.len(), 3);

        assert_eq!(summaries[0].path, good);
        assert_eq!(summaries[0].format, Some(FormatId::S7k));
        assert_eq!(summaries[0].datagrams, 2);
        assert_eq!(summaries[0].skipped, 1);
        assert_eq!(summaries[0].by_type.get("PING"), Some(&2));
        assert_eq!(summaries[0].error, None);

        assert_eq!(summaries[1].datagrams, 1);
        assert!(summaries[1].error.as_deref().unwrap().contains("Stream corrupt"));

        assert_eq!(summaries[2].format, None);
        assert!(summaries[2].error.is_some());
    }
}
