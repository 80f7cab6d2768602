//! Per-file datagram index
//!
//! One pass over the frame boundaries records where every datagram of every
//! type lives. Only the heads of ping datagrams are decoded, for the ping
//! statistics. The index can be stored next to the data file so later opens
//! skip the scan.
//!
//! Sidecar layout: 4 magic bytes, u16 version, then the bincode encoding of
//! the stored index.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parsely_core::{FormatId, Frame, FrameStatus, PingLayout, TypeTag};
use serde::{Deserialize, Serialize};

use crate::error::ReaderError;
use crate::reader::FileReader;

/// Magic bytes at the start of an index sidecar
pub const INDEX_MAGIC: [u8; 4] = *b"PIDX";

/// Current sidecar version
pub const INDEX_VERSION: u16 = 2;

/// Extension appended to the data file name for the sidecar
pub const INDEX_EXTENSION: &str = "pidx";

/// Location of one datagram in the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub offset: u64,
    pub length: u64,
    pub time: Option<DateTime<Utc>>,
}

/// Ping bookkeeping for one ping datagram type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingStats {
    /// Pings whose first datagram is in the file
    pub number_of_pings: usize,
    /// True when the datagram count differs from the ping count
    pub datagram_splits: bool,
    /// Position in the time-ordered entries of each ping's first datagram.
    /// Empty unless pings are split.
    pub split_start_index: Vec<usize>,
    /// Datagrams per ping, parallel to `split_start_index`
    pub split_num_dgs: Vec<u16>,
    pub max_beams: u64,
    pub max_tx_sectors: u64,
}

// What the head of one ping datagram says
#[derive(Debug, Clone, Copy)]
struct PingHead {
    first: bool,
    partitions: u16,
    beams: u64,
    tx_sectors: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileIndex {
    format: FormatId,
    file_len: u64,
    by_tag: BTreeMap<TypeTag, Vec<IndexEntry>>,
    pings: BTreeMap<TypeTag, PingStats>,
    corrupt_regions: u64,
    truncated_frames: u64,
}

impl FileIndex {
    /// Walk every frame of `reader` from the start. The reader is rewound
    /// again afterwards.
    pub fn build(reader: &mut FileReader) -> Result<Self, ReaderError> {
        reader.rewind()?;
        let catalog = reader.registry().catalog(reader.format())?;

        let mut by_tag: BTreeMap<TypeTag, Vec<IndexEntry>> = BTreeMap::new();
        let mut heads: HashMap<u64, PingHead> = HashMap::new();
        let mut corrupt_regions = 0;
        let mut truncated_frames = 0;

        while let Some(frame) = reader.next_frame()? {
            match (frame.status, frame.tag) {
                (FrameStatus::Valid, Some(tag)) => {
                    if let Some(layout) = catalog.ping_layout(tag) {
                        if let Some(head) = ping_head(reader, &frame, layout)? {
                            heads.insert(frame.offset, head);
                        }
                    }
                    by_tag.entry(tag).or_default().push(IndexEntry {
                        offset: frame.offset,
                        length: frame.length,
                        time: frame.time,
                    });
                }
                (FrameStatus::Truncated { .. }, _) => truncated_frames += 1,
                _ => corrupt_regions += 1,
            }
        }

        // Stable, so equal timestamps keep file order
        for entries in by_tag.values_mut() {
            entries.sort_by_key(|e| e.time);
        }

        let pings = catalog
            .pings
            .iter()
            .filter_map(|layout| {
                let entries = by_tag.get(&layout.tag)?;
                Some((layout.tag, ping_stats(entries, &heads)))
            })
            .collect();

        reader.rewind()?;

        let index = Self {
            format: reader.format(),
            file_len: reader.len(),
            by_tag,
            pings,
            corrupt_regions,
            truncated_frames,
        };
        info!(
            "Indexed {}: {} datagrams of {} types",
            reader.path().display(),
            index.datagram_count(),
            index.by_tag.len()
        );
        Ok(index)
    }

    pub fn format(&self) -> FormatId {
        self.format
    }

    /// Size of the file the index was built from
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Type tags present in the file, in tag order
    pub fn tags(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.by_tag.keys().copied()
    }

    /// Entries of one type, oldest first
    pub fn entries(&self, tag: TypeTag) -> &[IndexEntry] {
        self.by_tag.get(&tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, tag: TypeTag) -> usize {
        self.entries(tag).len()
    }

    pub fn datagram_count(&self) -> usize {
        self.by_tag.values().map(Vec::len).sum()
    }

    /// Ping statistics of a ping datagram type present in the file
    pub fn ping_stats(&self, tag: TypeTag) -> Option<&PingStats> {
        self.pings.get(&tag)
    }

    pub fn corrupt_regions(&self) -> u64 {
        self.corrupt_regions
    }

    pub fn truncated_frames(&self) -> u64 {
        self.truncated_frames
    }

    /// Earliest and latest header time across all datagrams
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let times = || self.by_tag.values().flatten().filter_map(|e| e.time);
        Some((times().min()?, times().max()?))
    }

    // =========================================================================
    // Sidecar files
    // =========================================================================

    /// Default sidecar path: `<data file>.pidx`
    pub fn sidecar_path(data_path: &Path) -> PathBuf {
        let mut name = data_path.as_os_str().to_owned();
        name.push(".");
        name.push(INDEX_EXTENSION);
        PathBuf::from(name)
    }

    pub fn save(&self, path: &Path) -> Result<(), ReaderError> {
        let file = File::create(path).map_err(|e| ReaderError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&INDEX_MAGIC)
            .and_then(|_| writer.write_all(&INDEX_VERSION.to_le_bytes()))
            .map_err(|e| ReaderError::io(path, e))?;
        bincode::serialize_into(&mut writer, &StoredIndex::from(self))?;
        writer.flush().map_err(|e| ReaderError::io(path, e))?;
        debug!("Saved index to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ReaderError> {
        let file = File::open(path).map_err(|e| ReaderError::io(path, e))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 6];
        reader.read_exact(&mut magic).map_err(|e| ReaderError::io(path, e))?;
        if magic[0..4] != INDEX_MAGIC {
            return Err(ReaderError::Index(format!("{}: bad magic bytes", path.display())));
        }
        let version = u16::from_le_bytes([magic[4], magic[5]]);
        if version != INDEX_VERSION {
            return Err(ReaderError::Index(format!(
                "{}: unsupported index version {}",
                path.display(),
                version
            )));
        }

        let stored: StoredIndex = bincode::deserialize_from(&mut reader)?;
        stored.try_into()
    }

    /// Load the sidecar when it matches the reader's file, otherwise build a
    /// fresh index and try to store it
    pub fn load_or_build(reader: &mut FileReader) -> Result<Self, ReaderError> {
        let sidecar = Self::sidecar_path(reader.path());
        if sidecar.exists() {
            match Self::load(&sidecar) {
                Ok(index) if index.format == reader.format() && index.file_len == reader.len() => {
                    debug!("Using index {}", sidecar.display());
                    return Ok(index);
                }
                Ok(_) => info!("Index {} is stale, rebuilding", sidecar.display()),
                Err(e) => warn!("Ignoring index {}: {}", sidecar.display(), e),
            }
        }

        let index = Self::build(reader)?;
        if let Err(e) = index.save(&sidecar) {
            warn!("Could not store index {}: {}", sidecar.display(), e);
        }
        Ok(index)
    }
}

fn ping_head(reader: &mut FileReader, frame: &Frame, layout: &PingLayout) -> Result<Option<PingHead>, ReaderError> {
    let record = match reader.decode_head(frame, layout.head)? {
        Ok(record) => record,
        Err(e) => {
            debug!("No ping statistics for {} at offset {}: {}", layout.tag, frame.offset, e);
            return Ok(None);
        }
    };
    let first = record.get_u64(layout.partition_number) == Some(1);
    Ok(Some(PingHead {
        first,
        partitions: record.get_u64(layout.partition_count).unwrap_or(1) as u16,
        beams: record.get_u64(layout.beams).unwrap_or(0),
        tx_sectors: record.get_u64(layout.tx_sectors).unwrap_or(0),
    }))
}

fn ping_stats(entries: &[IndexEntry], heads: &HashMap<u64, PingHead>) -> PingStats {
    let mut stats = PingStats::default();
    for (position, entry) in entries.iter().enumerate() {
        let Some(head) = heads.get(&entry.offset) else {
            continue;
        };
        if head.first {
            stats.split_start_index.push(position);
            stats.split_num_dgs.push(head.partitions);
            stats.max_beams = stats.max_beams.max(head.beams);
            stats.max_tx_sectors = stats.max_tx_sectors.max(head.tx_sectors);
        }
    }
    stats.number_of_pings = stats.split_start_index.len();
    stats.datagram_splits = stats.number_of_pings != entries.len();
    if !stats.datagram_splits {
        stats.split_start_index.clear();
        stats.split_num_dgs.clear();
    }
    stats
}

// Owned mirror of FileIndex with an encoding that survives bincode
#[derive(Serialize, Deserialize)]
struct StoredIndex {
    format: String,
    file_len: u64,
    types: Vec<(StoredTag, Vec<IndexEntry>)>,
    pings: Vec<(StoredTag, PingStats)>,
    corrupt_regions: u64,
    truncated_frames: u64,
}

#[derive(Serialize, Deserialize)]
enum StoredTag {
    Ascii([u8; 4]),
    Numeric(u32),
}

impl From<TypeTag> for StoredTag {
    fn from(tag: TypeTag) -> Self {
        match tag {
            TypeTag::Ascii(code) => StoredTag::Ascii(code),
            TypeTag::Numeric(id) => StoredTag::Numeric(id),
        }
    }
}

impl From<StoredTag> for TypeTag {
    fn from(tag: StoredTag) -> Self {
        match tag {
            StoredTag::Ascii(code) => TypeTag::ascii(code),
            StoredTag::Numeric(id) => TypeTag::numeric(id),
        }
    }
}

impl From<&FileIndex> for StoredIndex {
    fn from(index: &FileIndex) -> Self {
        Self {
            format: index.format.as_str().to_string(),
            file_len: index.file_len,
            types: index
                .by_tag
                .iter()
                .map(|(tag, entries)| ((*tag).into(), entries.clone()))
                .collect(),
            pings: index
                .pings
                .iter()
                .map(|(tag, stats)| ((*tag).into(), stats.clone()))
                .collect(),
            corrupt_regions: index.corrupt_regions,
            truncated_frames: index.truncated_frames,
        }
    }
}

impl TryFrom<StoredIndex> for FileIndex {
    type Error = ReaderError;

    fn try_from(stored: StoredIndex) -> Result<Self, Self::Error> {
        let format = FormatId::try_from(stored.format.as_str()).map_err(ReaderError::Index)?;
        Ok(Self {
            format,
            file_len: stored.file_len,
            by_tag: stored.types.into_iter().map(|(tag, entries)| (tag.into(), entries)).collect(),
            pings: stored.pings.into_iter().map(|(tag, stats)| (tag.into(), stats)).collect(),
            corrupt_regions: stored.corrupt_regions,
            truncated_frames: stored.truncated_frames,
        })
    }
}
