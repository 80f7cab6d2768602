//! Sequential datagram file reader
//!
//! [`FileReader`] composes the stream demarcator and the record factory
//! behind a forward-only `next()`. Per-frame failures come back as
//! [`ReadItem::Skip`] with the cursor already past the frame; only
//! stream-level faults are errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use parsely_core::{
    ByteSource, CancelFlag, DemarcateError, Demarcation, Demarcator, Descriptor, FormatId, Frame, FrameStatus,
    ParseError, Record, RecordFactory, Registry, SourceError, TypeTag,
};
use serde::Serialize;

use crate::config::{ReaderConfig, UnknownTypePolicy};
use crate::error::ReaderError;
use crate::index::{FileIndex, IndexEntry};
use crate::source::FileSource;

static BUILTIN: Lazy<Arc<Registry>> = Lazy::new(|| Arc::new(Registry::with_builtin()));

/// Registry holding every catalog compiled into this build
pub fn builtin_registry() -> Arc<Registry> {
    BUILTIN.clone()
}

/// Bytes read from the start of a file when sniffing its format
const SNIFF_LEN: u64 = 256;

// =============================================================================
// Read results
// =============================================================================

/// A decoded datagram with the frame it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedDatagram {
    pub format: FormatId,
    /// Catalog name of the datagram type
    pub name: &'static str,
    pub frame: Frame,
    pub record: Record,
}

/// A frame the reader stepped over, with the reason
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub frame: Frame,
    pub reason: ParseError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadItem {
    Record(ParsedDatagram),
    Skip(Skipped),
    EndOfStream,
}

impl ReadItem {
    pub fn is_end(&self) -> bool {
        matches!(self, ReadItem::EndOfStream)
    }

    pub fn frame(&self) -> Option<&Frame> {
        match self {
            ReadItem::Record(d) => Some(&d.frame),
            ReadItem::Skip(s) => Some(&s.frame),
            ReadItem::EndOfStream => None,
        }
    }

    pub fn datagram(&self) -> Option<&ParsedDatagram> {
        match self {
            ReadItem::Record(d) => Some(d),
            _ => None,
        }
    }
}

/// Position and counters of one reader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Cursor {
    pub offset: u64,
    pub end_of_stream: bool,
    /// Frames handed out successfully
    pub yielded: u64,
    /// Frames and corrupt regions stepped over
    pub skipped: u64,
}

// =============================================================================
// FileReader
// =============================================================================

pub struct FileReader {
    path: PathBuf,
    format: FormatId,
    len: u64,
    registry: Arc<Registry>,
    config: ReaderConfig,
    factory: RecordFactory,
    demarcator: Demarcator,
    /// `None` once closed
    source: Option<FileSource>,
    cursor: Cursor,
    cancel: CancelFlag,
    /// Set by an unrecoverable corruption: (offset, window)
    terminal: Option<(u64, u64)>,
    frame_buf: Vec<u8>,
}

impl FileReader {
    /// Open `path` as `format` with the built-in catalogs and default
    /// configuration
    pub fn open(path: impl AsRef<Path>, format: FormatId) -> Result<Self, ReaderError> {
        Self::open_with(path, format, builtin_registry(), ReaderConfig::default())
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        format: FormatId,
        registry: Arc<Registry>,
        config: ReaderConfig,
    ) -> Result<Self, ReaderError> {
        config.validate()?;
        let catalog = registry.catalog(format)?;
        let path = path.as_ref();
        let source = FileSource::open(path)?;
        let len = source.len();

        info!("Opened {} as {} ({} bytes)", path.display(), format, len);

        Ok(Self {
            path: path.to_path_buf(),
            format,
            len,
            factory: config.factory(),
            demarcator: Demarcator::new(catalog.layout).with_resync_window(config.resync_window),
            registry,
            config,
            source: Some(source),
            cursor: Cursor::default(),
            cancel: CancelFlag::new(),
            terminal: None,
            frame_buf: Vec::new(),
        })
    }

    /// Open with the format taken from the extension, or from the first
    /// frame header when the extension says nothing
    pub fn open_auto(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        Self::open_auto_with(path, builtin_registry(), ReaderConfig::default())
    }

    pub fn open_auto_with(
        path: impl AsRef<Path>,
        registry: Arc<Registry>,
        config: ReaderConfig,
    ) -> Result<Self, ReaderError> {
        let path = path.as_ref();
        let format = detect_format(path, &registry)?;
        Self::open_with(path, format, registry, config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FormatId {
        self.format
    }

    /// File size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Flag that interrupts a resynchronisation scan from another thread
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// Advance past one frame.
    ///
    /// After a [`ReaderError::StreamCorruption`] every call returns the same
    /// error. After [`ReaderError::Cancelled`] the reader is closed.
    pub fn next(&mut self) -> Result<ReadItem, ReaderError> {
        if let Some((offset, window)) = self.terminal {
            return Err(ReaderError::StreamCorruption { offset, window });
        }
        let Some(source) = self.source.as_mut() else {
            return Err(ReaderError::Closed);
        };

        match self.demarcator.next_frame(source, self.cursor.offset, &self.cancel) {
            Ok(Demarcation::EndOfStream) => {
                if !self.cursor.end_of_stream {
                    debug!("End of {} at offset {}", self.path.display(), self.cursor.offset);
                }
                self.cursor.end_of_stream = true;
                Ok(ReadItem::EndOfStream)
            }
            Ok(Demarcation::Corrupt { frame, cause }) => {
                warn!(
                    "Skipping {} corrupt bytes at offset {} in {}: {}",
                    frame.length,
                    frame.offset,
                    self.path.display(),
                    cause
                );
                Ok(self.skip(frame, cause))
            }
            Ok(Demarcation::Frame(frame)) => match frame.status {
                FrameStatus::Truncated { available } => {
                    let reason = ParseError::Truncated {
                        context: format!("frame {}", tag_name(frame.tag)),
                        offset: available as usize,
                        needed: frame.length as usize,
                        available: available as usize,
                    };
                    warn!("{} ends inside a frame: {}", self.path.display(), reason);
                    Ok(self.skip(frame, reason))
                }
                _ => self.decode(frame),
            },
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Advance past one frame without decoding it.
    ///
    /// Corrupt regions and truncated frames are returned too, flagged by
    /// their status.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ReaderError> {
        if let Some((offset, window)) = self.terminal {
            return Err(ReaderError::StreamCorruption { offset, window });
        }
        let Some(source) = self.source.as_mut() else {
            return Err(ReaderError::Closed);
        };

        match self.demarcator.next_frame(source, self.cursor.offset, &self.cancel) {
            Ok(Demarcation::EndOfStream) => {
                self.cursor.end_of_stream = true;
                Ok(None)
            }
            Ok(Demarcation::Corrupt { frame, cause }) => {
                debug!("Corrupt region at offset {}: {}", frame.offset, cause);
                self.cursor.offset = frame.end();
                self.cursor.skipped += 1;
                Ok(Some(frame))
            }
            Ok(Demarcation::Frame(frame)) => {
                self.cursor.offset = frame.end();
                if frame.is_valid() {
                    self.cursor.yielded += 1;
                } else {
                    self.cursor.skipped += 1;
                }
                Ok(Some(frame))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Reposition the cursor. Nothing is validated until the next read.
    pub fn seek(&mut self, offset: u64) -> Result<(), ReaderError> {
        if self.source.is_none() {
            return Err(ReaderError::Closed);
        }
        self.cursor.offset = offset;
        self.cursor.end_of_stream = false;
        Ok(())
    }

    pub fn rewind(&mut self) -> Result<(), ReaderError> {
        self.seek(0)
    }

    /// Release the file handle. Later reads fail with
    /// [`ReaderError::Closed`]; closing twice is harmless.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            info!(
                "Closed {}: {} datagrams, {} skipped",
                self.path.display(),
                self.cursor.yielded,
                self.cursor.skipped
            );
        }
    }

    /// Iterate until the end of the stream or a terminal error
    pub fn datagrams(&mut self) -> Datagrams<'_> {
        Datagrams {
            reader: self,
            done: false,
        }
    }

    /// Seek to an indexed frame and read it
    pub fn read_entry(&mut self, entry: &IndexEntry) -> Result<ReadItem, ReaderError> {
        self.seek(entry.offset)?;
        self.next()
    }

    /// Read every indexed datagram of one type in chronological order.
    /// The cursor is left after the last one read.
    pub fn read_all_of_type(&mut self, index: &FileIndex, tag: TypeTag) -> Result<Vec<ReadItem>, ReaderError> {
        if index.format() != self.format || index.file_len() != self.len {
            return Err(ReaderError::Index(format!(
                "index for a {} file of {} bytes does not match {}",
                index.format(),
                index.file_len(),
                self.path.display()
            )));
        }
        index
            .entries(tag)
            .iter()
            .map(|entry| self.read_entry(entry))
            .collect()
    }

    /// Decode the leading part of `frame` with an open-sized descriptor.
    /// The cursor does not move.
    pub(crate) fn decode_head(
        &mut self,
        frame: &Frame,
        head: &'static Descriptor,
    ) -> Result<Result<Record, ParseError>, ReaderError> {
        let Some(source) = self.source.as_mut() else {
            return Err(ReaderError::Closed);
        };
        self.frame_buf.resize(frame.length as usize, 0);
        source
            .read_at(frame.offset, &mut self.frame_buf)
            .map_err(|e| source_error(&self.path, e))?;
        Ok(self.factory.build(head, &self.frame_buf, 0).map(|(record, _)| record))
    }

    fn decode(&mut self, frame: Frame) -> Result<ReadItem, ReaderError> {
        let Some(tag) = frame.tag else {
            return Ok(self.skip(frame, ParseError::InvalidHeader("frame without type tag".into())));
        };

        let entry = match self.registry.entry(self.format, tag) {
            Ok(entry) => entry,
            Err(reason) => {
                if self.config.unknown_types == UnknownTypePolicy::Fatal {
                    let offset = frame.offset;
                    self.skip(frame, reason);
                    return Err(ReaderError::UnknownType {
                        format: self.format,
                        tag,
                        offset,
                    });
                }
                debug!("Skipping unknown {} datagram {} at offset {}", self.format, tag, frame.offset);
                return Ok(self.skip(frame, reason));
            }
        };

        if (frame.length as usize) < entry.min_header_len {
            let reason = ParseError::Truncated {
                context: entry.name.to_string(),
                offset: 0,
                needed: entry.min_header_len,
                available: frame.length as usize,
            };
            warn!("Datagram at offset {} too short: {}", frame.offset, reason);
            return Ok(self.skip(frame, reason));
        }

        // Checksummed frames were read whole by the demarcator already
        let bytes: &[u8] = match self.demarcator.frame_bytes(&frame) {
            Some(bytes) => bytes,
            None => {
                let Some(source) = self.source.as_mut() else {
                    return Err(ReaderError::Closed);
                };
                self.frame_buf.resize(frame.length as usize, 0);
                if let Err(e) = source.read_at(frame.offset, &mut self.frame_buf) {
                    return Err(source_error(&self.path, e));
                }
                &self.frame_buf
            }
        };

        match self.factory.build_frame(entry.descriptor, bytes) {
            Ok(record) => {
                debug!(
                    "{} {} at offset {} ({} bytes)",
                    self.format, entry.name, frame.offset, frame.length
                );
                self.cursor.offset = frame.end();
                self.cursor.yielded += 1;
                Ok(ReadItem::Record(ParsedDatagram {
                    format: self.format,
                    name: entry.name,
                    frame,
                    record,
                }))
            }
            Err(reason) => {
                warn!("Failed to decode {} at offset {}: {}", entry.name, frame.offset, reason);
                Ok(self.skip(frame, reason))
            }
        }
    }

    fn skip(&mut self, frame: Frame, reason: ParseError) -> ReadItem {
        self.cursor.offset = frame.end();
        self.cursor.skipped += 1;
        ReadItem::Skip(Skipped { frame, reason })
    }

    fn fail(&mut self, e: DemarcateError) -> ReaderError {
        match e {
            DemarcateError::StreamCorruption { offset, window } => {
                error!(
                    "{}: no valid frame within {} bytes of offset {}",
                    self.path.display(),
                    window,
                    offset
                );
                self.terminal = Some((offset, window));
                ReaderError::StreamCorruption { offset, window }
            }
            DemarcateError::Cancelled { offset } => {
                warn!("Reading {} cancelled at offset {}", self.path.display(), offset);
                self.close();
                ReaderError::Cancelled { offset }
            }
            DemarcateError::Source(e) => source_error(&self.path, e),
        }
    }
}

impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("cursor", &self.cursor)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Iterator over the items of a reader, ending at the end of the stream
pub struct Datagrams<'a> {
    reader: &'a mut FileReader,
    done: bool,
}

impl Iterator for Datagrams<'_> {
    type Item = Result<ReadItem, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next() {
            Ok(ReadItem::EndOfStream) => {
                self.done = true;
                None
            }
            Ok(item) => Some(Ok(item)),
            Err(e) => {
                // Only the fatal unknown-type policy leaves the stream usable
                self.done = !matches!(e, ReaderError::UnknownType { .. });
                Some(Err(e))
            }
        }
    }
}

/// Pick the format of a file: extension first, then header sniffing
pub fn detect_format(path: &Path, registry: &Registry) -> Result<FormatId, ReaderError> {
    let by_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(FormatId::from_extension)
        .filter(|f| registry.catalog(*f).is_ok());
    if let Some(format) = by_extension {
        return Ok(format);
    }

    let mut source = FileSource::open(path)?;
    let head_len = source.len().min(SNIFF_LEN) as usize;
    let head = source
        .read_vec(0, head_len)
        .map_err(|e| source_error(path, e))?;

    match registry.detect(&head).as_slice() {
        [format] => {
            debug!("Detected {} from the first header of {}", format, path.display());
            Ok(*format)
        }
        _ => Err(ReaderError::FormatDetection {
            path: path.to_path_buf(),
        }),
    }
}

fn source_error(path: &Path, e: SourceError) -> ReaderError {
    ReaderError::io(path, std::io::Error::other(e.to_string()))
}

fn tag_name(tag: Option<TypeTag>) -> String {
    tag.map(|t| t.to_string()).unwrap_or_else(|| "?".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{frame, init_logging, ping, registry, write_file, PING_LEN};

    fn open(data: &[u8]) -> (tempfile::TempDir, FileReader) {
        open_config(data, ReaderConfig::default())
    }

    fn open_config(data: &[u8], config: ReaderConfig) -> (tempfile::TempDir, FileReader) {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "line.bin", data);
        let reader = FileReader::open_with(&path, FormatId::S7k, registry(), config).unwrap();
        (dir, reader)
    }

    fn three_frames() -> Vec<u8> {
        let mut data = ping(1, 100);
        data.extend(frame(0xFFFF, 101, &[0u8; 4]));
        data.extend(ping(3, 102));
        data
    }

    fn ping_value(item: &ReadItem) -> Option<u64> {
        item.datagram().and_then(|d| d.record.get_u64("ping"))
    }

    #[test]
    fn test_three_frame_scenario() {
        let data = three_frames();
        let (_dir, mut reader) = open(&data);

        let first = reader.next().unwrap();
        assert_eq!(ping_value(&first), Some(1));
        let d = first.datagram().unwrap();
        assert_eq!(d.name, "PING");
        assert_eq!(d.frame.offset, 0);
        assert_eq!(d.frame.length, PING_LEN as u64);
        assert_eq!(d.frame.tag, Some(TypeTag::numeric(1)));
        assert_eq!(d.frame.time.unwrap().timestamp(), 100);
        assert_eq!(d.record.len(), PING_LEN);

        match reader.next().unwrap() {
            ReadItem::Skip(s) => {
                assert_eq!(s.frame.offset, 20);
                assert_eq!(s.frame.tag, Some(TypeTag::numeric(0xFFFF)));
                assert!(matches!(s.reason, ParseError::UnknownType { .. }));
            }
            other => panic!("expected skip, got {:?}", other),
        }

        assert_eq!(ping_value(&reader.next().unwrap()), Some(3));
        assert_eq!(reader.next().unwrap(), ReadItem::EndOfStream);
        assert_eq!(reader.next().unwrap(), ReadItem::EndOfStream);

        let cursor = reader.cursor();
        assert_eq!(cursor.offset, data.len() as u64);
        assert!(cursor.end_of_stream);
        assert_eq!(cursor.yielded, 2);
        assert_eq!(cursor.skipped, 1);
    }

    #[test]
    fn test_seek_to_recorded_offset() {
        let (_dir, mut reader) = open(&three_frames());
        let items: Vec<_> = reader.datagrams().map(|i| i.unwrap()).collect();
        let third = items[2].clone();

        reader.seek(third.frame().unwrap().offset).unwrap();
        assert_eq!(reader.next().unwrap(), third);
        assert!(reader.next().unwrap().is_end());
    }

    #[test]
    fn test_reads_are_idempotent() {
        let data = three_frames();
        let (_dir, mut reader) = open(&data);
        let first: Vec<_> = reader.datagrams().map(|i| i.unwrap()).collect();
        reader.rewind().unwrap();
        let second: Vec<_> = reader.datagrams().map(|i| i.unwrap()).collect();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_two_opens_read_the_same() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "line.bin", &three_frames());
        let read = || {
            let mut reader = FileReader::open_with(&path, FormatId::S7k, registry(), ReaderConfig::default()).unwrap();
            reader.datagrams().map(|i| i.unwrap()).collect::<Vec<_>>()
        };
        let first = read();
        assert_eq!(first.len(), 3);
        assert_eq!(first, read());
    }

    #[test]
    fn test_byte_order_from_config() {
        let config = ReaderConfig {
            byte_order: Some(parsely_core::Endian::Big),
            ..Default::default()
        };
        let (_dir, mut reader) = open_config(&ping(1, 0), config);
        let item = reader.next().unwrap();
        assert_eq!(ping_value(&item), Some(0x0100_0000));
        assert_eq!(item.datagram().unwrap().record.get_u64("length"), Some(0x1400_0000));
    }

    #[test]
    fn test_empty_file() {
        let (_dir, mut reader) = open(&[]);
        assert!(reader.is_empty());
        assert_eq!(reader.next().unwrap(), ReadItem::EndOfStream);
    }

    #[test]
    fn test_truncated_header_is_clean_end() {
        let mut data = ping(1, 0);
        data.extend_from_slice(&[0x14, 0, 0, 0, 1]);
        let (_dir, mut reader) = open(&data);
        assert_eq!(ping_value(&reader.next().unwrap()), Some(1));
        assert_eq!(reader.next().unwrap(), ReadItem::EndOfStream);
    }

    #[test]
    fn test_truncated_payload_is_skipped() {
        let mut data = ping(1, 0);
        let mut second = ping(2, 0);
        second.truncate(15);
        data.extend(second);
        let (_dir, mut reader) = open(&data);

        assert_eq!(ping_value(&reader.next().unwrap()), Some(1));
        match reader.next().unwrap() {
            ReadItem::Skip(s) => {
                assert_eq!(s.frame.status, FrameStatus::Truncated { available: 15 });
                assert!(matches!(s.reason, ParseError::Truncated { needed: 20, .. }));
            }
            other => panic!("expected skip, got {:?}", other),
        }
        assert_eq!(reader.next().unwrap(), ReadItem::EndOfStream);
        assert_eq!(reader.cursor().offset, data.len() as u64);
    }

    #[test]
    fn test_resync_after_corruption() {
        let mut data = ping(1, 0);
        data.extend_from_slice(&[0xAB; 9]);
        data.extend(ping(2, 0));
        data.extend(ping(3, 0));
        let (_dir, mut reader) = open(&data);

        let items: Vec<_> = reader.datagrams().map(|i| i.unwrap()).collect();
        assert_eq!(items.len(), 4);
        assert_eq!(ping_value(&items[0]), Some(1));
        match &items[1] {
            ReadItem::Skip(s) => {
                assert_eq!(s.frame.offset, 20);
                assert_eq!(s.frame.length, 9);
                assert_eq!(s.frame.status, FrameStatus::Corrupt);
            }
            other => panic!("expected skip, got {:?}", other),
        }
        assert_eq!(ping_value(&items[2]), Some(2));
        assert_eq!(ping_value(&items[3]), Some(3));
    }

    #[test]
    fn test_corruption_beyond_window_is_terminal() {
        let mut data = ping(1, 0);
        data.extend_from_slice(&[0xAB; 200]);
        data.extend(ping(2, 0));
        let config = ReaderConfig {
            resync_window: 64,
            ..Default::default()
        };
        let (_dir, mut reader) = open_config(&data, config);

        assert_eq!(ping_value(&reader.next().unwrap()), Some(1));
        for _ in 0..2 {
            match reader.next() {
                Err(ReaderError::StreamCorruption { offset, window }) => {
                    assert_eq!(offset, 20);
                    assert_eq!(window, 64);
                }
                other => panic!("expected corruption, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_decode_failure_keeps_stream_in_sync() {
        // A PING frame with four extra payload bytes: demarcated fine, but
        // the trailer check lands on payload
        let mut data = frame(1, 0, &[7, 0, 0, 0, 9, 9, 9, 9]);
        data.extend(ping(2, 0));
        let (_dir, mut reader) = open(&data);

        match reader.next().unwrap() {
            ReadItem::Skip(s) => {
                assert_eq!(s.frame.length, 24);
                assert_eq!(s.reason.kind(), "field_validation");
            }
            other => panic!("expected skip, got {:?}", other),
        }
        assert_eq!(reader.cursor().offset, 24);
        assert_eq!(ping_value(&reader.next().unwrap()), Some(2));
    }

    #[test]
    fn test_fatal_unknown_types() {
        let config = ReaderConfig {
            unknown_types: UnknownTypePolicy::Fatal,
            ..Default::default()
        };
        let (_dir, mut reader) = open_config(&three_frames(), config);

        assert!(reader.next().unwrap().datagram().is_some());
        match reader.next() {
            Err(ReaderError::UnknownType { tag, offset, .. }) => {
                assert_eq!(tag, TypeTag::numeric(0xFFFF));
                assert_eq!(offset, 20);
            }
            other => panic!("expected unknown type, got {:?}", other),
        }
        assert_eq!(ping_value(&reader.next().unwrap()), Some(3));
    }

    #[test]
    fn test_close() {
        let (_dir, mut reader) = open(&three_frames());
        reader.close();
        reader.close();
        assert!(reader.is_closed());
        assert!(matches!(reader.next(), Err(ReaderError::Closed)));
        assert!(matches!(reader.seek(0), Err(ReaderError::Closed)));
    }

    #[test]
    fn test_cancel_closes_reader() {
        let (_dir, mut reader) = open(&[0xAB; 300]);
        reader.cancel_flag().cancel();
        assert!(matches!(reader.next(), Err(ReaderError::Cancelled { offset: 1 })));
        assert!(matches!(reader.next(), Err(ReaderError::Closed)));
    }

    #[test]
    fn test_next_frame_skips_decoding() {
        let (_dir, mut reader) = open(&three_frames());
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            frames.push(frame);
        }
        let offsets: Vec<_> = frames.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 20, 40]);
        assert!(frames.iter().all(Frame::is_valid));
    }

    #[test]
    fn test_open_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.s7k");
        assert!(matches!(
            FileReader::open_with(&missing, FormatId::S7k, registry(), ReaderConfig::default()),
            Err(ReaderError::Io { .. })
        ));

        let path = write_file(&dir, "line.bin", &ping(1, 0));
        assert!(matches!(
            FileReader::open_with(&path, FormatId::Kmall, registry(), ReaderConfig::default()),
            Err(ReaderError::Registry(_))
        ));
    }

    #[test]
    fn test_detect_format_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "capture.bin", &three_frames());
        let reader = FileReader::open_auto_with(&path, registry(), ReaderConfig::default()).unwrap();
        assert_eq!(reader.format(), FormatId::S7k);

        let junk = write_file(&dir, "junk.bin", &[0xAB; 64]);
        assert!(matches!(
            detect_format(&junk, &registry()),
            Err(ReaderError::FormatDetection { .. })
        ));
    }

    #[cfg(feature = "kmall")]
    #[test]
    fn test_builtin_kmall_by_extension() {
        let mut body = Vec::new();
        for v in [8u16, 1, 1, 0] {
            body.extend_from_slice(&v.to_le_bytes());
        }
        body.extend_from_slice(&1_600_000_000u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0.5f32.to_le_bytes());
        body.extend_from_slice(&59.9f64.to_le_bytes());
        body.extend_from_slice(&10.7f64.to_le_bytes());
        body.extend_from_slice(&3.0f32.to_le_bytes());
        body.extend_from_slice(&90.0f32.to_le_bytes());
        body.extend_from_slice(&42.0f32.to_le_bytes());

        let total = (20 + body.len() + 4) as u32;
        let mut dgm = total.to_le_bytes().to_vec();
        dgm.extend_from_slice(b"#SPO");
        dgm.extend_from_slice(&[1, 0]);
        dgm.extend_from_slice(&2040u16.to_le_bytes());
        dgm.extend_from_slice(&1_600_000_000u32.to_le_bytes());
        dgm.extend_from_slice(&0u32.to_le_bytes());
        dgm.extend_from_slice(&body);
        dgm.extend_from_slice(&total.to_le_bytes());

        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "0001_line.kmall", &dgm);
        let mut reader = FileReader::open_auto(&path).unwrap();
        assert_eq!(reader.format(), FormatId::Kmall);

        let item = reader.next().unwrap();
        let d = item.datagram().unwrap();
        assert_eq!(d.name, "SPO");
        assert_eq!(d.record.get_f64("sensor_data.corrected_lon_deg"), Some(10.7));
        assert!(reader.next().unwrap().is_end());
    }

    /// S7K heading record (type 1013) with a trailing checksum
    #[cfg(feature = "s7k")]
    fn heading_record(heading_rad: f32) -> Vec<u8> {
        use parsely_core::catalogs::s7k::{FrameFlags, DRF_LEN, SYNC_PATTERN};

        let total = (DRF_LEN + 4 + 4) as u32;
        let mut b = vec![0u8; DRF_LEN];
        b[0..2].copy_from_slice(&5u16.to_le_bytes());
        b[2..4].copy_from_slice(&60u16.to_le_bytes());
        b[4..8].copy_from_slice(&SYNC_PATTERN);
        b[8..12].copy_from_slice(&total.to_le_bytes());
        b[20..22].copy_from_slice(&2021u16.to_le_bytes());
        b[22..24].copy_from_slice(&100u16.to_le_bytes());
        b[32..36].copy_from_slice(&1013u32.to_le_bytes());
        b[48..50].copy_from_slice(&FrameFlags::CHECKSUM.bits().to_le_bytes());
        b.extend_from_slice(&heading_rad.to_le_bytes());
        let sum = parsely_core::frame::checksum(&b);
        b.extend_from_slice(&sum.to_le_bytes());
        b
    }

    #[cfg(feature = "s7k")]
    #[test]
    fn test_s7k_checksum_mismatch_skips_one_record() {
        let mut bad = heading_record(1.0);
        bad[64] ^= 0x01;
        let record_len = bad.len() as u64;
        let mut data = heading_record(0.5);
        data.extend(bad);
        data.extend(heading_record(1.5));

        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "line.s7k", &data);
        let mut reader = FileReader::open(&path, FormatId::S7k).unwrap();

        let heading = |item: &ReadItem| item.datagram().and_then(|d| d.record.get_f64("rth.heading_rad"));
        let first = reader.next().unwrap();
        assert_eq!(heading(&first), Some(0.5));
        assert!(first.datagram().unwrap().record.get_u64("checksum").is_some());

        match reader.next().unwrap() {
            ReadItem::Skip(s) => {
                assert_eq!((s.frame.offset, s.frame.length), (record_len, record_len));
                assert_eq!(s.reason.kind(), "bookend_mismatch");
            }
            other => panic!("expected skip, got {:?}", other),
        }

        let third = reader.next().unwrap();
        assert_eq!(heading(&third), Some(1.5));
        assert_eq!(third.frame().unwrap().offset, 2 * record_len);
        assert!(reader.next().unwrap().is_end());
        assert_eq!((reader.cursor().yielded, reader.cursor().skipped), (2, 1));
    }
}
