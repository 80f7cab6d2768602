//! Format converter interface and the in-memory columnar sink
//!
//! A converter receives decoded datagrams in file order. [`ColumnarSink`]
//! lays them out as one table per datagram type with one column per
//! flattened field path, which is enough to export to JSON or to feed a
//! real columnar writer.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use log::{debug, info};
use parsely_core::{Frame, Record, TypeTag};
use serde::Serialize;
use serde_json::Value as Json;

use crate::error::ConvertError;
use crate::reader::{FileReader, ReadItem};

/// Consumer of decoded datagrams
pub trait FormatConverter {
    /// Called once per decoded datagram, in file order
    fn append(&mut self, frame: &Frame, record: &Record) -> Result<(), ConvertError>;

    /// Called once after the last datagram
    fn finish(&mut self) -> Result<(), ConvertError> {
        Ok(())
    }
}

/// Outcome of [`convert`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConvertSummary {
    pub records: u64,
    pub skipped: u64,
    /// Skip count per error kind
    pub skip_reasons: BTreeMap<&'static str, u64>,
}

/// Drive `reader` to the end of the stream, feeding every datagram to
/// `converter`
pub fn convert<C: FormatConverter + ?Sized>(
    reader: &mut FileReader,
    converter: &mut C,
) -> Result<ConvertSummary, ConvertError> {
    let mut summary = ConvertSummary::default();

    for item in reader.datagrams() {
        match item? {
            ReadItem::Record(d) => {
                converter.append(&d.frame, &d.record)?;
                summary.records += 1;
            }
            ReadItem::Skip(s) => {
                summary.skipped += 1;
                *summary.skip_reasons.entry(s.reason.kind()).or_default() += 1;
            }
            ReadItem::EndOfStream => break,
        }
    }
    converter.finish()?;

    info!(
        "Converted {}: {} records, {} skipped",
        reader.path().display(),
        summary.records,
        summary.skipped
    );
    Ok(summary)
}

// =============================================================================
// Columnar sink
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Json>,
}

/// All datagrams of one type
#[derive(Debug, Clone, Serialize)]
pub struct Table {
    name: &'static str,
    rows: usize,
    columns: Vec<Column>,
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl Table {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: 0,
            columns: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&[Json]> {
        self.positions.get(name).map(|&i| self.columns[i].values.as_slice())
    }

    fn push_row(&mut self, frame: &Frame, record: &Record) -> Result<(), ConvertError> {
        let timestamp = frame.time.map(|t| Json::String(t.to_rfc3339())).unwrap_or(Json::Null);
        self.set("offset", Json::from(frame.offset));
        self.set("timestamp", timestamp);
        for (path, value) in record.flatten() {
            self.set(&path, serde_json::to_value(value)?);
        }

        // Columns this row did not mention
        self.rows += 1;
        for column in &mut self.columns {
            column.values.resize(self.rows, Json::Null);
        }
        Ok(())
    }

    fn set(&mut self, name: &str, value: Json) {
        let index = match self.positions.get(name) {
            Some(&i) => i,
            None => {
                debug!("New column {}.{}", self.name, name);
                self.columns.push(Column {
                    name: name.to_string(),
                    values: vec![Json::Null; self.rows],
                });
                self.positions.insert(name.to_string(), self.columns.len() - 1);
                self.columns.len() - 1
            }
        };
        let values = &mut self.columns[index].values;
        if values.len() == self.rows {
            values.push(value);
        }
    }
}

/// Reference converter keeping one [`Table`] per datagram type in memory
#[derive(Debug, Default)]
pub struct ColumnarSink {
    tables: BTreeMap<TypeTag, Table>,
}

impl ColumnarSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> impl Iterator<Item = (TypeTag, &Table)> {
        self.tables.iter().map(|(tag, table)| (*tag, table))
    }

    pub fn table(&self, tag: TypeTag) -> Option<&Table> {
        self.tables.get(&tag)
    }

    /// `{ "<tag>": { "name", "rows", "columns": [{ "name", "values" }] } }`
    pub fn to_json(&self) -> Result<Json, ConvertError> {
        let mut out = serde_json::Map::new();
        for (tag, table) in &self.tables {
            out.insert(tag.to_string(), serde_json::to_value(table)?);
        }
        Ok(Json::Object(out))
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ConvertError> {
        let file = File::create(path).map_err(|source| ConvertError::Output {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.to_json()?)?;
        info!("Wrote {} tables to {}", self.tables.len(), path.display());
        Ok(())
    }
}

impl FormatConverter for ColumnarSink {
    fn append(&mut self, frame: &Frame, record: &Record) -> Result<(), ConvertError> {
        let Some(tag) = frame.tag else {
            return Ok(());
        };
        self.tables
            .entry(tag)
            .or_insert_with(|| Table::new(record.name()))
            .push_row(frame, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderConfig;
    use crate::testutil::{frame, init_logging, ping, registry, write_file};
    use parsely_core::schema::{field, repeated, Primitive, SizeRule};
    use parsely_core::{Descriptor, FormatId, FrameStatus, RecordFactory};
    use serde_json::json;

    static BEAM: Descriptor = Descriptor::new("beam", SizeRule::Open, &[field("depth", Primitive::F32)]);

    static SWATH: Descriptor = Descriptor::new(
        "swath",
        SizeRule::Open,
        &[field("count", Primitive::U8), repeated("beams", &BEAM, "count")],
    );

    fn swath(depths: &[f32]) -> Record {
        let mut bytes = vec![depths.len() as u8];
        for d in depths {
            bytes.extend_from_slice(&d.to_le_bytes());
        }
        RecordFactory::new().build(&SWATH, &bytes, 0).unwrap().0
    }

    fn frame_at(offset: u64) -> Frame {
        Frame {
            offset,
            length: 9,
            tag: Some(TypeTag::numeric(5)),
            time: None,
            status: FrameStatus::Valid,
        }
    }

    #[test]
    fn test_columns_are_backfilled() {
        let mut sink = ColumnarSink::new();
        sink.append(&frame_at(0), &swath(&[10.0])).unwrap();
        sink.append(&frame_at(9), &swath(&[11.0, 12.0])).unwrap();

        let table = sink.table(TypeTag::numeric(5)).unwrap();
        assert_eq!(table.name(), "swath");
        assert_eq!(table.rows(), 2);
        assert_eq!(
            table.column_names().collect::<Vec<_>>(),
            vec!["offset", "timestamp", "count", "beams[0].depth", "beams[1].depth"]
        );
        assert_eq!(table.column("offset").unwrap(), &[json!(0), json!(9)]);
        assert_eq!(table.column("beams[0].depth").unwrap(), &[json!(10.0), json!(11.0)]);
        assert_eq!(table.column("beams[1].depth").unwrap(), &[Json::Null, json!(12.0)]);
        assert_eq!(table.column("timestamp").unwrap(), &[Json::Null, Json::Null]);
    }

    #[test]
    fn test_convert_file() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let mut data = ping(1, 100);
        data.extend(frame(0xFFFF, 101, &[0u8; 4]));
        data.extend(ping(3, 102));
        let path = write_file(&dir, "line.bin", &data);
        let mut reader = FileReader::open_with(&path, FormatId::S7k, registry(), ReaderConfig::default()).unwrap();

        let mut sink = ColumnarSink::new();
        let summary = convert(&mut reader, &mut sink).unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.skip_reasons.get("unknown_type"), Some(&1));

        let table = sink.table(TypeTag::numeric(1)).unwrap();
        assert_eq!(table.column("ping").unwrap(), &[json!(1), json!(3)]);
        assert_eq!(
            table.column("timestamp").unwrap()[0],
            json!("1970-01-01T00:01:40+00:00")
        );

        let out = dir.path().join("line.json");
        sink.write_json(&out).unwrap();
        let written: Json = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written["1"]["name"], json!("PING"));
        assert_eq!(written["1"]["rows"], json!(2));
    }
}
