//! Decoded record trees

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// A decoded field value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bytes(Vec<u8>),
    Text(String),
}

impl Value {
    /// Integer value as u64, `None` for negatives, floats and byte runs
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v as u64),
            Value::U16(v) => Some(v as u64),
            Value::U32(v) => Some(v as u64),
            Value::U64(v) => Some(v),
            Value::I8(v) => u64::try_from(v).ok(),
            Value::I16(v) => u64::try_from(v).ok(),
            Value::I32(v) => u64::try_from(v).ok(),
            Value::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::U8(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::U64(v) => i64::try_from(v).ok(),
            Value::I8(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Any numeric value widened to f64
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            Value::U64(v) => Some(v as f64),
            Value::I64(v) => Some(v as f64),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::U8(_) => "u8",
            Value::I8(_) => "i8",
            Value::U16(_) => "u16",
            Value::I16(_) => "i16",
            Value::U32(_) => "u32",
            Value::I32(_) => "i32",
            Value::U64(_) => "u64",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "ascii",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::U8(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::U8(v) => serializer.serialize_u8(*v),
            Value::I8(v) => serializer.serialize_i8(*v),
            Value::U16(v) => serializer.serialize_u16(*v),
            Value::I16(v) => serializer.serialize_i16(*v),
            Value::U32(v) => serializer.serialize_u32(*v),
            Value::I32(v) => serializer.serialize_i32(*v),
            Value::U64(v) => serializer.serialize_u64(*v),
            Value::I64(v) => serializer.serialize_i64(*v),
            Value::F32(v) => serializer.serialize_f32(*v),
            Value::F64(v) => serializer.serialize_f64(*v),
            Value::Bytes(b) => {
                let mut seq = serializer.serialize_seq(Some(b.len()))?;
                for byte in b {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            Value::Text(s) => serializer.serialize_str(s),
        }
    }
}

/// A fully decoded record: ordered fields plus owned children.
///
/// Instances only come out of [`RecordFactory`](crate::factory::RecordFactory),
/// so every field the descriptor declares (and whose condition held) is
/// present with its declared type.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    name: &'static str,
    fields: Vec<(&'static str, Value)>,
    children: Vec<(&'static str, Record)>,
    /// Child names in schema order, flagged when the item repeats
    slots: Vec<(&'static str, bool)>,
    len: usize,
    tail: usize,
}

impl Record {
    pub(crate) fn empty(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
            children: Vec::new(),
            slots: Vec::new(),
            len: 0,
            tail: 0,
        }
    }

    pub(crate) fn push_field(&mut self, name: &'static str, value: Value) {
        self.fields.push((name, value));
    }

    /// Declare a child slot before its instances are pushed
    pub(crate) fn open_slot(&mut self, name: &'static str, repeated: bool) {
        if !self.slots.iter().any(|(n, _)| *n == name) {
            self.slots.push((name, repeated));
        }
    }

    pub(crate) fn push_child(&mut self, name: &'static str, child: Record) {
        self.open_slot(name, false);
        self.children.push((name, child));
    }

    pub(crate) fn finish(&mut self, len: usize, tail: usize) {
        self.len = len;
        self.tail = tail;
    }

    /// Descriptor name this record was built from
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Bytes the record occupies, including any skipped tail
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes at the end of the declared size that no item described
    pub fn tail_len(&self) -> usize {
        self.tail
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.fields.iter().map(|(n, v)| (*n, v))
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn children(&self) -> impl Iterator<Item = (&'static str, &Record)> {
        self.children.iter().map(|(n, r)| (*n, r))
    }

    /// First child with this name
    pub fn child(&self, name: &str) -> Option<&Record> {
        self.nth_child(name, 0)
    }

    /// Instance `index` of the children with this name
    pub fn nth_child(&self, name: &str, index: usize) -> Option<&Record> {
        self.children
            .iter()
            .filter(|(n, _)| *n == name)
            .nth(index)
            .map(|(_, r)| r)
    }

    /// All children with this name, in decode order
    pub fn children_named(&self, name: &'static str) -> impl Iterator<Item = &Record> + '_ {
        self.children
            .iter()
            .filter(move |(n, _)| *n == name)
            .map(|(_, r)| r)
    }

    /// Look up a value by dotted path, e.g. `ping_info.latitude_deg` or
    /// `samples[2].depth_m`. A bare child name selects its first instance.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut record = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                return record.field(segment);
            }
            let (name, index) = split_index(segment)?;
            record = record.nth_child(name, index)?;
        }
        None
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(Value::as_u64)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    /// Every field in the tree with its full path, in decode order.
    /// Repeated children are indexed as `name[i]`.
    pub fn flatten(&self) -> Vec<(String, &Value)> {
        let mut out = Vec::new();
        self.flatten_into("", &mut out);
        out
    }

    fn flatten_into<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Value)>) {
        for (name, value) in &self.fields {
            out.push((join(prefix, name), value));
        }
        for (name, repeated, group) in self.child_groups() {
            if repeated {
                for (i, child) in group.iter().enumerate() {
                    child.flatten_into(&format!("{}[{}]", join(prefix, name), i), out);
                }
            } else if let Some(child) = group.first() {
                child.flatten_into(&join(prefix, name), out);
            }
        }
    }

    /// Children grouped by slot, in schema order
    fn child_groups(&self) -> Vec<(&'static str, bool, Vec<&Record>)> {
        self.slots
            .iter()
            .map(|&(name, repeated)| (name, repeated, self.children_named(name).collect()))
            .collect()
    }

    /// Serialize the record tree to a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Split `name[3]` into (`name`, 3); a bare name is index 0
fn split_index(segment: &str) -> Option<(&str, usize)> {
    match segment.strip_suffix(']') {
        Some(rest) => {
            let (name, idx) = rest.split_once('[')?;
            Some((name, idx.parse().ok()?))
        }
        None => Some((segment, 0)),
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let groups = self.child_groups();
        let mut map = serializer.serialize_map(Some(self.fields.len() + groups.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        for (name, repeated, group) in groups {
            if repeated {
                map.serialize_entry(name, &group)?;
            } else if let Some(child) = group.first() {
                map.serialize_entry(name, child)?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let mut header = Record::empty("header");
        header.push_field("num_bytes", Value::U32(48));
        header.push_field("type", Value::Text("#SVP".into()));

        let mut root = Record::empty("SVP");
        root.push_child("header", header);
        root.push_field("num_samples", Value::U16(2));
        root.open_slot("samples", true);
        for depth in [1.5f32, 3.0] {
            let mut s = Record::empty("sample");
            s.push_field("depth_m", Value::F32(depth));
            root.push_child("samples", s);
        }
        root
    }

    #[test]
    fn test_dotted_lookup() {
        let r = sample();
        assert_eq!(r.get("header.num_bytes"), Some(&Value::U32(48)));
        assert_eq!(r.get_u64("num_samples"), Some(2));
        assert_eq!(r.get_f64("samples[1].depth_m"), Some(3.0));
        assert_eq!(r.get_f64("samples.depth_m"), Some(1.5));
        assert_eq!(r.get("samples[2].depth_m"), None);
        assert_eq!(r.get("missing.field"), None);
    }

    #[test]
    fn test_lookup_outlives_path() {
        let r = sample();
        let value = {
            let path = String::from("samples[1].depth_m");
            r.get(&path)
        };
        assert_eq!(value, Some(&Value::F32(3.0)));

        let child = {
            let name = String::from("header");
            r.child(&name)
        };
        assert_eq!(child.map(Record::name), Some("header"));
        assert_eq!(r.nth_child("samples", 1).and_then(|s| s.field("depth_m")), Some(&Value::F32(3.0)));
    }

    #[test]
    fn test_flatten() {
        let r = sample();
        let paths: Vec<String> = r.flatten().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                "num_samples",
                "header.num_bytes",
                "header.type",
                "samples[0].depth_m",
                "samples[1].depth_m",
            ]
        );
    }

    #[test]
    fn test_to_json() {
        let json = sample().to_json();
        assert_eq!(json["header"]["type"], "#SVP");
        assert_eq!(json["samples"][1]["depth_m"], 3.0);
        assert_eq!(json["num_samples"], 2);
    }

    #[test]
    fn test_single_repeated_child_stays_indexed() {
        let mut root = Record::empty("SVT");
        root.open_slot("samples", true);
        let mut s = Record::empty("sample");
        s.push_field("temp_c", Value::F32(4.0));
        root.push_child("samples", s);

        let paths: Vec<String> = root.flatten().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["samples[0].temp_c"]);
        assert!(root.to_json()["samples"].is_array());

        let mut empty = Record::empty("SVT");
        empty.open_slot("samples", true);
        assert_eq!(empty.to_json()["samples"], serde_json::json!([]));
    }

    #[test]
    fn test_value_coercions() {
        assert_eq!(Value::I16(-1).as_u64(), None);
        assert_eq!(Value::I16(-1).as_i64(), Some(-1));
        assert_eq!(Value::U8(7).as_f64(), Some(7.0));
        assert_eq!(Value::F32(1.0).as_u64(), None);
        assert_eq!(Value::Text("a".into()).as_str(), Some("a"));
        assert_eq!(Value::Bytes(vec![1, 2]).to_string(), "<2 bytes>");
    }
}
