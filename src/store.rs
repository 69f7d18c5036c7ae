//! Persistence of named, shaped arrays with key-value attributes.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::array::DenseArray;
use crate::error::{Result, RiskError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F64,
    /// Structured rows, e.g. event loss records.
    Record,
}

/// Incremental, resizable array store.
///
/// Rows run along the first axis of a dataset; `append` grows that axis.
pub trait ArrayStore {
    fn create(&mut self, name: &str, dtype: DType, shape: &[usize]) -> Result<()>;
    fn append(&mut self, name: &str, rows: Vec<Value>) -> Result<()>;
    /// Set the length of the first axis, dropping rows beyond it.
    fn resize(&mut self, name: &str, rows: usize) -> Result<()>;
    fn set_attr(&mut self, name: &str, key: &str, value: Value) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Append serializable records as rows.
pub fn append_records<T: Serialize>(store: &mut dyn ArrayStore, name: &str, records: &[T]) -> Result<()> {
    let rows = records.iter().map(serde_json::to_value).collect::<serde_json::Result<Vec<_>>>()?;
    store.append(name, rows)
}

/// Create a dataset holding `array`, one nested row per first-axis entry.
pub fn save_array(store: &mut dyn ArrayStore, name: &str, array: &DenseArray) -> Result<()> {
    let shape = array.shape();
    store.create(name, DType::F64, shape)?;
    let rows = array.rows().map(|row| nest(&shape[1..], row)).collect();
    store.append(name, rows)
}

fn nest(shape: &[usize], data: &[f64]) -> Value {
    match shape {
        [] => data.first().copied().map_or(Value::Null, Value::from),
        [_] => Value::from(data.to_vec()),
        [n, inner @ ..] => {
            let step = inner.iter().product::<usize>().max(1);
            Value::Array(data.chunks(step).take(*n).map(|c| nest(inner, c)).collect())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub attrs: BTreeMap<String, Value>,
    #[serde(skip)]
    pub rows: Vec<Value>,
}

/// Datasets kept in memory, readable back in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    datasets: BTreeMap<String, Dataset>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn attr(&self, name: &str, key: &str) -> Option<&Value> {
        self.get(name).and_then(|d| d.attrs.get(key))
    }

    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let dataset = self.dataset(name)?;
        dataset
            .rows
            .iter()
            .map(|row| serde_json::from_value(row.clone()).map_err(RiskError::from))
            .collect()
    }

    fn dataset(&self, name: &str) -> Result<&Dataset> {
        self.datasets.get(name).ok_or_else(|| RiskError::Store(format!("no dataset {name}")))
    }

    fn dataset_mut(&mut self, name: &str) -> Result<&mut Dataset> {
        self.datasets.get_mut(name).ok_or_else(|| RiskError::Store(format!("no dataset {name}")))
    }
}

impl ArrayStore for MemoryStore {
    fn create(&mut self, name: &str, dtype: DType, shape: &[usize]) -> Result<()> {
        if self.datasets.contains_key(name) {
            return Err(RiskError::Store(format!("dataset {name} already exists")));
        }
        let dataset = Dataset { dtype, shape: shape.to_vec(), attrs: BTreeMap::new(), rows: Vec::new() };
        self.datasets.insert(name.to_string(), dataset);
        Ok(())
    }

    fn append(&mut self, name: &str, rows: Vec<Value>) -> Result<()> {
        let dataset = self.dataset_mut(name)?;
        dataset.rows.extend(rows);
        let len = dataset.rows.len();
        match dataset.shape.first_mut() {
            Some(n) => *n = (*n).max(len),
            None => dataset.shape.push(len),
        }
        Ok(())
    }

    fn resize(&mut self, name: &str, rows: usize) -> Result<()> {
        let dataset = self.dataset_mut(name)?;
        dataset.rows.truncate(rows);
        match dataset.shape.first_mut() {
            Some(n) => *n = rows,
            None => dataset.shape.push(rows),
        }
        Ok(())
    }

    fn set_attr(&mut self, name: &str, key: &str, value: Value) -> Result<()> {
        self.dataset_mut(name)?.attrs.insert(key.to_string(), value);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One `<name>.ndjson` file per dataset holding one JSON row per line,
/// written as rows are appended. Dtype, shape and attributes are only final
/// at the end and go to `<name>.meta.json` on flush.
#[derive(Debug)]
pub struct NdjsonStore {
    dir: PathBuf,
    streams: BTreeMap<String, RowStream>,
}

#[derive(Debug)]
struct RowStream {
    meta: Dataset,
    rows: usize,
    writer: BufWriter<File>,
}

impl NdjsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(NdjsonStore { dir, streams: BTreeMap::new() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn rows_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.ndjson"))
    }

    fn stream(&mut self, name: &str) -> Result<&mut RowStream> {
        self.streams.get_mut(name).ok_or_else(|| RiskError::Store(format!("no dataset {name}")))
    }
}

impl ArrayStore for NdjsonStore {
    fn create(&mut self, name: &str, dtype: DType, shape: &[usize]) -> Result<()> {
        if self.streams.contains_key(name) {
            return Err(RiskError::Store(format!("dataset {name} already exists")));
        }
        let writer = BufWriter::new(File::create(self.rows_path(name))?);
        let meta = Dataset { dtype, shape: shape.to_vec(), attrs: BTreeMap::new(), rows: Vec::new() };
        self.streams.insert(name.to_string(), RowStream { meta, rows: 0, writer });
        Ok(())
    }

    fn append(&mut self, name: &str, rows: Vec<Value>) -> Result<()> {
        let stream = self.stream(name)?;
        for row in &rows {
            serde_json::to_writer(&mut stream.writer, row)?;
            writeln!(stream.writer)?;
        }
        stream.rows += rows.len();
        let len = stream.rows;
        match stream.meta.shape.first_mut() {
            Some(n) => *n = (*n).max(len),
            None => stream.meta.shape.push(len),
        }
        Ok(())
    }

    /// Shrinking rewrites the rows file up to the new length.
    fn resize(&mut self, name: &str, rows: usize) -> Result<()> {
        let path = self.rows_path(name);
        let stream = self.stream(name)?;
        if rows < stream.rows {
            stream.writer.flush()?;
            let text = std::fs::read_to_string(&path)?;
            let mut writer = BufWriter::new(File::create(&path)?);
            for line in text.lines().take(rows) {
                writeln!(writer, "{line}")?;
            }
            stream.writer = writer;
            stream.rows = rows;
        }
        match stream.meta.shape.first_mut() {
            Some(n) => *n = rows,
            None => stream.meta.shape.push(rows),
        }
        Ok(())
    }

    fn set_attr(&mut self, name: &str, key: &str, value: Value) -> Result<()> {
        self.stream(name)?.meta.attrs.insert(key.to_string(), value);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for (name, stream) in &mut self.streams {
            stream.writer.flush()?;
            let path = self.dir.join(format!("{name}.meta.json"));
            let mut writer = BufWriter::new(File::create(&path)?);
            serde_json::to_writer(&mut writer, &stream.meta)?;
            writeln!(writer)?;
            writer.flush()?;
            debug!(dataset = name.as_str(), rows = stream.rows, path = %path.display(), "flushed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn append_grows_first_axis() {
        let mut store = MemoryStore::new();
        store.create("elt", DType::Record, &[0]).unwrap();
        append_records(&mut store, "elt", &[(1u64, 2.5f64), (2, 0.5)]).unwrap();
        append_records(&mut store, "elt", &[(3u64, 1.0f64)]).unwrap();
        assert_eq!(store.get("elt").unwrap().shape, vec![3]);
        let rows: Vec<(u64, f64)> = store.read("elt").unwrap();
        assert_eq!(rows, vec![(1, 2.5), (2, 0.5), (3, 1.0)]);
    }

    #[test]
    fn saved_array_rows_are_nested() {
        let mut store = MemoryStore::new();
        let array = DenseArray::from_vec(&[2, 2, 2], (0..8).map(f64::from).collect());
        save_array(&mut store, "curves", &array).unwrap();
        let dataset = store.get("curves").unwrap();
        assert_eq!(dataset.shape, vec![2, 2, 2]);
        assert_eq!(dataset.rows[1], json!([[4.0, 5.0], [6.0, 7.0]]));
    }

    #[test]
    fn empty_first_axis_keeps_shape() {
        let mut store = MemoryStore::new();
        save_array(&mut store, "empty", &DenseArray::zeros(&[0, 3])).unwrap();
        assert_eq!(store.get("empty").unwrap().shape, vec![0, 3]);
    }

    #[test]
    fn unknown_dataset_is_a_store_error() {
        let mut store = MemoryStore::new();
        assert!(matches!(store.append("missing", vec![]), Err(RiskError::Store(_))));
        store.create("x", DType::F64, &[1]).unwrap();
        assert!(store.create("x", DType::F64, &[1]).is_err());
    }

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ebrisk-store-{tag}-{}", std::process::id()))
    }

    #[test]
    fn ndjson_rows_stream_and_metadata_lands_on_flush() {
        let dir = temp_dir("stream");
        let mut store = NdjsonStore::new(&dir).unwrap();
        store.create("losses_by_event", DType::Record, &[0]).unwrap();
        store.append("losses_by_event", vec![json!({"eid": 1}), json!({"eid": 4})]).unwrap();
        store.set_attr("losses_by_event", "units", json!(["EUR"])).unwrap();
        assert!(!dir.join("losses_by_event.meta.json").exists());
        store.flush().unwrap();

        let text = std::fs::read_to_string(dir.join("losses_by_event.ndjson")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![r#"{"eid":1}"#, r#"{"eid":4}"#]);

        let meta: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("losses_by_event.meta.json")).unwrap()).unwrap();
        assert_eq!(meta["dtype"], json!("record"));
        assert_eq!(meta["shape"], json!([2]));
        assert_eq!(meta["attrs"]["units"], json!(["EUR"]));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn ndjson_resize_drops_trailing_rows() {
        let dir = temp_dir("resize");
        let mut store = NdjsonStore::new(&dir).unwrap();
        store.create("elt", DType::Record, &[0]).unwrap();
        append_records(&mut store, "elt", &[1u64, 2, 3]).unwrap();
        store.resize("elt", 1).unwrap();
        append_records(&mut store, "elt", &[9u64]).unwrap();
        store.flush().unwrap();

        let text = std::fs::read_to_string(store.dir().join("elt.ndjson")).unwrap();
        assert_eq!(text.lines().collect::<Vec<_>>(), vec!["1", "9"]);
        let meta: Value = serde_json::from_str(&std::fs::read_to_string(dir.join("elt.meta.json")).unwrap()).unwrap();
        assert_eq!(meta["shape"], json!([2]));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
