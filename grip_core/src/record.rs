//! Persisted result of one measurement cycle.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

use crate::error::ErrorCode;
use crate::fixed_point::Weight;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputData {
    pub weight_max: Option<f64>,
    pub weight_array: Vec<f64>,
    /// Mean of the accepted weights.
    pub weight_media: Option<f64>,
}

impl OutputData {
    pub fn from_weights(raw: &[Weight], max: Option<Weight>, avg: Option<Weight>) -> Self {
        Self {
            weight_max: max.map(Weight::to_f64),
            weight_array: raw.iter().map(|w| w.to_f64()).collect(),
            weight_media: avg.map(Weight::to_f64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordMessage {
    pub code: u16,
    pub message: String,
}

impl RecordMessage {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_u16(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub hardware: Value,
    pub input_data: Value,
    pub output_data: OutputData,
    pub messages: Vec<RecordMessage>,
}

/// Persistence collaborator invoked once per started cycle at teardown.
pub trait ResultStore {
    fn save(&mut self, record: &ResultRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

/// One pretty-printed JSON file per cycle under `dir`.
#[derive(Debug, Clone)]
pub struct FileResultStore {
    dir: PathBuf,
    seq: u32,
    last: Option<PathBuf>,
}

impl FileResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: 0,
            last: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the most recently written record.
    pub fn last_path(&self) -> Option<&Path> {
        self.last.as_deref()
    }
}

impl ResultStore for FileResultStore {
    fn save(&mut self, record: &ResultRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        fs::create_dir_all(&self.dir)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        self.seq = self.seq.wrapping_add(1);
        let path = self.dir.join(format!("result-{stamp}-{:04}.json", self.seq));
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &bytes)?;
        tracing::info!(path = %path.display(), "result record written");
        self.last = Some(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ResultRecord {
        ResultRecord {
            hardware: json!({"vendorId": 0x1a86}),
            input_data: json!({"cmd": "measureStart"}),
            output_data: OutputData::from_weights(
                &[Weight::from_units(6, 2)],
                Some(Weight::from_units(6, 2)),
                Some(Weight::from_units(6, 2)),
            ),
            messages: vec![RecordMessage::new(ErrorCode::OverallTimeout, "late")],
        }
    }

    #[test]
    fn record_uses_camel_case_keys() {
        let v = serde_json::to_value(record()).expect("serialize");
        assert_eq!(v["outputData"]["weightMax"], json!(0.06));
        assert_eq!(v["outputData"]["weightMedia"], json!(0.06));
        assert_eq!(v["inputData"]["cmd"], "measureStart");
        assert_eq!(v["messages"][0], json!({"code": 6, "message": "late"}));
    }

    #[test]
    fn file_store_writes_one_file_per_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = FileResultStore::new(dir.path().join("nested"));
        store.save(&record()).expect("save");
        store.save(&record()).expect("save");
        let files: Vec<_> = fs::read_dir(store.dir()).expect("dir").collect();
        assert_eq!(files.len(), 2);
        let last = store.last_path().expect("written");
        let text = fs::read_to_string(last).expect("read back");
        assert!(text.contains("weightArray"));
    }
}
