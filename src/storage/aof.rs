use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use crate::core::error::Result;
use crate::query::types::SortOrder;

/// Serializable stand-in for a sort argument inside a log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

/// One mutating operation, normalized so it serializes: derived
/// partition functions are resolved to literal names before a record is
/// queued. Lines take the shape `{"op":"<name>","instructions":{...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "instructions")]
pub enum AofRecord {
    #[serde(rename = "create")]
    Create {
        collection: String,
        index: String,
        data: Value,
    },
    #[serde(rename = "update")]
    Update {
        collection: String,
        #[serde(rename = "_id")]
        id: u64,
        data: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<String>,
    },
    #[serde(rename = "destroy")]
    Destroy {
        collection: String,
        #[serde(rename = "_id")]
        id: u64,
    },
    #[serde(rename = "createMany")]
    CreateMany {
        collection: String,
        index: String,
        data: Vec<Value>,
    },
    #[serde(rename = "dropCollection")]
    DropCollection { collection: String },
    #[serde(rename = "dropIndex")]
    DropIndex { collection: String, index: String },
    #[serde(rename = "rewriteCollection")]
    RewriteCollection {
        collection: String,
        index: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sort: Option<SortSpec>,
    },
    #[serde(rename = "ensureIndex")]
    EnsureIndex { collection: String, field: String },
}

/// Append-only log of mutating operations. Opened for append only at
/// commit time, under the transaction lock.
#[derive(Debug, Clone)]
pub struct AofLog {
    path: PathBuf,
}

impl AofLog {
    pub fn new(path: PathBuf) -> Self {
        AofLog { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Append one line per record. Nothing is written for an empty batch.
    pub fn append(&self, records: &[AofRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// All lines in order, each either a parsed record or the raw text
    /// that failed to parse. Replay decides what to do with failures.
    pub fn read_lines(&self) -> Result<Vec<std::result::Result<AofRecord, String>>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AofRecord>(&line) {
                Ok(record) => lines.push(Ok(record)),
                Err(_) => lines.push(Err(line)),
            }
        }
        Ok(lines)
    }

    /// Drop the log, e.g. after a compaction materialized its effects.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn line_format_is_op_plus_instructions() {
        let record = AofRecord::Create {
            collection: "users".to_string(),
            index: "default".to_string(),
            data: json!({"name": "Bob"}),
        };
        let line = serde_json::to_string(&record).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["op"], json!("create"));
        assert_eq!(value["instructions"]["collection"], json!("users"));
        assert_eq!(value["instructions"]["data"]["name"], json!("Bob"));
    }

    #[test]
    fn update_record_uses_underscore_id() {
        let record = AofRecord::Update {
            collection: "users".to_string(),
            id: 4,
            data: json!({"name": "X"}),
            index: None,
        };
        let value: Value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["op"], json!("update"));
        assert_eq!(value["instructions"]["_id"], json!(4));
        assert!(value["instructions"].get("index").is_none());
    }

    #[test]
    fn append_then_read_preserves_order_and_flags_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AofLog::new(dir.path().join("log.aof"));
        log.append(&[
            AofRecord::DropCollection { collection: "a".to_string() },
            AofRecord::Destroy { collection: "b".to_string(), id: 7 },
        ])
        .unwrap();

        // A corrupt line must not poison its neighbours.
        {
            let mut file = OpenOptions::new().append(true).open(dir.path().join("log.aof")).unwrap();
            writeln!(file, "{{not json").unwrap();
        }
        log.append(&[AofRecord::EnsureIndex {
            collection: "b".to_string(),
            field: "email".to_string(),
        }])
        .unwrap();

        let lines = log.read_lines().unwrap();
        assert_eq!(lines.len(), 4);
        assert!(matches!(lines[0], Ok(AofRecord::DropCollection { .. })));
        assert!(matches!(lines[1], Ok(AofRecord::Destroy { .. })));
        assert!(lines[2].is_err());
        assert!(matches!(lines[3], Ok(AofRecord::EnsureIndex { .. })));
    }

    #[test]
    fn missing_log_reads_empty_and_removes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let log = AofLog::new(dir.path().join("log.aof"));
        assert!(log.read_lines().unwrap().is_empty());
        log.remove().unwrap();
    }
}
