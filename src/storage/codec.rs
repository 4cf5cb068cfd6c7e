use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{Map, Value};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Collection, Document, SecondaryIndex, Stats};

const STATS_KEY: &str = "__stats";
const ID_MAP_KEY: &str = "__id_map";
const SECONDARY_INDEXES_KEY: &str = "__secondary_indexes";

/// Streaming reader/writer for structured documents, with an optional
/// gzip stage and atomic swap-on-write.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    compression: bool,
}

impl Codec {
    pub fn new(compression: bool) -> Self {
        Codec { compression }
    }

    /// Read a document from `path`. A missing file is not an error.
    pub fn read_value(&self, path: &Path) -> Result<Option<Value>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let reader = BufReader::new(file);
        let value = if self.compression {
            serde_json::from_reader(GzDecoder::new(reader))?
        } else {
            serde_json::from_reader(reader)?
        };
        Ok(Some(value))
    }

    /// Stream `value` to a sibling `.tmp`, then rename over `path`.
    pub fn write_value(&self, path: &Path, value: &Value) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = tmp_path(path);
        {
            let file = File::create(&tmp)?;
            let writer = BufWriter::new(file);
            if self.compression {
                let mut encoder = GzEncoder::new(writer, Compression::default());
                serde_json::to_writer(&mut encoder, value)?;
                encoder.finish()?.flush()?;
            } else {
                let mut writer = writer;
                serde_json::to_writer(&mut writer, value)?;
                writer.flush()?;
            }
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    std::path::PathBuf::from(name)
}

/// The reserved-key disk form of a collection: meta keys first, then one
/// array per partition.
pub fn collection_to_disk(collection: &Collection) -> Value {
    let mut map = meta_to_disk_map(collection);
    for (name, docs) in &collection.partitions {
        map.insert(name.clone(), partition_to_disk(docs));
    }
    Value::Object(map)
}

pub fn collection_from_disk(value: Value) -> Result<Collection> {
    let Value::Object(map) = value else {
        return Err(disk_shape_error("collection document must be an object"));
    };
    let mut collection = meta_from_disk_map(&map)?;
    for (key, entry) in map {
        if key.starts_with("__") {
            continue;
        }
        collection.partitions.insert(key, partition_from_disk(entry)?);
    }
    Ok(collection)
}

/// Sharded-mode meta document: only the three reserved keys.
pub fn meta_to_disk(collection: &Collection) -> Value {
    Value::Object(meta_to_disk_map(collection))
}

pub fn meta_from_disk(value: Value) -> Result<Collection> {
    let Value::Object(map) = value else {
        return Err(disk_shape_error("meta document must be an object"));
    };
    meta_from_disk_map(&map)
}

/// One partition's shard file is the bare document array.
pub fn partition_to_disk(docs: &[Document]) -> Value {
    Value::Array(docs.iter().cloned().map(Value::Object).collect())
}

pub fn partition_from_disk(value: Value) -> Result<Vec<Document>> {
    let Value::Array(items) = value else {
        return Err(disk_shape_error("partition must be an array"));
    };
    let mut docs = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Object(doc) => docs.push(doc),
            _ => return Err(disk_shape_error("partition entries must be objects")),
        }
    }
    Ok(docs)
}

/// Single-file mode database document: collection name -> collection.
pub fn database_to_disk(collections: &HashMap<String, Collection>) -> Value {
    let mut map = Map::new();
    for (name, collection) in collections {
        map.insert(name.clone(), collection_to_disk(collection));
    }
    Value::Object(map)
}

pub fn database_from_disk(value: Value) -> Result<HashMap<String, Collection>> {
    let Value::Object(map) = value else {
        return Err(disk_shape_error("database document must be an object"));
    };
    let mut collections = HashMap::new();
    for (name, entry) in map {
        collections.insert(name, collection_from_disk(entry)?);
    }
    Ok(collections)
}

fn meta_to_disk_map(collection: &Collection) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(
        STATS_KEY.to_string(),
        serde_json::json!({
            "inserted": collection.stats.inserted,
            "total": collection.stats.total,
        }),
    );

    let mut id_map = Map::new();
    for (id, partition) in &collection.id_map {
        id_map.insert(id.to_string(), Value::String(partition.clone()));
    }
    map.insert(ID_MAP_KEY.to_string(), Value::Object(id_map));

    let mut indexes = Map::new();
    for (field, buckets) in &collection.secondary_indexes {
        let mut field_map = Map::new();
        for (key, ids) in buckets {
            field_map.insert(
                key.clone(),
                Value::Array(ids.iter().map(|id| Value::from(*id)).collect()),
            );
        }
        indexes.insert(field.clone(), Value::Object(field_map));
    }
    map.insert(SECONDARY_INDEXES_KEY.to_string(), Value::Object(indexes));
    map
}

fn meta_from_disk_map(map: &Map<String, Value>) -> Result<Collection> {
    let mut collection = Collection::new();

    if let Some(stats) = map.get(STATS_KEY) {
        collection.stats = Stats {
            inserted: stats.get("inserted").and_then(Value::as_u64).unwrap_or(0),
            total: stats.get("total").and_then(Value::as_u64).unwrap_or(0),
        };
    }

    if let Some(Value::Object(entries)) = map.get(ID_MAP_KEY) {
        for (id, partition) in entries {
            let id = id
                .parse::<u64>()
                .map_err(|_| disk_shape_error("id map keys must be integers"))?;
            let Value::String(partition) = partition else {
                return Err(disk_shape_error("id map values must be partition names"));
            };
            collection.id_map.insert(id, partition.clone());
        }
    }

    if let Some(Value::Object(fields)) = map.get(SECONDARY_INDEXES_KEY) {
        for (field, buckets) in fields {
            let Value::Object(buckets) = buckets else {
                return Err(disk_shape_error("secondary index must be an object"));
            };
            let mut index = SecondaryIndex::new();
            for (key, ids) in buckets {
                let Value::Array(ids) = ids else {
                    return Err(disk_shape_error("secondary index bucket must be an array"));
                };
                let ids = ids.iter().filter_map(Value::as_u64).collect();
                index.insert(key.clone(), ids);
            }
            collection.secondary_indexes.insert(field.clone(), index);
        }
    }

    Ok(collection)
}

fn disk_shape_error(context: &str) -> Error {
    Error::new(ErrorKind::Parse, context.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_collection() -> Collection {
        let mut collection = Collection::new();
        collection.stats = Stats { inserted: 3, total: 2 };
        collection.id_map.insert(1, "default".to_string());
        collection.id_map.insert(3, "other".to_string());
        let mut bucket = SecondaryIndex::new();
        bucket.insert("alice@example.com".to_string(), vec![1]);
        collection.secondary_indexes.insert("email".to_string(), bucket);
        collection.partitions.insert(
            "default".to_string(),
            vec![json!({"_id": 1, "email": "alice@example.com"})
                .as_object()
                .unwrap()
                .clone()],
        );
        collection.partitions.insert(
            "other".to_string(),
            vec![json!({"_id": 3, "name": "C"}).as_object().unwrap().clone()],
        );
        collection
    }

    #[test]
    fn collection_round_trips_through_disk_form() {
        let collection = sample_collection();
        let disk = collection_to_disk(&collection);
        assert!(disk.get(STATS_KEY).is_some());
        assert_eq!(disk[STATS_KEY]["inserted"], json!(3));
        assert_eq!(disk[ID_MAP_KEY]["1"], json!("default"));
        assert_eq!(disk[SECONDARY_INDEXES_KEY]["email"]["alice@example.com"], json!([1]));

        let back = collection_from_disk(disk).unwrap();
        assert_eq!(back.stats, collection.stats);
        assert_eq!(back.id_map, collection.id_map);
        assert_eq!(back.secondary_indexes, collection.secondary_indexes);
        assert_eq!(back.partitions, collection.partitions);
    }

    #[test]
    fn meta_form_excludes_partitions() {
        let collection = sample_collection();
        let meta = meta_to_disk(&collection);
        assert!(meta.get("default").is_none());
        let back = meta_from_disk(meta).unwrap();
        assert!(back.partitions.is_empty());
        assert_eq!(back.stats, collection.stats);
    }

    #[test]
    fn file_round_trip_plain_and_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let value = json!({"people": {"__stats": {"inserted": 1, "total": 1}}});
        for (codec, name) in [(Codec::new(false), "plain.json"), (Codec::new(true), "zip.json.gz")] {
            let path = dir.path().join(name);
            codec.write_value(&path, &value).unwrap();
            let back = codec.read_value(&path).unwrap().unwrap();
            assert_eq!(back, value);
            assert!(!tmp_path(&path).exists());
        }
    }

    #[test]
    fn reading_a_missing_file_yields_none() {
        let codec = Codec::new(false);
        assert!(codec.read_value(Path::new("/nonexistent/file.json")).unwrap().is_none());
    }
}
