use std::sync::{Arc, Mutex};
use serde_json::{json, Value};
use tempfile::tempdir;
use sencillo::core::config::Config;
use sencillo::core::database::Database;
use sencillo::core::types::{stringify, PartitionSpec, Stats};
use sencillo::query::types::FindQuery;

fn seed(db: &Database) {
    db.transaction(|tx| {
        tx.create_many(
            "people",
            &PartitionSpec::default(),
            vec![
                json!({"name": "A", "age": 24}),
                json!({"name": "B", "age": 25}),
            ],
        )?;
        Ok(())
    })
    .unwrap();
}

fn assert_seeded(db: &Database) {
    db.transaction(|tx| {
        assert_eq!(tx.stats("people")?, Stats { inserted: 2, total: 2 });
        let docs = tx.find_many("people", FindQuery::default())?;
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].get("name"), Some(&json!("A")));
        assert_eq!(docs[1].get("name"), Some(&json!("B")));
        Ok(())
    })
    .unwrap();
}

#[test]
fn single_file_round_trip() {
    let dir = tempdir().unwrap();
    let config = Config {
        file: dir.path().join("store.json"),
        ..Config::default()
    };
    {
        let db = Database::open(config.clone()).unwrap();
        seed(&db);
    }
    assert!(dir.path().join("store.json").exists());

    // The base document is the plain collection-name -> collection map.
    let raw: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("store.json")).unwrap())
            .unwrap();
    assert_eq!(raw["people"]["__stats"]["inserted"], json!(2));
    assert_eq!(raw["people"]["default"][0]["_id"], json!(1));

    let db = Database::open(config).unwrap();
    assert_seeded(&db);
}

#[test]
fn folder_round_trip() {
    let dir = tempdir().unwrap();
    let config = Config {
        folder: Some(dir.path().to_path_buf()),
        ..Config::default()
    };
    {
        let db = Database::open(config.clone()).unwrap();
        seed(&db);
    }
    assert!(dir.path().join("people.json").exists());
    let db = Database::open(config).unwrap();
    assert_seeded(&db);
}

#[test]
fn sharded_layout_and_round_trip() {
    let dir = tempdir().unwrap();
    let config = Config {
        folder: Some(dir.path().to_path_buf()),
        sharding: true,
        ..Config::default()
    };
    let by_age = PartitionSpec::derived(|doc| {
        doc.get("age").map(stringify).unwrap_or_default()
    });
    {
        let db = Database::open(config.clone()).unwrap();
        db.transaction(|tx| {
            tx.create_many(
                "people",
                &by_age,
                vec![
                    json!({"name": "A", "age": 24}),
                    json!({"name": "B", "age": 25}),
                ],
            )?;
            Ok(())
        })
        .unwrap();
    }
    assert!(dir.path().join("people").join("meta.json").exists());
    assert!(dir.path().join("people").join("shard_24.json").exists());
    assert!(dir.path().join("people").join("shard_25.json").exists());

    // Meta holds only the reserved keys; shards hold bare arrays.
    let meta: Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("people").join("meta.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(meta["__stats"], json!({"inserted": 2, "total": 2}));
    assert!(meta.get("24").is_none());
    let shard: Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("people").join("shard_24.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(shard, json!([{"_id": 1, "name": "A", "age": 24}]));

    let db = Database::open(config).unwrap();
    assert_seeded(&db);
}

#[test]
fn compressed_folder_round_trip() {
    let dir = tempdir().unwrap();
    let config = Config {
        folder: Some(dir.path().to_path_buf()),
        compression: true,
        ..Config::default()
    };
    {
        let db = Database::open(config.clone()).unwrap();
        seed(&db);
    }
    assert!(dir.path().join("people.json.gz").exists());
    assert!(!dir.path().join("people.json").exists());
    let db = Database::open(config).unwrap();
    assert_seeded(&db);
}

#[test]
fn compressed_single_file_round_trip() {
    let dir = tempdir().unwrap();
    let config = Config {
        file: dir.path().join("store.json"),
        compression: true,
        ..Config::default()
    };
    {
        let db = Database::open(config.clone()).unwrap();
        seed(&db);
    }
    assert!(dir.path().join("store.json.gz").exists());
    let db = Database::open(config).unwrap();
    assert_seeded(&db);
}

#[test]
fn compressed_sharded_round_trip() {
    let dir = tempdir().unwrap();
    let config = Config {
        folder: Some(dir.path().to_path_buf()),
        sharding: true,
        compression: true,
        ..Config::default()
    };
    {
        let db = Database::open(config.clone()).unwrap();
        seed(&db);
    }
    assert!(dir.path().join("people").join("shard_default.json.gz").exists());
    let db = Database::open(config).unwrap();
    assert_seeded(&db);
}

#[test]
fn hooks_replace_single_file_io() {
    let stored: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
    let dir = tempdir().unwrap();

    let write_side = stored.clone();
    let config = Config {
        file: dir.path().join("never-written.json"),
        save_hook: Some(Arc::new(move |text: &str| {
            *write_side.lock().unwrap() = text.to_string();
            Ok(())
        })),
        ..Config::default()
    };
    {
        let db = Database::open(config).unwrap();
        seed(&db);
    }
    assert!(!dir.path().join("never-written.json").exists());
    assert!(stored.lock().unwrap().contains("\"__stats\""));

    let read_side = stored.clone();
    let config = Config {
        file: dir.path().join("never-read.json"),
        load_hook: Some(Arc::new(move || Ok(read_side.lock().unwrap().clone()))),
        ..Config::default()
    };
    let db = Database::open(config).unwrap();
    assert_seeded(&db);
}

#[test]
fn sharding_without_folder_is_a_configuration_error() {
    let config = Config {
        sharding: true,
        ..Config::default()
    };
    let err = Database::open(config).unwrap_err();
    assert_eq!(err.kind, sencillo::core::error::ErrorKind::Configuration);
}
