use std::collections::{HashMap, HashSet};
use std::fs;
use log::warn;
use parking_lot::FairMutex;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::transaction::Tx;
use crate::core::types::Collection;
use crate::memory::residency::{ResidencyLru, UnitKey};
use crate::storage::aof::{AofLog, AofRecord};
use crate::storage::codec::{self, Codec};
use crate::storage::layout::{Mode, StorageLayout};

/// Everything guarded by the transaction lock: the resident store, the
/// dirty set, the residency tracker and the pending-op buffer.
#[derive(Debug)]
pub(crate) struct Inner {
    pub collections: HashMap<String, Collection>,
    pub dirty: HashSet<UnitKey>,
    pub lru: ResidencyLru,
    pub pending: Vec<AofRecord>,
    pub loaded: bool,
}

/// Embedded document store. All reads and writes run inside
/// [`Database::transaction`]; the fair lock serializes transactions in
/// arrival order.
#[derive(Debug)]
pub struct Database {
    pub(crate) config: Config,
    pub(crate) layout: StorageLayout,
    pub(crate) codec: Codec,
    pub(crate) aof: AofLog,
    pub(crate) state: FairMutex<Inner>,
}

impl Database {
    pub fn open(config: Config) -> Result<Self> {
        let layout = StorageLayout::from_config(&config)?;
        let codec = Codec::new(config.compression);
        let aof = AofLog::new(layout.aof_path());
        // The residency tracker only governs folder and sharded modes.
        let cache_size = match layout.mode() {
            Mode::SingleFile => 0,
            Mode::Folder | Mode::Sharded => config.max_cache_size,
        };
        let db = Database {
            config,
            layout,
            codec,
            aof,
            state: FairMutex::new(Inner {
                collections: HashMap::new(),
                dirty: HashSet::new(),
                lru: ResidencyLru::new(cache_size),
                pending: Vec::new(),
                loaded: false,
            }),
        };
        {
            let mut inner = db.state.lock();
            if db.layout.mode() == Mode::SingleFile {
                db.load_single_file(&mut inner)?;
            }
            inner.loaded = true;
        }
        Ok(db)
    }

    /// Write the full current database through the normal save path,
    /// then delete the append-only log.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.state.lock();
        if !inner.loaded {
            return Err(not_loaded());
        }
        self.save_full(&inner)?;
        self.aof.remove()?;
        inner.dirty.clear();
        Ok(())
    }

    /// Read the base document (through the load hook when configured),
    /// then replay the append-only log over it.
    pub(crate) fn load_single_file(&self, inner: &mut Inner) -> Result<()> {
        let value = match &self.config.load_hook {
            Some(hook) => {
                let text = hook()?;
                if text.trim().is_empty() {
                    None
                } else {
                    Some(serde_json::from_str(&text)?)
                }
            }
            None => self.codec.read_value(&self.layout.database_path())?,
        };
        inner.collections = match value {
            Some(value) => codec::database_from_disk(value)?,
            None => HashMap::new(),
        };
        if self.config.aof {
            self.replay_aof(inner)?;
        }
        Ok(())
    }

    /// Replay the log line by line. A line that fails to parse or to
    /// apply is logged and skipped; it never aborts the load.
    fn replay_aof(&self, inner: &mut Inner) -> Result<()> {
        for (number, line) in self.aof.read_lines()?.into_iter().enumerate() {
            match line {
                Ok(record) => {
                    let mut tx = Tx::for_replay(self, inner);
                    if let Err(err) = tx.apply_record(&record) {
                        warn!("aof replay: skipping line {}: {}", number + 1, err);
                    }
                }
                Err(raw) => {
                    warn!("aof replay: skipping unparsable line {}: {}", number + 1, raw);
                }
            }
        }
        inner.pending.clear();
        inner.dirty.clear();
        Ok(())
    }

    /// Single-file save: the whole database document, through the save
    /// hook when configured.
    pub(crate) fn save_database(&self, collections: &HashMap<String, Collection>) -> Result<()> {
        let value = codec::database_to_disk(collections);
        match &self.config.save_hook {
            Some(hook) => hook(&serde_json::to_string(&value)?),
            None => self.codec.write_value(&self.layout.database_path(), &value),
        }
    }

    /// Persist one resident unit. A unit that is no longer resident has
    /// nothing left to say and is skipped.
    pub(crate) fn save_unit(
        &self,
        collections: &HashMap<String, Collection>,
        key: &UnitKey,
    ) -> Result<()> {
        match key {
            UnitKey::Database => self.save_database(collections),
            UnitKey::Collection(name) => match collections.get(name) {
                Some(collection) => self.codec.write_value(
                    &self.layout.collection_path(name),
                    &codec::collection_to_disk(collection),
                ),
                None => Ok(()),
            },
            UnitKey::Meta(name) => match collections.get(name) {
                Some(collection) => self
                    .codec
                    .write_value(&self.layout.meta_path(name), &codec::meta_to_disk(collection)),
                None => Ok(()),
            },
            UnitKey::Shard(name, partition) => {
                let docs = collections
                    .get(name)
                    .and_then(|collection| collection.partitions.get(partition));
                match docs {
                    Some(docs) => self.codec.write_value(
                        &self.layout.shard_path(name, partition),
                        &codec::partition_to_disk(docs),
                    ),
                    None => Ok(()),
                }
            }
        }
    }

    /// Save every resident unit, whatever its dirtiness. Used by compact.
    pub(crate) fn save_full(&self, inner: &Inner) -> Result<()> {
        match self.layout.mode() {
            Mode::SingleFile => self.save_database(&inner.collections),
            Mode::Folder => {
                for name in inner.collections.keys() {
                    self.save_unit(&inner.collections, &UnitKey::Collection(name.clone()))?;
                }
                Ok(())
            }
            Mode::Sharded => {
                for (name, collection) in &inner.collections {
                    self.save_unit(&inner.collections, &UnitKey::Meta(name.clone()))?;
                    for partition in collection.partitions.keys() {
                        self.save_unit(
                            &inner.collections,
                            &UnitKey::Shard(name.clone(), partition.clone()),
                        )?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Erase a collection's on-disk presence.
    pub(crate) fn remove_collection_files(&self, name: &str) -> Result<()> {
        match self.layout.mode() {
            Mode::SingleFile => Ok(()),
            Mode::Folder => ignore_missing(fs::remove_file(self.layout.collection_path(name))),
            Mode::Sharded => ignore_missing(fs::remove_dir_all(self.layout.collection_dir(name))),
        }
    }

    pub(crate) fn remove_shard_file(&self, name: &str, partition: &str) -> Result<()> {
        ignore_missing(fs::remove_file(self.layout.shard_path(name, partition)))
    }
}

pub(crate) fn not_loaded() -> Error {
    Error::new(ErrorKind::DatabaseNotLoaded, "database is not loaded".to_string())
}

fn ignore_missing(result: std::io::Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
