use std::path::PathBuf;
use std::sync::Arc;
use crate::core::error::{Error, ErrorKind, Result};

/// Replaces reading the single-file database from disk.
pub type LoadHook = Arc<dyn Fn() -> Result<String> + Send + Sync>;
/// Replaces writing the single-file database to disk.
pub type SaveHook = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct Config {
    pub file: PathBuf,                  // Single-file mode database path
    pub folder: Option<PathBuf>,        // Folder/sharded mode root directory
    pub load_hook: Option<LoadHook>,    // Single-file mode only
    pub save_hook: Option<SaveHook>,    // Single-file mode only
    pub aof: bool,                      // Append-only log persistence
    pub compression: bool,              // Gzip every payload, paths gain .gz
    pub sharding: bool,                 // Shard-per-partition layout, needs folder
    pub max_cache_size: usize,          // Resident unit bound, 0 = unbounded
}

impl Default for Config {
    fn default() -> Self {
        Config {
            file: PathBuf::from("./sencillo.json"),
            folder: None,
            load_hook: None,
            save_hook: None,
            aof: false,
            compression: false,
            sharding: false,
            max_cache_size: 0,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.sharding && self.folder.is_none() {
            return Err(Error::new(
                ErrorKind::Configuration,
                "sharding requires folder mode".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("file", &self.file)
            .field("folder", &self.folder)
            .field("load_hook", &self.load_hook.is_some())
            .field("save_hook", &self.save_hook.is_some())
            .field("aof", &self.aof)
            .field("compression", &self.compression)
            .field("sharding", &self.sharding)
            .field("max_cache_size", &self.max_cache_size)
            .finish()
    }
}
