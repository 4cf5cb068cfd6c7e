use std::fs;
use std::path::PathBuf;
use crate::core::config::Config;
use crate::core::error::Result;

const SHARD_PREFIX: &str = "shard_";
const META_FILE: &str = "meta";

/// Persistence mode, decided once from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    SingleFile,
    Folder,
    Sharded,
}

/// Deterministic mapping from (mode, collection, partition) to storage
/// paths. Compression appends `.gz` to every data path.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    mode: Mode,
    file: PathBuf,
    folder: PathBuf,
    compression: bool,
}

impl StorageLayout {
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let (mode, folder) = match &config.folder {
            Some(root) => {
                let mode = if config.sharding { Mode::Sharded } else { Mode::Folder };
                fs::create_dir_all(root)?;
                (mode, root.clone())
            }
            None => (Mode::SingleFile, PathBuf::new()),
        };
        Ok(StorageLayout {
            mode,
            file: config.file.clone(),
            folder,
            compression: config.compression,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The whole database document, single-file mode.
    pub fn database_path(&self) -> PathBuf {
        self.suffixed(self.file.clone())
    }

    /// Collection document, folder mode.
    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.suffixed(self.folder.join(format!("{}.json", collection)))
    }

    /// Collection directory, sharded mode.
    pub fn collection_dir(&self, collection: &str) -> PathBuf {
        self.folder.join(collection)
    }

    /// One partition's shard file, sharded mode.
    pub fn shard_path(&self, collection: &str, partition: &str) -> PathBuf {
        self.suffixed(
            self.collection_dir(collection)
                .join(format!("{}{}.json", SHARD_PREFIX, partition)),
        )
    }

    /// Stats, id-map and secondary indexes of a sharded collection.
    pub fn meta_path(&self, collection: &str) -> PathBuf {
        self.suffixed(self.collection_dir(collection).join(format!("{}.json", META_FILE)))
    }

    /// The append-only log lives beside the store and is never compressed.
    pub fn aof_path(&self) -> PathBuf {
        match self.mode {
            Mode::SingleFile => {
                let mut name = self.file.as_os_str().to_os_string();
                name.push(".aof");
                PathBuf::from(name)
            }
            Mode::Folder | Mode::Sharded => self.folder.join("log.aof"),
        }
    }

    /// Partition names found on disk for a sharded collection.
    pub fn list_shards(&self, collection: &str) -> Result<Vec<String>> {
        let dir = self.collection_dir(collection);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(stem) = strip_data_suffix(file_name) else {
                continue;
            };
            if let Some(partition) = stem.strip_prefix(SHARD_PREFIX) {
                names.push(partition.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn suffixed(&self, path: PathBuf) -> PathBuf {
        if self.compression {
            let mut name = path.into_os_string();
            name.push(".gz");
            PathBuf::from(name)
        } else {
            path
        }
    }
}

fn strip_data_suffix(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(".json.gz")
        .or_else(|| file_name.strip_suffix(".json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(compression: bool, sharding: bool) -> StorageLayout {
        let config = Config {
            folder: Some(PathBuf::from("/tmp/sencillo-layout-test")),
            compression,
            sharding,
            ..Config::default()
        };
        StorageLayout::from_config(&config).unwrap()
    }

    #[test]
    fn folder_paths() {
        let layout = layout(false, false);
        assert_eq!(
            layout.collection_path("people"),
            PathBuf::from("/tmp/sencillo-layout-test/people.json")
        );
        assert_eq!(
            layout.aof_path(),
            PathBuf::from("/tmp/sencillo-layout-test/log.aof")
        );
    }

    #[test]
    fn sharded_paths_gain_gz_suffix_under_compression() {
        let layout = layout(true, true);
        assert_eq!(
            layout.shard_path("people", "24"),
            PathBuf::from("/tmp/sencillo-layout-test/people/shard_24.json.gz")
        );
        assert_eq!(
            layout.meta_path("people"),
            PathBuf::from("/tmp/sencillo-layout-test/people/meta.json.gz")
        );
    }

    #[test]
    fn single_file_aof_sits_beside_the_database() {
        let config = Config {
            file: PathBuf::from("/tmp/store.json"),
            ..Config::default()
        };
        let layout = StorageLayout::from_config(&config).unwrap();
        assert_eq!(layout.database_path(), PathBuf::from("/tmp/store.json"));
        assert_eq!(layout.aof_path(), PathBuf::from("/tmp/store.json.aof"));
    }

    #[test]
    fn sharding_without_folder_is_rejected() {
        let config = Config {
            sharding: true,
            ..Config::default()
        };
        assert!(StorageLayout::from_config(&config).is_err());
    }
}
