use std::path::PathBuf;
use std::fs;
use crate::core::error::Result;

/// Directory structure for data files
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,      // Root directory
    pub shards_dir: PathBuf,    // One sub-directory per shard
    pub meta_dir: PathBuf,      // Name mapping and server state
    pub create: bool,           // false for read-only deployments
}

/// Files owned by one shard
#[derive(Debug, Clone)]
pub struct ShardPaths {
    pub dir: PathBuf,
    pub journal: PathBuf,
    pub index: PathBuf,         // index snapshot; sidecar at `<index>.meta`
}

impl StorageLayout {
    pub fn new(base_dir: PathBuf, create: bool) -> Result<Self> {
        let shards_dir = base_dir.join("shards");
        let meta_dir = base_dir.join("meta");

        if create {
            fs::create_dir_all(&shards_dir)?;
            fs::create_dir_all(&meta_dir)?;
        }

        Ok(StorageLayout {
            base_dir,
            shards_dir,
            meta_dir,
            create,
        })
    }

    pub fn shard(&self, index: u16) -> Result<ShardPaths> {
        let dir = self.shards_dir.join(format!("{:04}", index));
        if self.create {
            fs::create_dir_all(&dir)?;
        }
        Ok(ShardPaths::in_dir(dir))
    }

    pub fn mapping_path(&self) -> PathBuf {
        self.meta_dir.join("dbs.map")
    }

    pub fn state_path(&self) -> PathBuf {
        self.meta_dir.join("server.json")
    }
}

impl ShardPaths {
    pub fn in_dir(dir: PathBuf) -> Self {
        ShardPaths {
            journal: dir.join("journal.log"),
            index: dir.join("index.bin"),
            dir,
        }
    }

    pub fn index_meta(&self) -> PathBuf {
        sidecar(&self.index)
    }
}

/// `<path>.meta`
pub fn sidecar(path: &std::path::Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".meta");
    PathBuf::from(name)
}
