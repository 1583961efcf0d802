use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use crate::core::error::{Error, Result};
use crate::core::types::DbId;

/// Maps external database ids onto dense shard indexes.
///
/// Mappings are assigned sequentially, persisted before they become
/// visible, and never removed. The file holds one `internal external` pair
/// per line.
pub struct NameTranslator {
    path: PathBuf,
    max_shards: usize,
    readonly: bool,
    table: RwLock<HashMap<DbId, u16>>,
}

impl NameTranslator {
    pub fn open(path: &Path, max_shards: usize, readonly: bool) -> Result<Self> {
        let mut table = HashMap::new();
        match fs::read_to_string(path) {
            Ok(text) => {
                for (n, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
                    let (internal, external) = parse_line(line)
                        .ok_or_else(|| Error::config(format!("{:?} line {}: bad mapping {:?}", path, n + 1, line)))?;
                    if table.insert(external, internal).is_some() {
                        return Err(Error::config(format!("{:?}: db {} mapped twice", path, external)));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut assigned: Vec<u16> = table.values().copied().collect();
        assigned.sort_unstable();
        if assigned.iter().enumerate().any(|(i, v)| *v as usize != i) {
            return Err(Error::config(format!("{:?}: shard indexes are not dense", path)));
        }
        tracing::debug!("Loaded {} db mappings from {:?}", table.len(), path);
        Ok(NameTranslator {
            path: path.to_path_buf(),
            max_shards,
            readonly,
            table: RwLock::new(table),
        })
    }

    pub fn lookup(&self, db: DbId) -> Result<u16> {
        self.table
            .read()
            .get(&db)
            .copied()
            .ok_or_else(|| Error::request(format!("unknown db {}", db)))
    }

    /// Return the shard for `db`, assigning the next free one if needed.
    pub fn lookup_with_insert(&self, db: DbId) -> Result<u16> {
        if let Some(internal) = self.table.read().get(&db) {
            return Ok(*internal);
        }
        let table = self.table.upgradable_read();
        if let Some(internal) = table.get(&db) {
            return Ok(*internal);
        }
        if self.readonly {
            return Err(Error::permission(format!("cannot map db {} in read-only mode", db)));
        }
        if table.len() >= self.max_shards {
            return Err(Error::request(format!("cannot map db {}: all {} shards in use", db, self.max_shards)));
        }
        let internal = table.len() as u16;
        let mut rows: Vec<(u16, DbId)> = table.iter().map(|(e, i)| (*i, *e)).collect();
        rows.push((internal, db));
        self.persist(&mut rows)?;

        let mut table = RwLockUpgradableReadGuard::upgrade(table);
        table.insert(db, internal);
        tracing::info!("Mapped db {} to shard {}", db, internal);
        Ok(internal)
    }

    fn persist(&self, rows: &mut [(u16, DbId)]) -> Result<()> {
        rows.sort_unstable();
        let text: String = rows.iter().map(|(i, e)| format!("{} {}\n", i, e)).collect();
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// `(external, internal)` pairs ordered by shard index.
    pub fn mappings(&self) -> Vec<(DbId, u16)> {
        let mut rows: Vec<(DbId, u16)> = self.table.read().iter().map(|(e, i)| (*e, *i)).collect();
        rows.sort_by_key(|(_, i)| *i);
        rows
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_line(line: &str) -> Option<(u16, DbId)> {
    let mut fields = line.split_whitespace();
    let internal = fields.next()?.parse().ok()?;
    let external = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((internal, external))
}
