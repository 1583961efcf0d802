use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use bytes::{Buf, BufMut, BytesMut};
use memmap2::Mmap;
use parking_lot::Mutex;
use crate::core::error::{Error, Result};
use crate::core::stats::JournalStats;
use crate::feature::object::{Object, ObjectLayout};

/// Marks the start of every journal record.
pub const MAGIC: u32 = 0xdead_beef;

/// `[magic u32][reserved u16][key_len u16][meta_len u32]`
pub const HEADER_SIZE: usize = 12;

/// Append-only log of `(key, meta, object)` records.
///
/// Appends are serialized by an internal mutex and are not fsynced;
/// call [`Journal::sync`] for durability.
pub struct Journal {
    path: PathBuf,
    layout: ObjectLayout,
    readonly: bool,
    file: Mutex<Option<File>>,
}

impl Journal {
    pub fn open(path: &Path, layout: ObjectLayout, readonly: bool) -> Result<Self> {
        let file = if readonly {
            None
        } else {
            Some(OpenOptions::new().create(true).append(true).open(path)?)
        };
        Ok(Journal {
            path: path.to_path_buf(),
            layout,
            readonly,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Replay every intact record in file order.
    ///
    /// Scanning stops at end of file or at the first record that is torn or
    /// does not start with [`MAGIC`]; the file is truncated there (unless
    /// read-only) so later appends never follow a partial record.
    /// Returns the number of records replayed.
    pub fn recover<F>(&self, mut callback: F) -> Result<usize>
    where
        F: FnMut(String, String, Object) -> Result<()>,
    {
        let mut guard = self.file.lock();
        let source = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.readonly => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let len = source.metadata()?.len() as usize;
        if len == 0 {
            return Ok(0);
        }
        let mmap = unsafe { Mmap::map(&source)? };
        let data = &mmap[..len];

        let mut offset = 0usize;
        let mut count = 0usize;
        while offset < len {
            let (key, meta, object, size) = match self.decode_at(&data[offset..]) {
                Some(r) => r,
                None => break,
            };
            callback(key, meta, object)?;
            offset += size;
            count += 1;
        }

        if offset < len {
            tracing::warn!(
                "Journal {:?}: corrupt tail at offset {} ({} bytes dropped)",
                self.path, offset, len - offset
            );
            drop(mmap);
            if let Some(file) = guard.as_mut() {
                file.flush()?;
                file.set_len(offset as u64)?;
                file.sync_all()?;
            }
        }
        tracing::info!("Journal {:?}: recovered {} records", self.path, count);
        Ok(count)
    }

    /// Decode one record; `None` marks a torn or corrupt record.
    fn decode_at(&self, mut buf: &[u8]) -> Option<(String, String, Object, usize)> {
        let start = buf.len();
        if buf.remaining() < HEADER_SIZE {
            return None;
        }
        if buf.get_u32_le() != MAGIC {
            return None;
        }
        let _reserved = buf.get_u16_le();
        let key_len = buf.get_u16_le() as usize;
        let meta_len = buf.get_u32_le() as usize;
        if buf.remaining() < key_len + meta_len {
            return None;
        }
        let key = String::from_utf8(buf[..key_len].to_vec()).ok()?;
        buf.advance(key_len);
        let meta = String::from_utf8(buf[..meta_len].to_vec()).ok()?;
        buf.advance(meta_len);
        let object = self.layout.decode(&mut buf).ok()?;
        Some((key, meta, object, start - buf.len()))
    }

    pub fn encode(&self, key: &str, meta: &str, object: &Object) -> Result<BytesMut> {
        if key.len() > u16::MAX as usize {
            return Err(Error::request(format!("key too long: {} bytes", key.len())));
        }
        if meta.len() > u32::MAX as usize {
            return Err(Error::request("meta too long"));
        }
        let mut buf = BytesMut::with_capacity(
            HEADER_SIZE + key.len() + meta.len() + self.layout.encoded_len(object),
        );
        buf.put_u32_le(MAGIC);
        buf.put_u16_le(0);
        buf.put_u16_le(key.len() as u16);
        buf.put_u32_le(meta.len() as u32);
        buf.put_slice(key.as_bytes());
        buf.put_slice(meta.as_bytes());
        self.layout.encode(object, &mut buf);
        Ok(buf)
    }

    pub fn append(&self, key: &str, meta: &str, object: &Object) -> Result<()> {
        if self.readonly {
            return Err(Error::permission("journal is read-only"));
        }
        let record = self.encode(key, meta, object)?;
        let mut guard = self.file.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| Error::internal("journal file not open"))?;
        write_or_rollback(&self.path, file, |f| f.write_all(&record))
    }

    pub fn sync(&self) -> Result<()> {
        if self.readonly {
            return Err(Error::permission("journal is read-only"));
        }
        let mut guard = self.file.lock();
        if let Some(file) = guard.as_mut() {
            file.flush()?;
            file.sync_data()?;
        }
        Ok(())
    }

    /// Drop every record.
    pub fn truncate(&self) -> Result<()> {
        if self.readonly {
            return Err(Error::permission("journal is read-only"));
        }
        let mut guard = self.file.lock();
        if let Some(file) = guard.as_mut() {
            file.set_len(0)?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Count objects and features in a journal without touching it.
    pub fn stat(path: &Path, layout: ObjectLayout) -> Result<JournalStats> {
        let journal = Journal::open(path, layout, true)?;
        let mut stats = JournalStats::default();
        journal.recover(|_, _, object| {
            stats.objects += 1;
            stats.features += object.parts.len();
            Ok(())
        })?;
        Ok(stats)
    }
}

/// Run `write` at the end of `file`. If it fails the file is cut back to
/// its previous length, so no partial record is left for later appends to
/// follow.
fn write_or_rollback<F>(path: &Path, file: &mut File, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    let start = file.metadata()?.len();
    if let Err(e) = write(file) {
        tracing::warn!("Journal {:?}: append failed ({}), rolling back to {} bytes", path, e, start);
        file.set_len(start)?;
        return Err(e.into());
    }
    Ok(())
}
