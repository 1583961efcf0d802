use std::io::Write;
use std::path::Path;
use crate::core::error::{Error, Result};
use crate::feature::object::Object;

/// Turns raw media into an object.
///
/// Failures are reported as External (source unreachable) or Plugin
/// (malformed input) errors and are only ever propagated.
pub trait Extractor: Send + Sync {
    fn extract_path(&self, path: &Path, type_hint: &str) -> Result<Object>;

    /// Default spills the bytes to a scratch file under `tmp_dir` and extracts from that.
    fn extract(&self, content: &[u8], type_hint: &str, tmp_dir: &Path) -> Result<Object> {
        let mut file = tempfile::NamedTempFile::new_in(tmp_dir)?;
        file.write_all(content)?;
        file.flush()?;
        self.extract_path(file.path(), type_hint)
    }
}

/// Used when no extraction plugin is installed.
#[derive(Debug, Default)]
pub struct NullExtractor;

impl Extractor for NullExtractor {
    fn extract_path(&self, path: &Path, _type_hint: &str) -> Result<Object> {
        Err(Error::not_implemented(format!("no extractor installed for {:?}", path)))
    }
}
