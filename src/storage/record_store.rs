use std::sync::Arc;
use crate::core::types::{ObjectId, Record};
use crate::feature::vector::Feature;

const SEGMENT_SIZE: usize = 4096;

/// Append-only record storage.
///
/// Records live in fixed-capacity segments, so appending never moves an
/// existing record. Indexes refer to records by `(object_id, part_tag)` and
/// resolve features here at lookup time.
#[derive(Debug, Default)]
pub struct RecordStore {
    segments: Vec<Vec<Arc<Record>>>,
    len: usize,
}

impl RecordStore {
    pub fn new() -> Self {
        RecordStore::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Id the next pushed record will receive.
    pub fn next_id(&self) -> ObjectId {
        self.len as ObjectId
    }

    pub fn push(&mut self, record: Record) -> Arc<Record> {
        debug_assert_eq!(record.id as usize, self.len);
        if self.segments.last().map_or(true, |s| s.len() == SEGMENT_SIZE) {
            self.segments.push(Vec::with_capacity(SEGMENT_SIZE));
        }
        let record = Arc::new(record);
        if let Some(segment) = self.segments.last_mut() {
            segment.push(record.clone());
        }
        self.len += 1;
        record
    }

    pub fn get(&self, id: ObjectId) -> Option<&Arc<Record>> {
        let id = id as usize;
        self.segments.get(id / SEGMENT_SIZE)?.get(id % SEGMENT_SIZE)
    }

    pub fn feature(&self, id: ObjectId, tag: u32) -> Option<&Feature> {
        self.get(id)?.object.parts.get(tag as usize).map(|p| &p.feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Record>> {
        self.segments.iter().flat_map(|s| s.iter())
    }

    /// Drop every record. Readers holding an `Arc<Record>` keep theirs.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.len = 0;
    }
}
