use crate::models::{IdentityRecord, RecordId};
use uuid::Uuid;

/// Ordered identity records with a navigation cursor.
///
/// Records keep their ingestion order and are never reordered, so a row index
/// together with the load id identifies a record for its whole lifetime.
#[derive(Debug)]
pub struct RecordStore {
    load_id: Uuid,
    records: Vec<IdentityRecord>,
    cursor: Option<usize>,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            load_id: Uuid::nil(),
            records: Vec::new(),
            cursor: None,
        }
    }

    /// Replaces all records and resets the cursor.
    ///
    /// Returns the id of the new load. Ids handed out for the previous load stop
    /// resolving, so late results for them are dropped instead of misapplied.
    pub fn load(&mut self, records: Vec<IdentityRecord>) -> Uuid {
        self.load_id = Uuid::new_v4();
        self.cursor = if records.is_empty() { None } else { Some(0) };
        self.records = records;

        tracing::info!(
            "Record store loaded {} record(s) (load {})",
            self.records.len(),
            self.load_id
        );
        self.load_id
    }

    pub fn load_id(&self) -> Uuid {
        self.load_id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    /// Record under the cursor.
    pub fn current(&self) -> Option<&IdentityRecord> {
        self.cursor.and_then(|index| self.records.get(index))
    }

    pub fn current_id(&self) -> Option<RecordId> {
        self.cursor.and_then(|index| self.id_at(index))
    }

    /// Advances the cursor, wrapping to the first record.
    pub fn next(&mut self) {
        let len = self.records.len();
        if let Some(cursor) = self.cursor {
            self.cursor = Some((cursor + 1) % len);
        }
    }

    /// Moves the cursor back, wrapping to the last record.
    pub fn prev(&mut self) {
        let len = self.records.len();
        if let Some(cursor) = self.cursor {
            self.cursor = Some((cursor + len - 1) % len);
        }
    }

    /// Points the cursor at `index`. Returns `false` if it is out of range.
    pub fn select(&mut self, index: usize) -> bool {
        if index >= self.records.len() {
            return false;
        }
        self.cursor = Some(index);
        true
    }

    /// Identity of the record at `index` in the current load.
    pub fn id_at(&self, index: usize) -> Option<RecordId> {
        (index < self.records.len()).then_some(RecordId {
            load: self.load_id,
            index,
        })
    }

    pub fn get(&self, id: RecordId) -> Option<&IdentityRecord> {
        if id.load != self.load_id {
            return None;
        }
        self.records.get(id.index)
    }

    /// Applies `mutation` to the record with the given identity, independent of
    /// where the cursor is.
    ///
    /// Returns `None` if the id belongs to an earlier load or is out of range.
    pub fn update_at<R>(
        &mut self,
        id: RecordId,
        mutation: impl FnOnce(&mut IdentityRecord) -> R,
    ) -> Option<R> {
        if id.load != self.load_id {
            return None;
        }
        self.records.get_mut(id.index).map(mutation)
    }
}
