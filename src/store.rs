use std::sync::Mutex;

use crate::error::{GenerationError, Result};
use crate::types::{EncodedPayload, GeneratedFields, ResultRecord, WorkItem, WorkItemStatus};

/// Files staged for generation, in upload order.
pub struct StagingArea {
    items: Mutex<Vec<WorkItem>>,
}

impl Default for StagingArea {
    fn default() -> Self {
        Self::new()
    }
}

impl StagingArea {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<WorkItem>>> {
        self.items
            .lock()
            .map_err(|e| GenerationError::Other(format!("staging lock poisoned: {}", e)))
    }

    /// Add an item unless one with the same name, size and modification
    /// time is already staged. Returns `true` if added.
    pub fn add(&self, item: WorkItem) -> Result<bool> {
        let mut items = self.lock()?;
        let duplicate = items.iter().any(|i| {
            i.filename == item.filename && i.size == item.size && i.modified_ms == item.modified_ms
        });
        if duplicate {
            return Ok(false);
        }
        items.push(item);
        Ok(true)
    }

    /// Attach preprocessing output and mark the item ready.
    pub fn mark_ready(
        &self,
        id: &str,
        thumbnail: EncodedPayload,
        payload: EncodedPayload,
    ) -> Result<()> {
        let mut items = self.lock()?;
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| GenerationError::NotFound(id.to_string()))?;
        item.thumbnail = Some(thumbnail);
        item.payload = Some(payload);
        item.status = WorkItemStatus::Ready;
        item.error = None;
        Ok(())
    }

    pub fn set_status(&self, id: &str, status: WorkItemStatus, error: Option<String>) -> Result<()> {
        let mut items = self.lock()?;
        if let Some(item) = items.iter_mut().find(|i| i.id == id) {
            item.status = status;
            item.error = error;
        }
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<Option<WorkItem>> {
        let mut items = self.lock()?;
        Ok(items
            .iter()
            .position(|i| i.id == id)
            .map(|pos| items.remove(pos)))
    }

    /// Snapshot of every item currently in the `Ready` state.
    pub fn ready_items(&self) -> Vec<WorkItem> {
        self.items
            .lock()
            .map(|items| {
                items
                    .iter()
                    .filter(|i| i.status == WorkItemStatus::Ready)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn list(&self) -> Vec<WorkItem> {
        self.items.lock().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<WorkItem> {
        self.items.lock().ok()?.iter().find(|i| i.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut items) = self.items.lock() {
            items.clear();
        }
    }
}

/// Ordered result collection. Records accumulate across runs until cleared
/// or deleted one by one.
pub struct ResultStore {
    records: Mutex<Vec<ResultRecord>>,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<ResultRecord>>> {
        self.records
            .lock()
            .map_err(|e| GenerationError::Other(format!("result lock poisoned: {}", e)))
    }

    pub fn push(&self, record: ResultRecord) -> Result<()> {
        self.lock()?.push(record);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<ResultRecord> {
        self.records.lock().ok()?.get(index).cloned()
    }

    /// Overwrite the generated fields of record `id` in place, keeping its
    /// position in the collection.
    pub fn replace_fields(&self, id: &str, fields: GeneratedFields) -> Result<()> {
        let mut records = self.lock()?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| GenerationError::NotFound(format!("result {}", id)))?;
        record.fields = fields;
        record.error = None;
        record.created_at = chrono::Utc::now().to_rfc3339();
        Ok(())
    }

    pub fn remove(&self, index: usize) -> Result<ResultRecord> {
        let mut records = self.lock()?;
        if index >= records.len() {
            return Err(GenerationError::NotFound(format!("result #{}", index)));
        }
        Ok(records.remove(index))
    }

    pub fn list(&self) -> Vec<ResultRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenerationMode, PromptFields};

    fn payload() -> EncodedPayload {
        EncodedPayload::new("AA==", "image/jpeg")
    }

    #[test]
    fn test_staging_dedupes() {
        let staging = StagingArea::new();
        let mut a = WorkItem::new("a.jpg");
        a.size = 10;
        let mut b = WorkItem::new("a.jpg");
        b.size = 10;
        let mut c = WorkItem::new("a.jpg");
        c.size = 11;
        assert!(staging.add(a).unwrap());
        assert!(!staging.add(b).unwrap());
        assert!(staging.add(c).unwrap());
        assert_eq!(staging.len(), 2);
    }

    #[test]
    fn test_ready_items_filter() {
        let staging = StagingArea::new();
        let pending = WorkItem::new("pending.jpg").with_id("p");
        staging.add(pending).unwrap();
        staging.add(WorkItem::ready("r.jpg", payload()).with_id("r")).unwrap();
        assert_eq!(staging.ready_items().len(), 1);

        staging.mark_ready("p", payload(), payload()).unwrap();
        assert_eq!(staging.ready_items().len(), 2);

        staging
            .set_status("r", WorkItemStatus::Error, Some("bad".into()))
            .unwrap();
        let ready = staging.ready_items();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "p");
        assert_eq!(staging.get("r").unwrap().error.as_deref(), Some("bad"));
    }

    #[test]
    fn test_mark_ready_unknown() {
        let staging = StagingArea::new();
        assert!(matches!(
            staging.mark_ready("nope", payload(), payload()),
            Err(GenerationError::NotFound(_))
        ));
    }

    #[test]
    fn test_result_store_replace_and_remove() {
        let store = ResultStore::new();
        let item = WorkItem::ready("a.jpg", payload());
        store
            .push(ResultRecord::failed(&item, GenerationMode::Prompt, "x"))
            .unwrap();
        let id = store.get(0).unwrap().id;
        assert!(store.get(0).unwrap().is_error());

        store
            .replace_fields(
                &id,
                crate::types::GeneratedFields::Prompt(PromptFields {
                    description: "fixed".into(),
                }),
            )
            .unwrap();
        let record = store.get(0).unwrap();
        assert!(!record.is_error());
        assert_eq!(record.fields.description(), "fixed");

        assert!(store.replace_fields("missing", record.fields.clone()).is_err());
        assert_eq!(store.remove(0).unwrap().filename, "a.jpg");
        assert!(store.remove(0).is_err());
        assert!(store.is_empty());
    }
}
