//! Task pool: the concurrent map of job id to job record.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use reportbridge_core::types::JobId;

use crate::record::JobRecord;

/// Single source of truth for tracked jobs.
#[derive(Debug, Default)]
pub struct TaskPool {
    jobs: DashMap<JobId, Arc<JobRecord>>,
}

impl TaskPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record built for a freshly generated id.
    ///
    /// Ids are random v4 UUIDs; an id already present is never handed out.
    pub fn create(&self, build: impl FnOnce(JobId) -> JobRecord) -> Arc<JobRecord> {
        loop {
            let id = JobId::new();
            if let Entry::Vacant(slot) = self.jobs.entry(id) {
                let record = Arc::new(build(id));
                slot.insert(Arc::clone(&record));
                return record;
            }
        }
    }

    pub fn get(&self, id: JobId) -> Option<Arc<JobRecord>> {
        self.jobs.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: JobId) -> Option<Arc<JobRecord>> {
        self.jobs.remove(&id).map(|(_, record)| record)
    }

    /// Records present right now, safe to iterate while the pool changes.
    pub fn snapshot(&self) -> Vec<Arc<JobRecord>> {
        self.jobs.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Call `f` for every record of a [`snapshot`](Self::snapshot).
    pub fn for_each(&self, mut f: impl FnMut(&Arc<JobRecord>)) {
        for record in self.snapshot() {
            f(&record);
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
