//! Shared test doubles.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::Mutex;
use storage_helpers::backends::object::{
    ObjectClient, ObjectError, ObjectErrorKind, ObjectListing, ObjectMeta,
};

// =============================================================================
// In-memory object store
// =============================================================================

/// Object store keeping every bucket in one map, with scripted failures.
#[derive(Default)]
pub struct MemoryObjects {
    pub objects: Mutex<BTreeMap<String, Bytes>>,
    /// Errors returned, in order, before any real work happens.
    pub failures: Mutex<VecDeque<ObjectErrorKind>>,
    /// Sizes of every `delete_objects` request.
    pub delete_batches: Mutex<Vec<usize>>,
    /// Delete requests whose first key matches are refused.
    pub refuse_delete_from: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

impl MemoryObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, body: &[u8]) {
        self.objects
            .lock()
            .insert(key.to_string(), Bytes::copy_from_slice(body));
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().get(key).cloned()
    }

    pub fn fail_with(&self, kinds: &[ObjectErrorKind]) {
        self.failures.lock().extend(kinds.iter().copied());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), ObjectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock().pop_front() {
            Some(kind) => Err(ObjectError::new(kind, format!("scripted {kind:?}"))),
            None => Ok(()),
        }
    }
}

fn parse_range(range: &str) -> (usize, usize) {
    let spec = range.trim_start_matches("bytes=");
    let (start, end) = spec.split_once('-').expect("well-formed range");
    (start.parse().unwrap(), end.parse().unwrap())
}

impl ObjectClient for MemoryObjects {
    fn get_object(&self, _bucket: &str, key: &str, range: &str) -> Result<Bytes, ObjectError> {
        self.enter()?;
        let objects = self.objects.lock();
        let body = objects
            .get(key)
            .ok_or_else(|| ObjectError::new(ObjectErrorKind::NoSuchKey, key))?;
        let (start, end) = parse_range(range);
        if start >= body.len() {
            return Err(ObjectError::new(ObjectErrorKind::InvalidRange, range));
        }
        Ok(body.slice(start..(end + 1).min(body.len())))
    }

    fn put_object(&self, _bucket: &str, key: &str, body: Bytes) -> Result<(), ObjectError> {
        self.enter()?;
        self.objects.lock().insert(key.to_string(), body);
        Ok(())
    }

    fn head_object(&self, _bucket: &str, key: &str) -> Result<ObjectMeta, ObjectError> {
        self.enter()?;
        self.objects
            .lock()
            .get(key)
            .map(|body| ObjectMeta {
                size: body.len() as u64,
                modified: SystemTime::UNIX_EPOCH,
            })
            .ok_or_else(|| ObjectError::new(ObjectErrorKind::NoSuchKey, key))
    }

    fn delete_objects(&self, _bucket: &str, keys: &[String]) -> Result<(), ObjectError> {
        self.enter()?;
        self.delete_batches.lock().push(keys.len());
        if let Some(refused) = self.refuse_delete_from.lock().as_deref() {
            if keys.first().map(String::as_str) == Some(refused) {
                return Err(ObjectError::new(ObjectErrorKind::AccessDenied, "refused"));
            }
        }
        let mut objects = self.objects.lock();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    fn list_objects(
        &self,
        _bucket: &str,
        prefix: &str,
        marker: Option<&str>,
        max_keys: usize,
    ) -> Result<ObjectListing, ObjectError> {
        self.enter()?;
        let objects = self.objects.lock();
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| marker.is_none_or(|m| k.as_str() > m))
            .take(max_keys + 1)
            .cloned()
            .collect();
        let next_marker = if keys.len() > max_keys {
            keys.truncate(max_keys);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ObjectListing { keys, next_marker })
    }
}
