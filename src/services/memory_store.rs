//! In-memory `ObjectStore` with scripted failures, for tests.

use crate::{
    models::multipart::{PartResult, UploadTarget},
    services::object_store::{ObjectStore, StorageError, StorageResult, content_md5},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Which call a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    /// A specific part number.
    Part(i32),
    Complete,
    Abort,
    Put,
}

#[derive(Debug, Default)]
struct Inner {
    failures: HashMap<Op, VecDeque<StorageError>>,
    calls: HashMap<&'static str, usize>,
    uploads: HashMap<String, (String, BTreeMap<i32, Bytes>)>,
    completed_parts: HashMap<String, Vec<(i32, String)>>,
    objects: HashMap<String, Bytes>,
    aborted: Vec<String>,
    next_id: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    in_flight_parts: AtomicUsize,
    peak_in_flight_parts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail with errors from `make`.
    pub fn fail(&self, op: Op, times: usize, make: impl Fn() -> StorageError) {
        let mut inner = self.inner.lock().unwrap();
        let queue = inner.failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(make());
        }
    }

    pub fn calls(&self, name: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.calls.get(name).copied().unwrap_or(0)
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.inner.lock().unwrap().objects.get(key).cloned()
    }

    /// `(part_number, etag)` pairs the object was completed with.
    pub fn completed_parts(&self, key: &str) -> Option<Vec<(i32, String)>> {
        self.inner.lock().unwrap().completed_parts.get(key).cloned()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.inner.lock().unwrap().aborted.clone()
    }

    pub fn peak_in_flight_parts(&self) -> usize {
        self.peak_in_flight_parts.load(Ordering::SeqCst)
    }

    fn enter(&self, name: &'static str, op: Op) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        *inner.calls.entry(name).or_default() += 1;
        match inner.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn etag_of(body: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(body))
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_multipart_upload(&self, target: &UploadTarget) -> StorageResult<String> {
        self.enter("create", Op::Create)?;
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("mpu-{}", inner.next_id);
        inner
            .uploads
            .insert(id.clone(), (target.key.clone(), BTreeMap::new()));
        Ok(id)
    }

    async fn upload_part(
        &self,
        _target: &UploadTarget,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        md5: &str,
    ) -> StorageResult<String> {
        let now = self.in_flight_parts.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight_parts.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight_parts.fetch_sub(1, Ordering::SeqCst);

        self.enter("upload_part", Op::Part(part_number))?;
        if content_md5(&body) != md5 {
            return Err(StorageError::service("BadDigest", "Content-MD5 mismatch"));
        }
        let mut inner = self.inner.lock().unwrap();
        let (_, parts) = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::service("NoSuchUpload", upload_id.to_string()))?;
        let etag = etag_of(&body);
        parts.insert(part_number, body);
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        _target: &UploadTarget,
        upload_id: &str,
        parts: &[PartResult],
    ) -> StorageResult<()> {
        self.enter("complete", Op::Complete)?;
        let mut inner = self.inner.lock().unwrap();
        let (key, stored) = inner
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StorageError::service("NoSuchUpload", upload_id.to_string()))?;

        let mut object = BytesMut::new();
        for part in parts {
            let body = stored
                .get(&part.part_number)
                .ok_or_else(|| StorageError::service("InvalidPart", part.part_number.to_string()))?;
            if etag_of(body) != part.etag {
                return Err(StorageError::service("InvalidPart", "etag mismatch"));
            }
            object.extend_from_slice(body);
        }

        let listed = parts
            .iter()
            .map(|p| (p.part_number, p.etag.clone()))
            .collect();
        inner.completed_parts.insert(key.clone(), listed);
        inner.objects.insert(key, object.freeze());
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _target: &UploadTarget,
        upload_id: &str,
    ) -> StorageResult<()> {
        self.enter("abort", Op::Abort)?;
        let mut inner = self.inner.lock().unwrap();
        inner.uploads.remove(upload_id);
        inner.aborted.push(upload_id.to_string());
        Ok(())
    }

    async fn put_object(&self, target: &UploadTarget, body: Bytes) -> StorageResult<String> {
        self.enter("put", Op::Put)?;
        let etag = etag_of(&body);
        self.inner
            .lock()
            .unwrap()
            .objects
            .insert(target.key.clone(), body);
        Ok(etag)
    }
}
