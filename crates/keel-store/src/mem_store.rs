use crate::{ListParams, Store, StoreError, StoreResult, WatchEvent, WatchEventKind};
use keel_types::{Object, ObjectKey, ObjectMeta};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    sync::{
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::broadcast;

const WATCH_CAPACITY: usize = 4096;

/// In-memory store holding JSON snapshots; readers never alias a writer's value.
#[derive(Clone)]
pub struct MemStore {
    inner: Arc<RwLock<Inner>>,
    events: broadcast::Sender<WatchEvent>,
    injected_faults: Arc<AtomicUsize>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Value>,
    version: u64,
    last_created_ns: u64,
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.inner.read().map(|g| g.objects.len()).unwrap_or_default();
        f.debug_struct("MemStore").field("objects", &len).finish()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            events,
            injected_faults: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes the next `count` writes fail with `StoreError::Unavailable`.
    pub fn fail_next_writes(&self, count: usize) {
        self.injected_faults.store(count, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.read().map(|g| g.objects.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.read().map(|g| g.objects.contains_key(key)).unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.read()
            .map(|g| g.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        if self
            .injected_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("injected fault".into()));
        }
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn emit(&self, kind: WatchEventKind, meta: &ObjectMeta) {
        let event = WatchEvent {
            kind,
            key: meta.key(),
            labels: meta.labels.clone(),
            owner_refs: meta.owner_refs.clone(),
            parent: meta.parent_key(),
            resource_version: meta.resource_version,
        };
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

fn into_map(key: &ObjectKey, value: Value) -> StoreResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Malformed {
            key: key.to_string(),
            reason: "object must serialize to a JSON map".into(),
        }),
    }
}

fn meta_of(key: &ObjectKey, map: &Map<String, Value>) -> StoreResult<ObjectMeta> {
    let meta = map.get("meta").cloned().ok_or_else(|| StoreError::Malformed {
        key: key.to_string(),
        reason: "missing meta".into(),
    })?;
    Ok(serde_json::from_value(meta)?)
}

fn encode<T: Object>(object: &T) -> StoreResult<(ObjectKey, Map<String, Value>)> {
    let key = object.key();
    let map = into_map(&key, serde_json::to_value(object)?)?;
    Ok((key, map))
}

fn check_version(key: &ObjectKey, stored: &ObjectMeta, incoming: &ObjectMeta) -> StoreResult<()> {
    if stored.resource_version != incoming.resource_version {
        return Err(StoreError::Conflict {
            key: key.clone(),
            expected: incoming.resource_version,
            actual: stored.resource_version,
        });
    }
    Ok(())
}

fn decode<T: Object>(map: Map<String, Value>) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(map))?)
}

impl Store for MemStore {
    fn get<T: Object>(&self, key: &ObjectKey) -> StoreResult<Option<T>> {
        let guard = self.read()?;
        match guard.objects.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    fn list<T: Object>(&self, params: &ListParams) -> StoreResult<Vec<T>> {
        let guard = self.read()?;
        let mut out = Vec::new();
        for (key, value) in guard.objects.iter().filter(|(k, _)| k.kind == params.kind) {
            let labels = value
                .get("meta")
                .and_then(|m| m.get("labels"))
                .cloned()
                .map(serde_json::from_value::<BTreeMap<String, String>>)
                .transpose()?
                .unwrap_or_default();
            if params.matches(key, &labels) {
                out.push(serde_json::from_value(value.clone())?);
            }
        }
        Ok(out)
    }

    fn create<T: Object>(&self, object: &T) -> StoreResult<T> {
        let (key, mut map) = encode(object)?;
        let mut guard = self.write()?;
        if guard.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        guard.version += 1;
        let mut meta = meta_of(&key, &map)?;
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.resource_version = guard.version;
        meta.generation = 1;
        meta.deletion_requested = false;
        // Strictly increasing so creation order is total.
        meta.created_at_ns = now_ns().max(guard.last_created_ns + 1);
        guard.last_created_ns = meta.created_at_ns;
        map.insert("meta".into(), serde_json::to_value(&meta)?);
        guard.objects.insert(key, Value::Object(map.clone()));
        drop(guard);

        log::debug!("created {} at version {}", meta.key(), meta.resource_version);
        self.emit(WatchEventKind::Added, &meta);
        decode(map)
    }

    fn update<T: Object>(&self, object: &T) -> StoreResult<T> {
        let (key, mut map) = encode(object)?;
        let mut guard = self.write()?;
        let stored = match guard.objects.get(&key) {
            Some(value) => into_map(&key, value.clone())?,
            None => return Err(StoreError::NotFound(key)),
        };
        let stored_meta = meta_of(&key, &stored)?;
        let mut meta = meta_of(&key, &map)?;
        check_version(&key, &stored_meta, &meta)?;

        guard.version += 1;
        meta.uid = stored_meta.uid.clone();
        meta.created_at_ns = stored_meta.created_at_ns;
        meta.deletion_requested = stored_meta.deletion_requested;
        meta.resource_version = guard.version;
        meta.generation = if map.get("spec") != stored.get("spec") {
            stored_meta.generation + 1
        } else {
            stored_meta.generation
        };
        map.insert("meta".into(), serde_json::to_value(&meta)?);
        match stored.get("status") {
            Some(status) => map.insert("status".into(), status.clone()),
            None => map.remove("status"),
        };

        let erase = meta.deletion_requested && meta.finalizers.is_empty();
        if erase {
            guard.objects.remove(&key);
        } else {
            guard.objects.insert(key, Value::Object(map.clone()));
        }
        drop(guard);

        if erase {
            log::debug!("erased {} after last finalizer", meta.key());
            self.emit(WatchEventKind::Deleted, &meta);
        } else {
            self.emit(WatchEventKind::Modified, &meta);
        }
        decode(map)
    }

    fn update_status<T: Object>(&self, object: &T) -> StoreResult<T> {
        let (key, incoming) = encode(object)?;
        let mut guard = self.write()?;
        let mut stored = match guard.objects.get(&key) {
            Some(value) => into_map(&key, value.clone())?,
            None => return Err(StoreError::NotFound(key)),
        };
        let mut meta = meta_of(&key, &stored)?;
        check_version(&key, &meta, &meta_of(&key, &incoming)?)?;

        guard.version += 1;
        meta.resource_version = guard.version;
        stored.insert("meta".into(), serde_json::to_value(&meta)?);
        match incoming.get("status") {
            Some(status) => stored.insert("status".into(), status.clone()),
            None => stored.remove("status"),
        };
        guard.objects.insert(key, Value::Object(stored.clone()));
        drop(guard);

        self.emit(WatchEventKind::Modified, &meta);
        decode(stored)
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        let mut guard = self.write()?;
        let mut stored = match guard.objects.get(key) {
            Some(value) => into_map(key, value.clone())?,
            None => return Err(StoreError::NotFound(key.clone())),
        };
        let mut meta = meta_of(key, &stored)?;

        if meta.finalizers.is_empty() {
            guard.objects.remove(key);
            drop(guard);
            log::debug!("erased {key}");
            self.emit(WatchEventKind::Deleted, &meta);
            return Ok(());
        }
        if meta.deletion_requested {
            return Ok(());
        }

        guard.version += 1;
        meta.deletion_requested = true;
        meta.resource_version = guard.version;
        stored.insert("meta".into(), serde_json::to_value(&meta)?);
        guard.objects.insert(key.clone(), Value::Object(stored));
        drop(guard);

        log::debug!("{key} marked for deletion; held by {:?}", meta.finalizers);
        self.emit(WatchEventKind::Modified, &meta);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
