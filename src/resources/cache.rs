//! Reference-counted resource cache
//!
//! Every cached resource lives in a [`ResourceCell`] that carries its
//! identity, an explicit refcount, the number of in-flight jobs targeting it
//! and the payload behind a read/write lock. Callers hold counted
//! [`Handle`]s; the loader writes through [`JobTarget`]s so rebuilds land in
//! the same cell every holder already sees. Entries are never evicted on
//! the last release; [`ResourceCache::collect_reclaimable`] removes them
//! when asked.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a cached resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Storage of one cached resource
pub struct ResourceCell<T> {
    id: ResourceId,
    name: String,
    refcount: AtomicUsize,
    pending_jobs: AtomicUsize,
    pinned: AtomicBool,
    data: RwLock<T>,
}

impl<T> ResourceCell<T> {
    fn new(name: String, value: T) -> Arc<Self> {
        Arc::new(Self {
            id: ResourceId::next(),
            name,
            refcount: AtomicUsize::new(0),
            pending_jobs: AtomicUsize::new(0),
            pinned: AtomicBool::new(false),
            data: RwLock::new(value),
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending_jobs.load(Ordering::Acquire)
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.data.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.data.write()
    }

    fn is_reclaimable(&self) -> bool {
        !self.is_pinned() && self.refcount() == 0 && self.pending_jobs() == 0
    }
}

impl<T> fmt::Debug for ResourceCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCell")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("refcount", &self.refcount())
            .field("pending_jobs", &self.pending_jobs())
            .field("pinned", &self.is_pinned())
            .finish()
    }
}

/// Counted reference to a cached resource
pub struct Handle<T> {
    cell: Arc<ResourceCell<T>>,
}

impl<T> Handle<T> {
    pub(crate) fn acquire(cell: &Arc<ResourceCell<T>>) -> Self {
        cell.refcount.fetch_add(1, Ordering::AcqRel);
        Self {
            cell: Arc::clone(cell),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.cell.id
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    pub fn refcount(&self) -> usize {
        self.cell.refcount()
    }

    pub fn is_pinned(&self) -> bool {
        self.cell.is_pinned()
    }

    /// Shared access to the current payload
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.cell.read()
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.cell, &b.cell)
    }

    pub(crate) fn cell(&self) -> &Arc<ResourceCell<T>> {
        &self.cell
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self::acquire(&self.cell)
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        self.cell.refcount.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .finish()
    }
}

/// A job's claim on a resource; keeps it from being reclaimed
pub struct JobTarget<T> {
    cell: Arc<ResourceCell<T>>,
}

impl<T> JobTarget<T> {
    pub(crate) fn new(cell: &Arc<ResourceCell<T>>) -> Self {
        cell.pending_jobs.fetch_add(1, Ordering::AcqRel);
        Self {
            cell: Arc::clone(cell),
        }
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    pub fn id(&self) -> ResourceId {
        self.cell.id
    }

    pub(crate) fn cell(&self) -> &Arc<ResourceCell<T>> {
        &self.cell
    }
}

impl<T> Drop for JobTarget<T> {
    fn drop(&mut self) {
        self.cell.pending_jobs.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T> fmt::Debug for JobTarget<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JobTarget").field(&self.cell.name).finish()
    }
}

/// Name-keyed cache of one resource class
pub struct ResourceCache<K, V> {
    entries: Mutex<HashMap<K, Arc<ResourceCell<V>>>>,
}

impl<K, V> Default for ResourceCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> ResourceCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Counted handle to an existing entry
    pub fn get<Q>(&self, key: &Q) -> Option<Handle<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().get(key).map(Handle::acquire)
    }

    /// Counted handle to the entry for `key`, inserting `placeholder()` on
    /// a miss. `on_miss` runs under the cache lock with the new cell, so
    /// concurrent callers schedule exactly one build.
    pub fn get_or_insert_with(
        &self,
        key: K,
        placeholder: impl FnOnce() -> V,
        on_miss: impl FnOnce(&Arc<ResourceCell<V>>),
    ) -> Handle<V> {
        let mut entries = self.entries.lock();
        if let Some(cell) = entries.get(&key) {
            return Handle::acquire(cell);
        }
        let cell = ResourceCell::new(key.to_string(), placeholder());
        on_miss(&cell);
        let handle = Handle::acquire(&cell);
        entries.insert(key, cell);
        handle
    }

    /// Insert an entry that is never reclaimed
    pub fn insert_pinned(&self, key: K, value: V) -> Handle<V> {
        let cell = ResourceCell::new(key.to_string(), value);
        cell.pinned.store(true, Ordering::Release);
        let handle = Handle::acquire(&cell);
        self.entries.lock().insert(key, cell);
        handle
    }

    /// Make an existing entry permanent
    pub fn pin<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.entries.lock().get(key) {
            Some(cell) => {
                cell.pinned.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Claim an existing entry for a job
    pub fn target<Q>(&self, key: &Q) -> Option<JobTarget<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().get(key).map(JobTarget::new)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove and return every unpinned entry with no holders and no jobs
    pub fn collect_reclaimable(&self) -> Vec<(K, Arc<ResourceCell<V>>)> {
        let mut entries = self.entries.lock();
        let keys: Vec<K> = entries
            .iter()
            .filter(|(_, cell)| cell.is_reclaimable())
            .map(|(key, _)| key.clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| entries.remove(&key).map(|cell| (key, cell)))
            .collect()
    }
}
