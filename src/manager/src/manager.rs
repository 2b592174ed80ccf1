use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use skizze_sketches::{DomainInfo, QueryResult, Registry};
use skizze_storage::{
    validate_name, DataStore, InfoStore, MetadataStore, StateStore, StorageError, StorageResult,
};
use tokio::sync::OwnedMutexGuard;

use crate::domain::{DomainSlot, DomainState, Resident, SlotState};
use crate::error::{Error, Result};
use crate::flusher::Flusher;
use crate::options::ManagerOptions;

/// FlushReport sums up one sweep over the resident domains.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub failed: usize,
}

/// Manager owns the domains: which exist, which are resident in memory, and
/// when their state goes to the state store.
///
/// Each domain has a slot guarded by its own lock. The name -> slot map is
/// only locked long enough to look up or insert a slot, so operations on
/// different domains never wait for each other's loads or flushes. Only
/// domains in use or resident have a slot.
///
/// Manager is cheap to clone; clones share the same domains and stores.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

struct Inner {
    info: Arc<dyn MetadataStore>,
    data: Arc<dyn StateStore>,
    registry: Registry,
    options: ManagerOptions,

    slots: DashMap<String, Arc<DomainSlot>>,
    /// number of slots in SlotState::Resident
    resident: AtomicUsize,
    /// sum of the accounted footprints of the resident sketches
    resident_bytes: AtomicUsize,
    /// access clock for the LRU eviction
    ticks: AtomicU64,
    /// an eviction sweep is running
    evicting: AtomicBool,
}

impl Manager {
    /// open opens the durable stores under the given directories.
    pub fn open(
        info_dir: impl AsRef<Path>,
        data_dir: impl AsRef<Path>,
        options: ManagerOptions,
    ) -> Result<Self> {
        let info = InfoStore::open(info_dir)?;
        let data = DataStore::open(data_dir)?;
        Ok(Self::new(
            Arc::new(info),
            Arc::new(data),
            Registry::default(),
            options,
        ))
    }

    pub fn new(
        info: Arc<dyn MetadataStore>,
        data: Arc<dyn StateStore>,
        registry: Registry,
        options: ManagerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                info,
                data,
                registry,
                options,
                slots: DashMap::new(),
                resident: AtomicUsize::new(0),
                resident_bytes: AtomicUsize::new(0),
                ticks: AtomicU64::new(0),
                evicting: AtomicBool::new(false),
            }),
        }
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.inner.options
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// start_flusher spawns the background flush of dirty domains.
    pub fn start_flusher(&self) -> Flusher {
        Flusher::start(self.clone())
    }

    /// create_domain registers a new domain. The domain is not loaded until it
    /// is first used.
    pub async fn create_domain(&self, name: &str, sketch_type: &str, capacity: u64) -> Result<()> {
        validate_name(name)?;
        if !self.inner.registry.contains(sketch_type) {
            return Err(Error::InvalidRequest(format!(
                "unknown domain type {:?}",
                sketch_type
            )));
        }

        let (slot, mut state) = self.lock_slot(name).await;
        let r = self.create_locked(name, sketch_type, capacity, &state).await;
        self.release_idle(name, &slot, &mut state);
        drop(state);

        r?;
        tracing::info!(
            "domain {} created, type: {}, capacity: {}",
            name,
            sketch_type,
            capacity
        );
        Ok(())
    }

    async fn create_locked(
        &self,
        name: &str,
        sketch_type: &str,
        capacity: u64,
        state: &SlotState,
    ) -> Result<()> {
        if state.is_resident() {
            return Err(Error::DomainAlreadyExists(name.to_string()));
        }

        // the domain may exist while not being resident
        let key = name.to_string();
        if self.info(move |s| s.get_info(&key)).await?.is_some() {
            return Err(Error::DomainAlreadyExists(name.to_string()));
        }

        // a blob left behind by an earlier delete must not leak into the new domain
        self.inner.data.delete_data(name).await?;

        let info = DomainInfo::new(name, sketch_type, capacity);
        self.info(move |s| s.create_info(&info)).await
    }

    /// get_domains returns the names of all domains, resident or not.
    pub async fn get_domains(&self) -> Result<Vec<String>> {
        let infos = self.info(|s| s.get_all_info()).await?;
        Ok(infos.into_keys().collect())
    }

    /// get_domain_info returns the metadata record of a domain.
    pub async fn get_domain_info(&self, name: &str) -> Result<DomainInfo> {
        validate_name(name)?;
        let key = name.to_string();
        self.info(move |s| s.get_info(&key))
            .await?
            .ok_or_else(|| Error::DomainNotFound(name.to_string()))
    }

    /// add_to_domain ingests values into the sketch of a domain.
    pub async fn add_to_domain(&self, name: &str, values: &[Bytes]) -> Result<bool> {
        validate_name(name)?;

        let ok = {
            let mut state = self.lock_resident(name).await?;
            let r = resident(&mut state, name)?;
            let ok = r.sketch.add(values)?;
            if !values.is_empty() {
                r.dirty = true;
                self.account(r);
            }
            ok
        };

        self.schedule_eviction();
        Ok(ok)
    }

    /// get_count_for_domain queries the sketch of a domain. Nothing is written.
    pub async fn get_count_for_domain(&self, name: &str) -> Result<QueryResult> {
        validate_name(name)?;

        let result = {
            let mut state = self.lock_resident(name).await?;
            let r = resident(&mut state, name)?;
            r.sketch.query()?
        };

        self.schedule_eviction();
        Ok(result)
    }

    /// delete_from_domain removes values from the sketch of a domain. Sketches
    /// that cannot forget values fail with Error::NotSupported.
    pub async fn delete_from_domain(&self, name: &str, values: &[Bytes]) -> Result<bool> {
        validate_name(name)?;

        let ok = {
            let mut state = self.lock_resident(name).await?;
            let r = resident(&mut state, name)?;
            let ok = r.sketch.remove(values)?;
            if !values.is_empty() {
                r.dirty = true;
                self.account(r);
            }
            ok
        };

        self.schedule_eviction();
        Ok(ok)
    }

    /// delete_domain removes the metadata record, then drops the in-memory
    /// sketch without flushing it and deletes the state blob. Deleting an
    /// unknown domain succeeds.
    ///
    /// The metadata record decides: if it cannot be deleted the domain stays
    /// exactly as it was, pending writes included. Once it is gone the domain
    /// is gone, and a state blob that fails to delete is only garbage.
    pub async fn delete_domain(&self, name: &str) -> Result<()> {
        validate_name(name)?;

        let (slot, mut state) = self.lock_slot(name).await;

        let key = name.to_string();
        let existed = match self.info(move |s| s.delete_info(&key)).await {
            Ok(existed) => existed,
            Err(e) => {
                self.release_idle(name, &slot, &mut state);
                return Err(e);
            }
        };

        if let SlotState::Resident(r) = mem::replace(&mut *state, SlotState::Removed) {
            self.release(&r);
        }
        if let Err(e) = self.inner.data.delete_data(name).await {
            tracing::warn!("domain {} deleted, but its state was not: {}", name, e);
        }
        if existed {
            tracing::info!("domain {} deleted", name);
        }

        // forget the slot only now, so that nobody reloads the domain while
        // its records are being deleted
        self.forget(name, &slot);
        Ok(())
    }

    /// evict writes a resident domain back if dirty and drops it from memory.
    /// Returns false if the domain was not resident.
    pub async fn evict(&self, name: &str) -> Result<bool> {
        validate_name(name)?;

        let slot = match self.inner.slots.get(name) {
            Some(slot) => slot.value().clone(),
            None => return Ok(false),
        };
        let mut state = slot.state.lock().await;
        self.evict_locked(name, &slot, &mut state).await
    }

    /// flush_all writes every dirty resident domain to the state store.
    ///
    /// Each domain is locked only for its own flush. A failed flush leaves the
    /// domain dirty, so the next sweep retries it.
    pub async fn flush_all(&self) -> FlushReport {
        let slots: Vec<(String, Arc<DomainSlot>)> = self
            .inner
            .slots
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut report = FlushReport::default();
        for (name, slot) in slots {
            let mut state = slot.state.lock().await;
            match self.flush_locked(&name, &mut state).await {
                Ok(true) => report.flushed += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("failed to flush domain {}: {}", name, e);
                }
            }
        }

        report
    }

    /// domain_state returns the cache residency of a domain.
    pub async fn domain_state(&self, name: &str) -> DomainState {
        let slot = match self.inner.slots.get(name) {
            Some(slot) => slot.value().clone(),
            None => return DomainState::Absent,
        };
        let state = slot.state.lock().await;
        state.public()
    }

    /// resident_count returns the number of domains held in memory.
    pub fn resident_count(&self) -> usize {
        self.inner.resident.load(Ordering::SeqCst)
    }

    /// resident_bytes returns the estimated memory held by resident sketches.
    pub fn resident_bytes(&self) -> usize {
        self.inner.resident_bytes.load(Ordering::SeqCst)
    }

    /// close writes back all dirty domains. The stores are closed when the
    /// last clone of the manager is dropped.
    pub async fn close(self) -> FlushReport {
        let report = self.flush_all().await;
        if report.failed > 0 {
            tracing::warn!("{} domains could not be flushed on close", report.failed);
        }
        tracing::info!("manager closed, {} domains flushed", report.flushed);
        report
    }

    /// info runs a metadata store call off the runtime threads.
    async fn info<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn MetadataStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let info = self.inner.info.clone();
        let r = tokio::task::spawn_blocking(move || f(info.as_ref()))
            .await
            .map_err(Error::task)?;
        Ok(r?)
    }

    fn tick(&self) -> u64 {
        self.inner.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// lock_slot returns the live slot of name, locked.
    async fn lock_slot(&self, name: &str) -> (Arc<DomainSlot>, OwnedMutexGuard<SlotState>) {
        loop {
            let slot = self
                .inner
                .slots
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(DomainSlot::new(self.tick())))
                .value()
                .clone();

            let state = slot.state.clone().lock_owned().await;
            if let SlotState::Removed = *state {
                self.forget(name, &slot);
                continue;
            }
            return (slot, state);
        }
    }

    /// lock_resident returns the locked state of name, loading the domain if
    /// it is not in memory.
    async fn lock_resident(&self, name: &str) -> Result<OwnedMutexGuard<SlotState>> {
        let (slot, mut state) = self.lock_slot(name).await;

        if let SlotState::Absent = *state {
            match self.load(name).await {
                Ok(r) => {
                    self.admit(&r);
                    *state = SlotState::Resident(r);
                    tracing::debug!("domain {} loaded", name);
                }
                Err(e) => {
                    self.release_idle(name, &slot, &mut state);
                    return Err(e);
                }
            }
        }

        slot.touch(self.tick());
        Ok(state)
    }

    /// load builds the sketch of a domain from its metadata record and state blob.
    async fn load(&self, name: &str) -> Result<Resident> {
        let key = name.to_string();
        let info = self
            .info(move |s| s.get_info(&key))
            .await?
            .ok_or_else(|| Error::DomainNotFound(name.to_string()))?;

        let mut sketch = self.inner.registry.create(&info)?;
        match self.inner.data.load_data(name, 0, 0).await {
            Ok(data) => sketch.decode(&data).map_err(|source| Error::CorruptState {
                name: name.to_string(),
                source,
            })?,
            // never flushed
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(Error::Storage(e)),
        }

        let bytes = sketch.bytes();
        Ok(Resident {
            sketch,
            dirty: false,
            bytes,
        })
    }

    /// flush_locked writes a dirty resident sketch. Returns whether anything was written.
    async fn flush_locked(&self, name: &str, state: &mut SlotState) -> Result<bool> {
        let r = match state.resident_mut() {
            Some(r) if r.dirty => r,
            _ => return Ok(false),
        };

        let data = r.sketch.encode();
        self.inner.data.save_data(name, &data, 0).await?;
        r.dirty = false;
        tracing::debug!("domain {} flushed, {} bytes", name, data.len());
        Ok(true)
    }

    async fn evict_locked(
        &self,
        name: &str,
        slot: &Arc<DomainSlot>,
        state: &mut SlotState,
    ) -> Result<bool> {
        if !state.is_resident() {
            return Ok(false);
        }

        self.flush_locked(name, state).await?;
        if let SlotState::Resident(r) = mem::replace(state, SlotState::Removed) {
            self.release(&r);
            tracing::debug!("domain {} evicted, {} bytes released", name, r.bytes);
        }
        self.forget(name, slot);
        Ok(true)
    }

    /// over_capacity tells whether the resident domains exceed either cache bound.
    fn over_capacity(&self) -> bool {
        let options = &self.inner.options;
        (options.cache_capacity() > 0 && self.resident_count() > options.cache_capacity())
            || (options.cache_bytes() > 0 && self.resident_bytes() > options.cache_bytes())
    }

    /// schedule_eviction starts a background eviction sweep if the cache is
    /// over capacity and no sweep is running. Callers never wait for it.
    fn schedule_eviction(&self) {
        if !self.over_capacity() || self.inner.evicting.swap(true, Ordering::SeqCst) {
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let evicted = manager.evict_lru().await;
            manager.inner.evicting.store(false, Ordering::SeqCst);
            // the cache may have grown again while the sweep ran
            if evicted > 0 {
                manager.schedule_eviction();
            }
        });
    }

    /// evict_lru evicts the least recently used domains until the cache fits
    /// its bounds. Busy domains are skipped. Returns the number evicted.
    async fn evict_lru(&self) -> usize {
        let mut candidates: Vec<(u64, String, Arc<DomainSlot>)> = self
            .inner
            .slots
            .iter()
            .map(|e| (e.value().last_access(), e.key().clone(), e.value().clone()))
            .collect();
        candidates.sort_by_key(|c| c.0);

        let mut evicted = 0;
        for (_, name, slot) in candidates {
            if !self.over_capacity() {
                break;
            }

            let mut state = match slot.state.try_lock() {
                Ok(state) => state,
                Err(_) => continue,
            };
            match self.evict_locked(&name, &slot, &mut state).await {
                Ok(true) => evicted += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("failed to evict domain {}: {}", name, e),
            }
        }

        evicted
    }

    fn admit(&self, r: &Resident) {
        self.inner.resident.fetch_add(1, Ordering::SeqCst);
        self.inner.resident_bytes.fetch_add(r.bytes, Ordering::SeqCst);
    }

    fn release(&self, r: &Resident) {
        self.inner.resident.fetch_sub(1, Ordering::SeqCst);
        self.inner.resident_bytes.fetch_sub(r.bytes, Ordering::SeqCst);
    }

    /// account brings the footprint of a mutated sketch up to date.
    fn account(&self, r: &mut Resident) {
        let bytes = r.sketch.bytes();
        if bytes > r.bytes {
            self.inner
                .resident_bytes
                .fetch_add(bytes - r.bytes, Ordering::SeqCst);
        } else {
            self.inner
                .resident_bytes
                .fetch_sub(r.bytes - bytes, Ordering::SeqCst);
        }
        r.bytes = bytes;
    }

    /// release_idle drops a slot that holds nothing from the map.
    fn release_idle(&self, name: &str, slot: &Arc<DomainSlot>, state: &mut SlotState) {
        if let SlotState::Absent = state {
            *state = SlotState::Removed;
            self.forget(name, slot);
        }
    }

    /// forget removes slot from the map, unless name already maps to a newer slot.
    fn forget(&self, name: &str, slot: &Arc<DomainSlot>) {
        self.inner
            .slots
            .remove_if(name, |_, current| Arc::ptr_eq(current, slot));
    }
}

fn resident<'a>(state: &'a mut SlotState, name: &str) -> Result<&'a mut Resident> {
    state
        .resident_mut()
        .ok_or_else(|| Error::DomainNotFound(name.to_string()))
}
