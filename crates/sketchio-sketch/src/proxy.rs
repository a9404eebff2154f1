//! Persistence proxy
//!
//! A [`SketchProxy`] owns one sketch and its metadata record and decides
//! when their state reaches storage:
//!
//! - synchronously after every `save_threshold_ops`-th mutation,
//! - from a background autosave task every `autosave_interval` while dirty,
//! - on [`SketchProxy::flush`] and [`SketchProxy::shutdown`].
//!
//! A save writes the marshalled sketch at offset 0 of the data file,
//! flushes the file and then replaces the metadata record. Mutations never
//! fail because of a save; save errors on that path are logged and the
//! proxy stays dirty so the next save retries.

use crate::factory;
use crate::sketch::{QueryResult, Sketch};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sketchio_common::{
    Error, PROP_ADDS, PROP_REMOVES, PersistConfig, Result, SketchId, SketchInfo, SketchKind,
};
use sketchio_storage::StorageManager;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Save policy of a proxy
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Save synchronously every N mutations
    pub save_threshold_ops: u64,
    /// Background save period while dirty
    pub autosave_interval: Duration,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self::from(&PersistConfig::default())
    }
}

impl From<&PersistConfig> for ProxyOptions {
    fn from(config: &PersistConfig) -> Self {
        Self {
            save_threshold_ops: config.save_threshold_ops,
            autosave_interval: config.autosave_interval(),
        }
    }
}

/// Answer to [`SketchProxy::count`]
#[derive(Debug, Clone, Serialize)]
pub struct CountReport {
    pub id: SketchId,
    pub kind: SketchKind,
    pub properties: BTreeMap<String, f64>,
    pub result: QueryResult,
}

#[derive(Debug)]
struct ProxyState {
    info: SketchInfo,
    sketch: Box<dyn Sketch>,
    /// Mutations since the proxy was opened
    ops: u64,
    dirty: bool,
    deleted: bool,
}

enum Mutation {
    Add,
    Remove,
    Clear,
}

/// One sketch plus the policy that persists it
pub struct SketchProxy {
    id: SketchId,
    kind: SketchKind,
    storage: Arc<StorageManager>,
    options: ProxyOptions,
    state: RwLock<ProxyState>,
    saves: AtomicU64,
    stop_tx: watch::Sender<bool>,
    autosave: Mutex<Option<JoinHandle<()>>>,
}

impl SketchProxy {
    /// Create a new sketch, persist its initial state and start autosaving
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(
        mut info: SketchInfo,
        storage: Arc<StorageManager>,
        options: ProxyOptions,
    ) -> Result<Arc<Self>> {
        let runtime = current_runtime()?;
        let sketch = factory::new_sketch(&mut info)?;
        storage.create(&info.id)?;

        let proxy = Self::build(info, sketch, storage, options, true);
        proxy.save(true)?;
        proxy.start_autosave(&runtime);
        info!(sketch_id = %proxy.id, kind = %proxy.kind, "created sketch");
        Ok(proxy)
    }

    /// Restore a sketch from its data file and start autosaving
    ///
    /// Must be called from within a tokio runtime.
    pub fn load(
        info: SketchInfo,
        storage: Arc<StorageManager>,
        options: ProxyOptions,
    ) -> Result<Arc<Self>> {
        let runtime = current_runtime()?;
        let data = storage.load_data(&info.id, 0, 0)?;
        let sketch = factory::unmarshal(&info, &data)?;

        let proxy = Self::build(info, sketch, storage, options, false);
        proxy.start_autosave(&runtime);
        debug!(sketch_id = %proxy.id, bytes = data.len(), "loaded sketch");
        Ok(proxy)
    }

    /// Load the metadata record of `id`, then [`load`](Self::load) it
    pub fn open(
        id: &SketchId,
        storage: Arc<StorageManager>,
        options: ProxyOptions,
    ) -> Result<Arc<Self>> {
        let info = storage.load_info(id)?;
        Self::load(info, storage, options)
    }

    fn build(
        info: SketchInfo,
        sketch: Box<dyn Sketch>,
        storage: Arc<StorageManager>,
        options: ProxyOptions,
        dirty: bool,
    ) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: info.id.clone(),
            kind: info.kind,
            storage,
            options,
            state: RwLock::new(ProxyState {
                info,
                sketch,
                ops: 0,
                dirty,
                deleted: false,
            }),
            saves: AtomicU64::new(0),
            stop_tx,
            autosave: Mutex::new(None),
        })
    }

    fn start_autosave(self: &Arc<Self>, runtime: &Handle) {
        let task = runtime.spawn(autosave_loop(
            Arc::downgrade(self),
            self.options.autosave_interval,
            self.stop_tx.subscribe(),
        ));
        *self.autosave.lock() = Some(task);
    }

    fn stop_autosave(&self) {
        self.stop_tx.send_replace(true);
        if let Some(task) = self.autosave.lock().take() {
            task.abort();
        }
    }

    /// Sketch identifier
    pub fn id(&self) -> &SketchId {
        &self.id
    }

    /// Sketch variant
    pub const fn kind(&self) -> SketchKind {
        self.kind
    }

    /// Snapshot of the metadata record
    pub fn info(&self) -> SketchInfo {
        self.state.read().info.clone()
    }

    /// Whether in-memory state is newer than storage
    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Mutations since the proxy was opened
    pub fn operations(&self) -> u64 {
        self.state.read().ops
    }

    /// Completed saves since the proxy was opened
    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Add keys to the sketch
    pub fn add<V: AsRef<[u8]>>(&self, values: &[V]) -> Result<bool> {
        let values: Vec<&[u8]> = values.iter().map(|v| v.as_ref()).collect();
        self.mutate(Mutation::Add, &values)
    }

    /// Remove keys from the sketch
    ///
    /// Returns [`Error::Unsupported`] for variants without removal.
    pub fn remove<V: AsRef<[u8]>>(&self, values: &[V]) -> Result<bool> {
        let values: Vec<&[u8]> = values.iter().map(|v| v.as_ref()).collect();
        self.mutate(Mutation::Remove, &values)
    }

    /// Reset the sketch to empty, keeping its sizing
    pub fn clear(&self) -> Result<bool> {
        self.mutate(Mutation::Clear, &[])
    }

    fn mutate(&self, mutation: Mutation, values: &[&[u8]]) -> Result<bool> {
        let mut state = self.state.write();
        if state.deleted {
            return Err(Error::NotFound(self.id.to_string()));
        }

        state.ops += 1;
        state.dirty = true;
        let result = match mutation {
            Mutation::Add => {
                state.info.bump(PROP_ADDS);
                state.sketch.add(values)
            }
            Mutation::Remove => {
                state.info.bump(PROP_REMOVES);
                state.sketch.remove(values)
            }
            Mutation::Clear => {
                state.info.set_property(PROP_ADDS, 0.0);
                state.info.set_property(PROP_REMOVES, 0.0);
                state.sketch.reset();
                Ok(true)
            }
        };

        if let Err(e) = self.save_locked(&mut state, false) {
            error!(sketch_id = %self.id, "failed to save sketch: {}", e);
        }
        result
    }

    /// Persist the sketch if it is dirty and either `force` is set or the
    /// operation counter sits on the save threshold
    pub fn save(&self, force: bool) -> Result<()> {
        let mut state = self.state.write();
        self.save_locked(&mut state, force)
    }

    fn save_locked(&self, state: &mut ProxyState, force: bool) -> Result<()> {
        if !state.dirty || state.deleted {
            return Ok(());
        }
        if !force && state.ops % self.options.save_threshold_ops.max(1) != 0 {
            return Ok(());
        }

        state.dirty = false;
        if let Err(e) = self.persist(state) {
            state.dirty = true;
            return Err(e);
        }
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn persist(&self, state: &ProxyState) -> Result<()> {
        let data = state.sketch.marshal()?;
        let len = data.len();
        self.storage.save_data(&self.id, data, 0)?;
        self.storage.flush_data(&self.id)?;
        self.storage.save_info(&state.info)?;
        debug!(sketch_id = %self.id, bytes = len, ops = state.ops, "saved sketch");
        Ok(())
    }

    /// Save now, regardless of the operation threshold
    pub fn flush(&self) -> Result<()> {
        self.save(true)
    }

    /// Answer a count query together with the current metadata
    pub fn count<V: AsRef<[u8]>>(&self, values: &[V]) -> CountReport {
        let values: Vec<&[u8]> = values.iter().map(|v| v.as_ref()).collect();
        let state = self.state.read();
        CountReport {
            id: self.id.clone(),
            kind: self.kind,
            properties: state.info.properties.clone(),
            result: state.sketch.query(&values),
        }
    }

    /// Final save, then stop the autosave task
    pub fn shutdown(&self) -> Result<()> {
        let result = self.save(true);
        self.stop_autosave();
        debug!(sketch_id = %self.id, "sketch proxy shut down");
        result
    }

    /// Drop the sketch and everything stored for it
    ///
    /// Unsaved state is discarded. Further mutations fail with
    /// [`Error::NotFound`].
    pub fn delete(&self) -> Result<()> {
        self.stop_autosave();
        let mut state = self.state.write();
        state.deleted = true;
        state.dirty = false;
        self.storage.delete_data(&self.id)?;
        self.storage.delete_info(&self.id)?;
        info!(sketch_id = %self.id, "deleted sketch");
        Ok(())
    }
}

impl Drop for SketchProxy {
    fn drop(&mut self) {
        if let Some(task) = self.autosave.get_mut().take() {
            task.abort();
        }
        if self.state.get_mut().dirty {
            warn!(sketch_id = %self.id, "sketch proxy dropped with unsaved changes");
        }
    }
}

impl std::fmt::Debug for SketchProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SketchProxy")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("options", &self.options)
            .field("saves", &self.saves())
            .finish_non_exhaustive()
    }
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|e| Error::internal(format!("autosave needs a tokio runtime: {e}")))
}

/// Save the proxy every `interval` while it is dirty
///
/// Exits when the proxy is dropped or stopped.
async fn autosave_loop(weak: Weak<SketchProxy>, interval: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }

        let Some(proxy) = weak.upgrade() else {
            break;
        };
        if !proxy.is_dirty() {
            continue;
        }

        let saved = tokio::task::spawn_blocking(move || {
            let result = proxy.save(true);
            (proxy, result)
        })
        .await;
        match saved {
            Ok((proxy, Err(e))) => {
                error!(sketch_id = %proxy.id, "autosave failed: {}", e);
            }
            Ok((proxy, Ok(()))) => {
                debug!(sketch_id = %proxy.id, "autosaved sketch");
            }
            Err(e) => {
                error!("autosave task failed: {}", e);
                break;
            }
        }
    }
}
