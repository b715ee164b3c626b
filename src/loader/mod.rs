//! Asynchronous resource loading
//!
//! [`LoaderContext`] is the state shared by the main thread and the loader
//! thread: the two job queues, the resource caches and the material
//! definitions. The main thread requests resources through it and gets a
//! placeholder back immediately; the [`LoaderWorker`] builds the real
//! object on the loader graphics context and overwrites the placeholder in
//! place.

mod job;
mod material_builder;
pub mod queue;
mod sources;
mod worker;

pub use job::BuildJob;
pub use material_builder::{query_uniform_slot, MaterialBuilder};
pub use queue::{CrossThreadQueue, QueueClosed};
pub use sources::*;
pub use worker::{LoaderState, LoaderThread, LoaderWorker};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::backend::{GraphicsContext, GraphicsHandle};
use crate::error::{PipelineError, PipelineResult};
use crate::resources::builtins::{self, MISSING_MATERIAL};
use crate::resources::{
    shader_header, Handle, JobTarget, MaterialDef, MaterialInstance, MeshResource, ProgramObject,
    ResourceCache, ShaderKey, ShaderObject, ShaderSourceKey, TextureResource,
};
use crate::PipelineConfig;

/// Number of live entries in each cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceCounts {
    pub materials: usize,
    pub programs: usize,
    pub shaders: usize,
    pub textures: usize,
    pub meshes: usize,
}

/// State shared between the main thread and the loader thread
pub struct LoaderContext {
    jobs: CrossThreadQueue<BuildJob>,
    main_jobs: CrossThreadQueue<BuildJob>,
    pub(crate) materials: ResourceCache<String, MaterialInstance>,
    pub(crate) programs: ResourceCache<ShaderKey, ProgramObject>,
    pub(crate) shaders: ResourceCache<ShaderSourceKey, ShaderObject>,
    pub(crate) textures: ResourceCache<String, TextureResource>,
    pub(crate) meshes: ResourceCache<String, MeshResource>,
    material_defs: RwLock<HashMap<String, MaterialDef>>,
    errors: Mutex<Vec<PipelineError>>,
    sources: AssetSources,
    shader_header: String,
    max_instances: u32,
    placeholder: OnceLock<GraphicsHandle>,
    shutting_down: AtomicBool,
    outstanding: Mutex<usize>,
    idle: Condvar,
}

impl LoaderContext {
    pub fn new(config: &PipelineConfig, sources: AssetSources) -> Self {
        let mut material_defs = HashMap::new();
        material_defs.insert(MISSING_MATERIAL.to_string(), builtins::missing_material());

        Self {
            jobs: CrossThreadQueue::new(),
            main_jobs: CrossThreadQueue::new(),
            materials: ResourceCache::new(),
            programs: ResourceCache::new(),
            shaders: ResourceCache::new(),
            textures: ResourceCache::new(),
            meshes: ResourceCache::new(),
            material_defs: RwLock::new(material_defs),
            errors: Mutex::new(Vec::new()),
            sources,
            shader_header: shader_header(config.max_instances),
            max_instances: config.max_instances,
            placeholder: OnceLock::new(),
            shutting_down: AtomicBool::new(false),
            outstanding: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    fn ensure_running(&self) -> PipelineResult<()> {
        if self.is_shutting_down() {
            return Err(PipelineError::ShuttingDown);
        }
        Ok(())
    }

    /// Queue a job for the loader thread
    pub(crate) fn submit(&self, job: BuildJob) -> PipelineResult<()> {
        *self.outstanding.lock() += 1;
        match self.jobs.push(job) {
            Ok(()) => Ok(()),
            Err(QueueClosed(job)) => {
                log::debug!("Dropping {job:?}: loader queue closed");
                self.job_finished();
                Err(PipelineError::ShuttingDown)
            }
        }
    }

    /// Queue a job for the main thread
    pub(crate) fn submit_main(&self, job: BuildJob) {
        if let Err(QueueClosed(job)) = self.main_jobs.push(job) {
            log::debug!("Dropping {job:?}: main queue closed");
        }
    }

    pub(crate) fn jobs(&self) -> &CrossThreadQueue<BuildJob> {
        &self.jobs
    }

    pub(crate) fn job_finished(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }

    /// Jobs queued for the loader thread or in progress there
    pub fn pending_jobs(&self) -> usize {
        *self.outstanding.lock()
    }

    /// Block until the loader has no queued work; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            if self.idle.wait_until(&mut outstanding, deadline).timed_out() {
                return *outstanding == 0;
            }
        }
        true
    }

    /// Mesh by name, decoded and uploaded asynchronously on first request
    pub fn load_mesh(&self, name: &str) -> PipelineResult<Handle<MeshResource>> {
        self.ensure_running()?;
        let mut submitted = Ok(());
        let handle = self.meshes.get_or_insert_with(
            name.to_string(),
            MeshResource::default,
            |cell| submitted = self.submit(BuildJob::LoadMesh(JobTarget::new(cell))),
        );
        submitted.map(|()| handle)
    }

    /// Texture by path, decoded and uploaded asynchronously on first request
    pub fn load_texture(&self, path: &str) -> PipelineResult<Handle<TextureResource>> {
        self.ensure_running()?;
        let mut submitted = Ok(());
        let handle = self.textures.get_or_insert_with(
            path.to_string(),
            TextureResource::pending,
            |cell| submitted = self.submit(BuildJob::LoadTexture(JobTarget::new(cell))),
        );
        submitted.map(|()| handle)
    }

    /// Material by name, built asynchronously on first request
    pub fn load_material(&self, name: &str) -> PipelineResult<Handle<MaterialInstance>> {
        self.ensure_running()?;
        let mut submitted = Ok(());
        let handle = self.materials.get_or_insert_with(
            name.to_string(),
            MaterialInstance::default,
            |cell| submitted = self.submit(BuildJob::BuildMaterial(JobTarget::new(cell))),
        );
        if name == MISSING_MATERIAL {
            self.materials.pin(name);
        }
        submitted.map(|()| handle)
    }

    /// Store a material definition, rebuilding the material if it is cached
    pub fn upsert_material_definition(&self, name: &str, def: MaterialDef) -> PipelineResult<()> {
        self.ensure_running()?;
        self.material_defs.write().insert(name.to_string(), def);
        if let Some(target) = self.materials.target(name) {
            log::debug!("Material definition {name} changed, rebuilding");
            self.submit(BuildJob::BuildMaterial(target))?;
        }
        Ok(())
    }

    pub fn material_definition(&self, name: &str) -> Option<MaterialDef> {
        self.material_defs.read().get(name).cloned()
    }

    pub(crate) fn shader_source(&self, path: &str) -> PipelineResult<String> {
        Ok(self.sources.shaders.load(path)?)
    }

    pub(crate) fn sources(&self) -> &AssetSources {
        &self.sources
    }

    /// Preamble prepended to every shader stage
    pub fn shader_header(&self) -> &str {
        &self.shader_header
    }

    pub fn max_instances(&self) -> u32 {
        self.max_instances
    }

    /// GPU texture bound in place of textures that are not uploaded yet
    pub fn placeholder_texture(&self) -> Option<GraphicsHandle> {
        self.placeholder.get().copied()
    }

    pub(crate) fn set_placeholder_texture(&self, handle: GraphicsHandle) {
        if self.placeholder.set(handle).is_err() {
            log::warn!("Placeholder texture registered twice");
        }
    }

    pub(crate) fn record_error(&self, err: PipelineError) {
        self.errors.lock().push(err);
    }

    /// Failures recorded by loader jobs
    pub fn errors(&self) -> Vec<PipelineError> {
        self.errors.lock().clone()
    }

    pub fn take_errors(&self) -> Vec<PipelineError> {
        std::mem::take(&mut *self.errors.lock())
    }

    pub fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            materials: self.materials.len(),
            programs: self.programs.len(),
            shaders: self.shaders.len(),
            textures: self.textures.len(),
            meshes: self.meshes.len(),
        }
    }

    /// Run pending `FinalizeMesh` jobs on the main context
    pub fn drain_finalize_queue(&self, ctx: &mut dyn GraphicsContext) -> usize {
        let mut finalized = 0;
        while let Some(job) = self.main_jobs.try_pop() {
            match job {
                BuildJob::FinalizeMesh(target) => match worker::finalize_mesh(ctx, &target) {
                    Ok(()) => finalized += 1,
                    Err(err) => {
                        log::error!("Failed to finalize mesh {}: {err}", target.name());
                        self.record_error(err);
                    }
                },
                other => log::warn!("Ignoring {other:?} on the main queue"),
            }
        }
        finalized
    }

    /// Remove unreferenced cache entries and delete their graphics objects.
    ///
    /// Objects owned by `main` are deleted directly; the rest are sent to
    /// the loader thread. Returns the number of reclaimed entries.
    pub fn collect_garbage(&self, main: &mut dyn GraphicsContext) -> usize {
        let mut loader_owned = Vec::new();
        let mut release = |handle: GraphicsHandle| {
            if handle.context() != main.kind() {
                loader_owned.push(handle);
            } else if let Err(err) = main.delete(handle) {
                log::error!("Failed to delete {:?}: {err}", handle.kind());
                self.record_error(err);
            }
        };

        // Materials first: dropping them releases programs and textures.
        let mut reclaimed = self.materials.collect_reclaimable().len();

        for (_, cell) in self.programs.collect_reclaimable() {
            let mut program = cell.write();
            if let Some(handle) = program.handle.take() {
                release(handle);
            }
            program.shaders.clear();
            reclaimed += 1;
        }
        for (_, cell) in self.shaders.collect_reclaimable() {
            if let Some(handle) = cell.write().handle.take() {
                release(handle);
            }
            reclaimed += 1;
        }
        for (_, cell) in self.textures.collect_reclaimable() {
            let mut texture = cell.write();
            let owned = texture.owned;
            // Aliases of the placeholder are not deleted.
            if let Some(handle) = texture.gpu.take() {
                if owned {
                    release(handle);
                }
            }
            reclaimed += 1;
        }
        for (_, cell) in self.meshes.collect_reclaimable() {
            if let Some(buffers) = cell.write().buffers.take() {
                if let Some(vertex_array) = buffers.vertex_array {
                    release(vertex_array);
                }
                release(buffers.vertex);
                if let Some(index) = buffers.index {
                    release(index);
                }
            }
            reclaimed += 1;
        }

        if !loader_owned.is_empty() {
            log::debug!("Releasing {} loader objects", loader_owned.len());
            if let Err(err) = self.submit(BuildJob::ReleaseHandles(loader_owned)) {
                log::warn!("Loader objects not released: {err}");
            }
        }
        if reclaimed > 0 {
            log::info!("Reclaimed {reclaimed} unreferenced resources");
        }
        reclaimed
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Refuse new work and wake the loader so it can drain
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            log::debug!("Loader shutting down");
        }
        self.jobs.close();
        self.main_jobs.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn context() -> LoaderContext {
        LoaderContext::new(
            &PipelineConfig::default(),
            AssetSources::memory(Arc::new(MemorySource::new())),
        )
    }

    #[test]
    fn test_repeated_loads_enqueue_once() {
        let ctx = context();
        let first = ctx.load_mesh("cube").unwrap();
        let second = ctx.load_mesh("cube").unwrap();

        assert!(Handle::ptr_eq(&first, &second));
        assert_eq!(ctx.pending_jobs(), 1);
        assert!(!first.read().is_draw_ready());
    }

    #[test]
    fn test_upsert_rebuilds_cached_material() {
        let ctx = context();
        let def = MaterialDef::new(ShaderKey::new("a", "a"));
        ctx.upsert_material_definition("m", def.clone()).unwrap();
        assert_eq!(ctx.pending_jobs(), 0);

        let _material = ctx.load_material("m").unwrap();
        assert_eq!(ctx.pending_jobs(), 1);
        ctx.upsert_material_definition("m", def).unwrap();
        assert_eq!(ctx.pending_jobs(), 2);
    }

    #[test]
    fn test_requests_after_shutdown_fail() {
        let ctx = context();
        ctx.shutdown();
        assert!(matches!(ctx.load_texture("a.png"), Err(PipelineError::ShuttingDown)));
        assert!(matches!(
            ctx.upsert_material_definition("m", MaterialDef::default()),
            Err(PipelineError::ShuttingDown)
        ));
        assert!(ctx.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_idle_times_out_with_pending_work() {
        let ctx = context();
        let _texture = ctx.load_texture("a.png").unwrap();
        assert!(!ctx.wait_idle(Duration::from_millis(10)));
        drop(ctx.jobs().try_pop());
        ctx.job_finished();
        assert!(ctx.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_missing_material_is_registered_and_pinned() {
        let ctx = context();
        assert_eq!(
            ctx.material_definition(MISSING_MATERIAL),
            Some(builtins::missing_material())
        );
        drop(ctx.load_material(MISSING_MATERIAL).unwrap());
        drop(ctx.jobs().try_pop());
        assert!(ctx.materials.collect_reclaimable().is_empty());
    }

    #[test]
    fn test_garbage_respects_holders_and_jobs() {
        let device = crate::backend::HeadlessDevice::new();
        let mut main = device.context(crate::backend::ContextKind::Main);
        main.attach().unwrap();
        let ctx = context();

        let held = ctx.load_mesh("held").unwrap();
        drop(ctx.load_mesh("queued").unwrap());
        assert_eq!(ctx.collect_garbage(&mut main), 0);

        while ctx.jobs().try_pop().is_some() {
            ctx.job_finished();
        }
        assert_eq!(ctx.collect_garbage(&mut main), 1);
        assert_eq!(ctx.resource_counts().meshes, 1);
        drop(held);
    }
}
