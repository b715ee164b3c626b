//! Loader worker and its thread

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::backend::{
    AttribLocation, AttribSpecial, BufferKind, FilterMode, GraphicsContext, GraphicsHandle,
    TextureUpload, VertexArrayDescriptor,
};
use crate::error::{PipelineError, PipelineResult};
use crate::loader::{BuildJob, LoaderContext, MaterialBuilder};
use crate::resources::builtins::{self, MISSING_TEXTURE};
use crate::resources::{
    GpuMeshBuffers, ImageData, JobTarget, MeshData, MeshResource, TextureResource, VertexAttribute,
};

/// Lifecycle of a loader worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderState {
    Uninitialized,
    ContextAttached,
    Running,
    Draining,
    Terminated,
}

fn upload_image(
    ctx: &mut dyn GraphicsContext,
    label: &str,
    image: &ImageData,
    filter: FilterMode,
    build_mips: bool,
) -> PipelineResult<GraphicsHandle> {
    ctx.upload_texture(&TextureUpload {
        label,
        width: image.width,
        height: image.height,
        format: image.format,
        pixels: &image.pixels,
        filter,
        build_mips,
    })
}

fn upload_mesh(ctx: &mut dyn GraphicsContext, data: &MeshData) -> PipelineResult<GpuMeshBuffers> {
    let vertex = ctx.create_buffer(BufferKind::Vertex, &data.vertices)?;
    let index = match &data.indices {
        Some(indices) => Some(ctx.create_buffer(BufferKind::Index, &indices.bytes)?),
        None => None,
    };
    Ok(GpuMeshBuffers {
        vertex,
        index,
        vertex_array: None,
    })
}

/// Create the vertex array of an uploaded mesh on the calling context.
///
/// Every declared attribute is bound at its location; builtin locations the
/// mesh lacks get their constant default.
pub(crate) fn finalize_mesh(
    ctx: &mut dyn GraphicsContext,
    target: &JobTarget<MeshResource>,
) -> PipelineResult<()> {
    let mut mesh = target.cell().write();
    let (Some(data), Some(buffers)) = (mesh.data.as_ref(), mesh.buffers) else {
        return Err(PipelineError::InvalidMesh(format!(
            "{} has no uploaded buffers",
            target.name()
        )));
    };

    if data
        .attributes
        .iter()
        .any(|a| a.special == AttribSpecial::Integer && !a.ty.is_integer())
    {
        return Err(PipelineError::InvalidMesh(
            "can't create an integer attribute from a float value".into(),
        ));
    }
    let attributes: Vec<_> = data.attributes.iter().map(VertexAttribute::binding).collect();
    let defaults: Vec<_> = AttribLocation::BUILTIN
        .iter()
        .filter(|location| !data.has_attribute(**location))
        .filter_map(|location| location.default_value().map(|value| (*location, value)))
        .collect();

    let vertex_array = ctx.create_vertex_array(&VertexArrayDescriptor {
        vertex_buffer: buffers.vertex,
        index_buffer: buffers.index,
        stride: data.vertex_stride,
        attributes: &attributes,
        defaults: &defaults,
    })?;

    mesh.buffers = Some(GpuMeshBuffers {
        vertex_array: Some(vertex_array),
        ..buffers
    });
    mesh.finalize_pending = false;
    log::debug!("Finalized mesh {}", target.name());
    Ok(())
}

/// Executes [`BuildJob`]s on the loader graphics context
pub struct LoaderWorker {
    context: Box<dyn GraphicsContext>,
    shared: Arc<LoaderContext>,
    state: LoaderState,
}

impl LoaderWorker {
    pub fn new(shared: Arc<LoaderContext>, context: Box<dyn GraphicsContext>) -> Self {
        Self {
            context,
            shared,
            state: LoaderState::Uninitialized,
        }
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// Attach the context to the calling thread and upload the builtins
    pub fn start(&mut self) -> PipelineResult<()> {
        if self.state != LoaderState::Uninitialized {
            return Err(PipelineError::Context(format!(
                "loader already started ({:?})",
                self.state
            )));
        }
        if let Err(err) = self.context.attach() {
            self.state = LoaderState::Terminated;
            return Err(err);
        }
        self.state = LoaderState::ContextAttached;
        log::debug!("Loader context attached");

        if let Err(err) = self.upload_builtins() {
            self.context.detach();
            self.state = LoaderState::Terminated;
            return Err(err);
        }
        self.state = LoaderState::Running;
        log::info!("Loader running");
        Ok(())
    }

    fn upload_builtins(&mut self) -> PipelineResult<()> {
        let image = builtins::missing_texture();
        let gpu = upload_image(
            self.context.as_mut(),
            MISSING_TEXTURE,
            &image,
            FilterMode::Nearest,
            false,
        )?;
        drop(self.shared.textures.insert_pinned(
            MISSING_TEXTURE.to_string(),
            TextureResource {
                image: Some(image),
                gpu: Some(gpu),
                filter: FilterMode::Nearest,
                build_mips: false,
                owned: true,
                substituted: false,
            },
        ));
        self.shared.set_placeholder_texture(gpu);

        let mut uploaded = Vec::new();
        for (name, data) in builtins::meshes() {
            let buffers = upload_mesh(self.context.as_mut(), &data)?;
            let resource = MeshResource {
                data: Some(data),
                buffers: Some(buffers),
                finalize_pending: true,
                substituted: false,
            };
            drop(self.shared.meshes.insert_pinned(name.to_string(), resource));
            uploaded.push(name);
        }
        self.context.finish()?;

        for name in uploaded {
            if let Some(target) = self.shared.meshes.target(name) {
                self.shared.submit_main(BuildJob::FinalizeMesh(target));
            }
        }
        Ok(())
    }

    /// Block on the job queue until shutdown, then drain and detach
    pub fn run(&mut self) {
        while self.state == LoaderState::Running {
            match self.shared.jobs().wait_pop() {
                Some(job) if !self.shared.is_shutting_down() => {
                    self.execute(job);
                    self.shared.job_finished();
                }
                Some(job) => {
                    log::debug!("Dropping {job:?}: shutting down");
                    drop(job);
                    self.shared.job_finished();
                    self.state = LoaderState::Draining;
                }
                None => self.state = LoaderState::Draining,
            }
        }
        self.stop();
    }

    /// Execute every queued job without blocking; returns the count
    pub fn run_pending(&mut self) -> usize {
        let mut executed = 0;
        while self.state == LoaderState::Running {
            let Some(job) = self.shared.jobs().try_pop() else {
                break;
            };
            self.execute(job);
            self.shared.job_finished();
            executed += 1;
        }
        executed
    }

    /// Drop the remaining jobs unexecuted and detach the context
    pub fn stop(&mut self) {
        if self.state == LoaderState::Terminated {
            return;
        }
        self.state = LoaderState::Draining;
        let mut dropped = 0;
        while let Some(job) = self.shared.jobs().try_pop() {
            log::debug!("Dropping {job:?}: loader draining");
            drop(job);
            self.shared.job_finished();
            dropped += 1;
        }
        self.context.detach();
        self.state = LoaderState::Terminated;
        log::info!("Loader terminated ({dropped} jobs dropped)");
    }

    fn execute(&mut self, job: BuildJob) {
        log::debug!("Executing {job:?}");
        let label = format!("{job:?}");
        let result = match job {
            BuildJob::BuildMaterial(target) => {
                MaterialBuilder::new(self.context.as_mut(), &self.shared).build(&target)
            }
            BuildJob::LoadTexture(target) => self.load_texture(&target),
            BuildJob::LoadMesh(target) => self.load_mesh(target),
            BuildJob::FinalizeMesh(target) => Err(PipelineError::Context(format!(
                "mesh {} can only be finalized on the main context",
                target.name()
            ))),
            BuildJob::ReleaseHandles(handles) => self.release(&handles),
        };
        if let Err(err) = result {
            log::error!("{label} failed: {err}");
            self.shared.record_error(err);
        }
    }

    fn load_texture(&mut self, target: &JobTarget<TextureResource>) -> PipelineResult<()> {
        let path = target.name();
        let (filter, build_mips) = {
            let texture = target.cell().read();
            (texture.filter, texture.build_mips)
        };

        match self.shared.sources().images.decode(path) {
            Ok(image) => {
                let gpu = upload_image(self.context.as_mut(), path, &image, filter, build_mips)?;
                self.context.finish()?;
                let mut texture = target.cell().write();
                texture.image = Some(image);
                texture.gpu = Some(gpu);
                texture.owned = true;
                texture.substituted = false;
            }
            Err(err) => {
                log::warn!("Texture {path}: {err}; using {MISSING_TEXTURE}");
                let placeholder = self.shared.placeholder_texture().ok_or_else(|| {
                    PipelineError::ResourceNotFound(format!("placeholder for texture {path}"))
                })?;
                let mut texture = target.cell().write();
                texture.gpu = Some(placeholder);
                texture.owned = false;
                texture.substituted = true;
            }
        }
        Ok(())
    }

    fn load_mesh(&mut self, target: JobTarget<MeshResource>) -> PipelineResult<()> {
        let name = target.name().to_string();
        let decoded = self
            .shared
            .sources()
            .meshes
            .decode(&name)
            .map_err(PipelineError::from)
            .and_then(|data| data.validate().map(|()| data));
        let (data, substituted) = match decoded {
            Ok(data) => (data, false),
            Err(err) => {
                log::warn!("Mesh {name}: {err}; using {}", builtins::MISSING_MESH);
                (builtins::missing_mesh(), true)
            }
        };

        let buffers = upload_mesh(self.context.as_mut(), &data)?;
        self.context.finish()?;
        {
            let mut mesh = target.cell().write();
            mesh.data = Some(data);
            mesh.buffers = Some(buffers);
            mesh.finalize_pending = true;
            mesh.substituted = substituted;
        }
        self.shared.submit_main(BuildJob::FinalizeMesh(target));
        Ok(())
    }

    fn release(&mut self, handles: &[GraphicsHandle]) -> PipelineResult<()> {
        for handle in handles {
            self.context.delete(*handle)?;
        }
        Ok(())
    }
}

impl Drop for LoaderWorker {
    fn drop(&mut self) {
        if self.state != LoaderState::Uninitialized {
            self.stop();
        }
    }
}

/// A [`LoaderWorker`] running on its own thread
pub struct LoaderThread {
    shared: Arc<LoaderContext>,
    handle: Option<JoinHandle<()>>,
}

impl LoaderThread {
    /// Spawn the worker and wait for its startup to finish.
    ///
    /// A startup failure joins the thread and is returned as
    /// [`PipelineError::LoaderStartup`].
    pub fn spawn(
        shared: Arc<LoaderContext>,
        context: Box<dyn GraphicsContext>,
        name: &str,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<PipelineResult<()>>();
        let worker_shared = Arc::clone(&shared);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut worker = LoaderWorker::new(worker_shared, context);
                match worker.start() {
                    Ok(()) => {
                        let _ = ready_tx.send(Ok(()));
                        worker.run();
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .map_err(|e| PipelineError::Context(format!("failed to spawn loader thread: {e}")))?;

        let mut thread = Self {
            shared,
            handle: Some(handle),
        };
        let startup = match ready_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PipelineError::Context(format!(
                "loader startup timed out after {timeout:?}"
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::Context(
                "loader thread exited during startup".into(),
            )),
        };
        if let Err(err) = startup {
            thread.shutdown();
            return Err(PipelineError::LoaderStartup(Box::new(err)));
        }
        Ok(thread)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal shutdown and join the worker
    pub fn shutdown(&mut self) {
        self.shared.shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Loader thread panicked");
            }
        }
    }
}

impl Drop for LoaderThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
