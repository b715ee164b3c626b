//! Main-thread rendering pipeline
//!
//! A frame runs in the following order:
//!
//! 1. `begin_frame` - finalize meshes uploaded by the loader thread
//! 2. `add_draw_task` - queue instances into the user passes
//! 3. `render` - geometry pass (`Standard`) into the geometry buffer, then
//!    `PostLighting` into the lighting buffer
//! 4. `end_frame` - overlay panels under an identity projection, then
//!    `PostEffect`, mip resolve, blit to the default framebuffer and present
//!
//! Resource requests made through the pipeline return placeholders at once;
//! the loader thread fills them in over the following frames.

mod batcher;
mod panel;
mod render_target;

pub use batcher::{DrawBatcher, DrawTask, FlushStats, Instance, RenderPass};
pub use panel::{Panel, PanelId, PanelSet};
pub use render_target::{AttachmentSlot, RenderTarget, RenderTargetId, RenderTargetManager};

use std::sync::Arc;

use glam::Mat4;

use crate::backend::{BlitRegion, ClearFlags, GraphicsContext};
use crate::error::{PipelineError, PipelineResult};
use crate::loader::{self, AssetSources, LoaderContext, LoaderThread};
use crate::resources::builtins::QUAD_MESH;
use crate::resources::{Handle, MaterialDef, MaterialInstance, MeshResource, TextureResource};
use crate::PipelineConfig;

/// Owns the main graphics context and drives frames
pub struct Pipeline {
    config: PipelineConfig,
    main: Box<dyn GraphicsContext>,
    loader: Arc<LoaderContext>,
    thread: Option<LoaderThread>,
    targets: RenderTargetManager,
    batcher: DrawBatcher,
    panels: PanelSet,
    /// Batches panels apart from user tasks
    overlay: DrawBatcher,
    /// Never empty; the last entry is current
    projections: Vec<Mat4>,
    viewport: (u32, u32),
    current_target: Option<RenderTargetId>,
}

impl Pipeline {
    /// Attach the main context and start the loader thread.
    ///
    /// Fails if the loader context cannot attach or the builtin resources
    /// cannot be uploaded.
    pub fn new(
        config: PipelineConfig,
        mut main: Box<dyn GraphicsContext>,
        loader_context: Box<dyn GraphicsContext>,
        sources: AssetSources,
    ) -> PipelineResult<Self> {
        main.attach()?;
        let targets = RenderTargetManager::new(main.max_samples(), config.fsaa_level);
        let loader = Arc::new(LoaderContext::new(&config, sources));
        let thread = match LoaderThread::spawn(
            Arc::clone(&loader),
            loader_context,
            &config.loader_thread_name,
            config.startup_timeout,
        ) {
            Ok(thread) => thread,
            Err(err) => {
                log::error!("Pipeline startup failed: {err}");
                main.detach();
                return Err(err);
            }
        };
        log::info!(
            "Pipeline started: viewport {}x{}, {} max instances",
            config.viewport.0,
            config.viewport.1,
            config.max_instances
        );

        Ok(Self {
            batcher: DrawBatcher::new(config.max_instances),
            panels: PanelSet::default(),
            overlay: DrawBatcher::new(config.max_instances),
            viewport: config.viewport,
            main,
            loader,
            thread: Some(thread),
            targets,
            projections: vec![Mat4::IDENTITY],
            current_target: None,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// State shared with the loader thread
    pub fn loader(&self) -> &Arc<LoaderContext> {
        &self.loader
    }

    pub fn load_mesh(&self, name: &str) -> PipelineResult<Handle<MeshResource>> {
        self.loader.load_mesh(name)
    }

    pub fn load_texture(&self, path: &str) -> PipelineResult<Handle<TextureResource>> {
        self.loader.load_texture(path)
    }

    pub fn load_material(&self, name: &str) -> PipelineResult<Handle<MaterialInstance>> {
        self.loader.load_material(name)
    }

    pub fn upsert_material_definition(&self, name: &str, def: MaterialDef) -> PipelineResult<()> {
        self.loader.upsert_material_definition(name, def)
    }

    /// Uniform location in a built material's program
    pub fn query_uniform_slot(
        &mut self,
        material: &Handle<MaterialInstance>,
        name: &str,
    ) -> PipelineResult<i32> {
        let instance = material.read();
        let program = instance.program.as_ref().ok_or_else(|| {
            PipelineError::ResourceNotFound(format!("program of material {}", material.name()))
        })?;
        let program = program.read();
        loader::query_uniform_slot(self.main.as_mut(), &program, name)
    }

    /// Finalize meshes the loader finished since the last frame
    pub fn begin_frame(&mut self) -> usize {
        self.loader.drain_finalize_queue(self.main.as_mut())
    }

    pub fn add_draw_task(
        &mut self,
        mesh: &Handle<MeshResource>,
        material: &Handle<MaterialInstance>,
        transform: Mat4,
        pass: RenderPass,
    ) -> PipelineResult<()> {
        self.batcher.add_draw_task(mesh, material, transform, pass)
    }

    pub fn add_skinned_draw_task(
        &mut self,
        mesh: &Handle<MeshResource>,
        material: &Handle<MaterialInstance>,
        transform: Mat4,
        bones: Arc<[Mat4]>,
        pass: RenderPass,
    ) -> PipelineResult<()> {
        self.batcher
            .add_skinned_draw_task(mesh, material, transform, bones, pass)
    }

    fn current_target_mut(&mut self) -> Option<&mut RenderTarget> {
        let id = self.current_target?;
        self.targets.get_mut(id)
    }

    /// Draw the geometry and post-lighting passes into the current target
    pub fn render(&mut self) -> PipelineResult<FlushStats> {
        let Some(target) = self.current_target.and_then(|id| self.targets.get(id)) else {
            log::trace!("No render target bound, skipping render");
            return Ok(FlushStats::default());
        };
        let (width, height) = target.size();
        let (Some(geometry), Some(lighting)) =
            (target.geometry_framebuffer(), target.lighting_framebuffer())
        else {
            return Ok(FlushStats::default());
        };
        let projection = self.projection();
        let placeholder = self.loader.placeholder_texture();
        let ctx = self.main.as_mut();

        ctx.bind_framebuffer(Some(geometry))?;
        ctx.set_viewport(width, height)?;
        ctx.clear(ClearFlags::ALL, self.config.clear_color)?;
        let mut stats = self
            .batcher
            .flush(ctx, RenderPass::Standard, &projection, placeholder)?;

        // Depth is shared with the geometry buffer.
        ctx.bind_framebuffer(Some(lighting))?;
        ctx.clear(ClearFlags::COLOR, [0.0, 0.0, 0.0, 0.0])?;
        stats += self
            .batcher
            .flush(ctx, RenderPass::PostLighting, &projection, placeholder)?;

        if let Some(target) = self.current_target_mut() {
            target.mark_dirty();
        }
        Ok(stats)
    }

    /// Panels, post effects, mip resolve and presentation.
    ///
    /// Tasks left in any pass are discarded.
    pub fn end_frame(&mut self) -> PipelineResult<FlushStats> {
        let result = self.present();
        self.batcher.clear_all();
        self.overlay.clear_all();
        result
    }

    fn present(&mut self) -> PipelineResult<FlushStats> {
        let viewport = self.viewport;
        let mut stats = FlushStats::default();

        if let Some(id) = self.current_target {
            let target = self
                .targets
                .get(id)
                .ok_or(PipelineError::UnknownRenderTarget(id))?;
            let (width, height) = target.size();
            if let Some(lighting) = target.lighting_framebuffer() {
                self.main.bind_framebuffer(Some(lighting))?;
                self.main.set_viewport(width, height)?;
                stats += self.draw_panels()?;
                let projection = self.projection();
                let placeholder = self.loader.placeholder_texture();
                stats += self.batcher.flush(
                    self.main.as_mut(),
                    RenderPass::PostEffect,
                    &projection,
                    placeholder,
                )?;
                if let Some(target) = self.targets.get_mut(id) {
                    target.end_frame(self.main.as_mut())?;
                }
                self.main.blit(
                    lighting,
                    None,
                    BlitRegion {
                        src_width: width,
                        src_height: height,
                        dst_width: viewport.0,
                        dst_height: viewport.1,
                    },
                )?;
            }
        }

        self.main.bind_framebuffer(None)?;
        self.main.set_viewport(viewport.0, viewport.1)?;
        self.main.swap_buffers()?;
        Ok(stats)
    }

    /// Draw every panel into the bound framebuffer under an identity projection
    fn draw_panels(&mut self) -> PipelineResult<FlushStats> {
        if self.panels.is_empty() {
            return Ok(FlushStats::default());
        }
        for (_, panel) in self.panels.iter() {
            self.overlay.add_draw_task(
                &panel.mesh,
                &panel.material,
                panel.transform,
                RenderPass::PostEffect,
            )?;
        }
        self.push_projection(Mat4::IDENTITY);
        let projection = self.projection();
        let placeholder = self.loader.placeholder_texture();
        let result = self.overlay.flush(
            self.main.as_mut(),
            RenderPass::PostEffect,
            &projection,
            placeholder,
        );
        self.pop_projection();
        result
    }

    /// Add a builtin quad scaled by `xscale` and `yscale`, drawn with
    /// `material` at the end of every frame until destroyed
    pub fn create_panel(&mut self, xscale: f32, yscale: f32, material: &str) -> PipelineResult<PanelId> {
        let mesh = self.loader.load_mesh(QUAD_MESH)?;
        let material = self.loader.load_material(material)?;
        let id = self.panels.insert(Panel::scaled(mesh, material, xscale, yscale));
        log::debug!("Created panel {id:?}");
        Ok(id)
    }

    pub fn destroy_panel(&mut self, id: PanelId) -> PipelineResult<()> {
        self.panels
            .remove(id)
            .map(|_| ())
            .ok_or(PipelineError::UnknownPanel(id))
    }

    /// Replace a panel's transform; panels are positioned in normalized device coordinates
    pub fn set_panel_transform(&mut self, id: PanelId, transform: Mat4) -> PipelineResult<()> {
        let panel = self.panels.get_mut(id).ok_or(PipelineError::UnknownPanel(id))?;
        panel.transform = transform;
        Ok(())
    }

    pub fn panels(&self) -> &PanelSet {
        &self.panels
    }

    pub fn projection(&self) -> Mat4 {
        self.projections.last().copied().unwrap_or(Mat4::IDENTITY)
    }

    /// Replace the current projection
    pub fn set_projection(&mut self, projection: Mat4) {
        match self.projections.last_mut() {
            Some(top) => *top = projection,
            None => self.projections.push(projection),
        }
    }

    pub fn push_projection(&mut self, projection: Mat4) {
        self.projections.push(projection);
    }

    /// Restore the previous projection; the base entry is never popped
    pub fn pop_projection(&mut self) -> Option<Mat4> {
        if self.projections.len() > 1 {
            self.projections.pop()
        } else {
            None
        }
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    pub fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        build_mips: bool,
    ) -> PipelineResult<RenderTargetId> {
        self.targets
            .create(self.main.as_mut(), width, height, build_mips)
    }

    pub fn destroy_render_target(&mut self, id: RenderTargetId) -> PipelineResult<()> {
        if self.current_target == Some(id) {
            self.current_target = None;
        }
        self.targets.destroy(self.main.as_mut(), id)
    }

    pub fn resize_render_target(
        &mut self,
        id: RenderTargetId,
        width: u32,
        height: u32,
    ) -> PipelineResult<()> {
        let result = self.targets.resize(self.main.as_mut(), id, width, height);
        if self.targets.get(id).is_none() && self.current_target == Some(id) {
            self.current_target = None;
        }
        result
    }

    /// Target `render` and `end_frame` draw into; `None` renders nothing
    pub fn set_render_target(&mut self, id: Option<RenderTargetId>) -> PipelineResult<()> {
        if let Some(id) = id {
            if self.targets.get(id).is_none() {
                return Err(PipelineError::UnknownRenderTarget(id));
            }
        }
        self.current_target = id;
        Ok(())
    }

    pub fn render_target(&self, id: RenderTargetId) -> Option<&RenderTarget> {
        self.targets.get(id)
    }

    pub fn render_targets(&self) -> &RenderTargetManager {
        &self.targets
    }

    /// Reallocate every target with `level` samples; false if unchanged
    pub fn set_fsaa_level(&mut self, level: u32) -> PipelineResult<bool> {
        self.targets.set_fsaa_level(self.main.as_mut(), level)
    }

    pub fn fsaa_levels(&self) -> &[u32] {
        self.targets.levels()
    }

    pub fn fsaa_level(&self) -> u32 {
        self.targets.current_level()
    }

    /// Reclaim unreferenced resources; returns the number of entries freed
    pub fn collect_garbage(&mut self) -> usize {
        self.loader.collect_garbage(self.main.as_mut())
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(LoaderThread::is_running)
    }

    /// Join the loader thread and release the main context
    pub fn shutdown(&mut self) {
        let Some(mut thread) = self.thread.take() else {
            return;
        };
        log::info!("Shutting down pipeline");
        thread.shutdown();
        self.batcher.clear_all();
        self.overlay.clear_all();
        self.panels.clear();
        self.current_target = None;
        self.targets.destroy_all(self.main.as_mut());
        self.main.detach();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
