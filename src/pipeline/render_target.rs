//! Multisampled render targets
//!
//! A render target bundles the geometry framebuffer (depth, color, normal
//! and material property attachments) and the lighting framebuffer that
//! shares its depth attachment. Targets created with `build_mips` also own
//! a single-sample resolve texture whose mip chain is rebuilt at the end of
//! every frame the target was rendered to.

use std::collections::BTreeMap;

use crate::backend::{
    AttachmentDescriptor, AttachmentFormat, AttachmentPoint, BlitRegion, GraphicsContext,
    GraphicsHandle,
};
use crate::error::{PipelineError, PipelineResult};

/// Stable identity of a render target; survives resizes and FSAA changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetId(u32);

/// Entry of a render target's attachment ownership table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentSlot {
    DepthStencil,
    Color,
    Normal,
    MaterialProps,
    Lighting,
    Resolve,
}

impl AttachmentSlot {
    pub const ALL: [Self; 6] = [
        Self::DepthStencil,
        Self::Color,
        Self::Normal,
        Self::MaterialProps,
        Self::Lighting,
        Self::Resolve,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn format(self) -> AttachmentFormat {
        match self {
            Self::DepthStencil => AttachmentFormat::Depth24Stencil8,
            Self::Color | Self::Normal => AttachmentFormat::Rgba8,
            Self::MaterialProps => AttachmentFormat::Rg16Float,
            Self::Lighting | Self::Resolve => AttachmentFormat::Rgba16Float,
        }
    }
}

fn mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

#[track_caller]
fn check_complete(ctx: &mut dyn GraphicsContext, framebuffer: GraphicsHandle) -> PipelineResult<()> {
    let status = ctx.framebuffer_status(framebuffer)?;
    if !status.is_complete() {
        return Err(PipelineError::incomplete(status));
    }
    Ok(())
}

/// Framebuffers and attachments of one render target
#[derive(Debug)]
pub struct RenderTarget {
    id: RenderTargetId,
    width: u32,
    height: u32,
    samples: u32,
    build_mips: bool,
    dirty: bool,
    attachments: [Option<GraphicsHandle>; 6],
    geometry_fb: Option<GraphicsHandle>,
    lighting_fb: Option<GraphicsHandle>,
    resolve_fb: Option<GraphicsHandle>,
}

impl RenderTarget {
    fn allocate(
        ctx: &mut dyn GraphicsContext,
        id: RenderTargetId,
        width: u32,
        height: u32,
        samples: u32,
        build_mips: bool,
    ) -> PipelineResult<Self> {
        let mut target = Self {
            id,
            width,
            height,
            samples,
            build_mips,
            dirty: false,
            attachments: [None; 6],
            geometry_fb: None,
            lighting_fb: None,
            resolve_fb: None,
        };
        if let Err(err) = target.create_storage(ctx) {
            if let Err(cleanup) = target.release(ctx) {
                log::warn!("Cleanup of render target {id:?} failed: {cleanup}");
            }
            return Err(err);
        }
        log::debug!("Allocated render target {id:?} ({width}x{height}, {samples} samples)");
        Ok(target)
    }

    fn create_attachment(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        slot: AttachmentSlot,
        samples: u32,
        mip_levels: u32,
    ) -> PipelineResult<GraphicsHandle> {
        let handle = ctx.create_attachment(&AttachmentDescriptor {
            width: self.width,
            height: self.height,
            format: slot.format(),
            samples,
            mip_levels,
        })?;
        self.attachments[slot.index()] = Some(handle);
        Ok(handle)
    }

    fn create_storage(&mut self, ctx: &mut dyn GraphicsContext) -> PipelineResult<()> {
        let depth = self.create_attachment(ctx, AttachmentSlot::DepthStencil, self.samples, 1)?;
        let color = self.create_attachment(ctx, AttachmentSlot::Color, self.samples, 1)?;
        let normal = self.create_attachment(ctx, AttachmentSlot::Normal, self.samples, 1)?;
        let props = self.create_attachment(ctx, AttachmentSlot::MaterialProps, self.samples, 1)?;
        let lighting = self.create_attachment(ctx, AttachmentSlot::Lighting, self.samples, 1)?;

        let geometry = ctx.create_framebuffer(&[
            (AttachmentPoint::DepthStencil, depth),
            (AttachmentPoint::Color(0), color),
            (AttachmentPoint::Color(1), normal),
            (AttachmentPoint::Color(2), props),
        ])?;
        self.geometry_fb = Some(geometry);
        check_complete(ctx, geometry)?;

        let lighting_fb = ctx.create_framebuffer(&[
            (AttachmentPoint::DepthStencil, depth),
            (AttachmentPoint::Color(0), lighting),
        ])?;
        self.lighting_fb = Some(lighting_fb);
        check_complete(ctx, lighting_fb)?;

        if self.build_mips {
            let levels = mip_levels(self.width, self.height);
            let resolve = self.create_attachment(ctx, AttachmentSlot::Resolve, 1, levels)?;
            let resolve_fb = ctx.create_framebuffer(&[(AttachmentPoint::Color(0), resolve)])?;
            self.resolve_fb = Some(resolve_fb);
            check_complete(ctx, resolve_fb)?;
        }
        Ok(())
    }

    /// Delete framebuffers, then every attachment in the ownership table
    fn release(&mut self, ctx: &mut dyn GraphicsContext) -> PipelineResult<()> {
        let mut result = Ok(());
        let framebuffers = [
            self.resolve_fb.take(),
            self.lighting_fb.take(),
            self.geometry_fb.take(),
        ];
        let attachments = self.attachments.iter_mut().map(Option::take);
        for handle in framebuffers.into_iter().chain(attachments).flatten() {
            if let Err(err) = ctx.delete(handle) {
                log::error!("Failed to delete {:?} of render target {:?}: {err}", handle.kind(), self.id);
                result = result.and(Err(err));
            }
        }
        result
    }

    pub fn id(&self) -> RenderTargetId {
        self.id
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn build_mips(&self) -> bool {
        self.build_mips
    }

    /// Rendered to since the last end of frame
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn attachment(&self, slot: AttachmentSlot) -> Option<GraphicsHandle> {
        self.attachments[slot.index()]
    }

    pub fn geometry_framebuffer(&self) -> Option<GraphicsHandle> {
        self.geometry_fb
    }

    pub fn lighting_framebuffer(&self) -> Option<GraphicsHandle> {
        self.lighting_fb
    }

    pub fn resolve_framebuffer(&self) -> Option<GraphicsHandle> {
        self.resolve_fb
    }

    /// Resolve the lighting buffer into the mip chain if it was rendered to
    pub(crate) fn end_frame(&mut self, ctx: &mut dyn GraphicsContext) -> PipelineResult<()> {
        let dirty = std::mem::replace(&mut self.dirty, false);
        if !(self.build_mips && dirty) {
            return Ok(());
        }
        let (Some(src), Some(dst), Some(texture)) = (
            self.lighting_fb,
            self.resolve_fb,
            self.attachment(AttachmentSlot::Resolve),
        ) else {
            return Ok(());
        };
        ctx.blit(
            src,
            Some(dst),
            BlitRegion {
                src_width: self.width,
                src_height: self.height,
                dst_width: self.width,
                dst_height: self.height,
            },
        )?;
        ctx.generate_mipmaps(texture)
    }
}

/// Owns every render target and the multisample level they share
#[derive(Debug)]
pub struct RenderTargetManager {
    targets: BTreeMap<RenderTargetId, RenderTarget>,
    next_id: u32,
    levels: Vec<u32>,
    current: u32,
}

impl RenderTargetManager {
    /// `max_samples` is the smaller of the depth and color sample limits
    pub fn new(max_samples: u32, initial_level: Option<u32>) -> Self {
        let levels = Self::supported_levels(max_samples);
        let default = levels.first().copied().unwrap_or(1);
        let current = match initial_level {
            Some(level) if levels.contains(&level) => level,
            Some(level) => {
                log::warn!("FSAA level {level} unsupported, using {default}");
                default
            }
            None => default,
        };
        log::info!("FSAA levels {levels:?}, using {current}");
        Self {
            targets: BTreeMap::new(),
            next_id: 1,
            levels,
            current,
        }
    }

    /// Sample counts from `max_samples` down in steps of two. The limit itself
    /// is always included; a limit of zero counts as one sample.
    pub fn supported_levels(max_samples: u32) -> Vec<u32> {
        let mut level = max_samples.max(1);
        let mut levels = vec![level];
        while level > 3 {
            level -= 2;
            levels.push(level);
        }
        levels
    }

    pub fn levels(&self) -> &[u32] {
        &self.levels
    }

    pub fn current_level(&self) -> u32 {
        self.current
    }

    pub fn create(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        width: u32,
        height: u32,
        build_mips: bool,
    ) -> PipelineResult<RenderTargetId> {
        let id = RenderTargetId(self.next_id);
        let target = RenderTarget::allocate(ctx, id, width, height, self.current, build_mips)?;
        self.next_id += 1;
        self.targets.insert(id, target);
        Ok(id)
    }

    pub fn destroy(&mut self, ctx: &mut dyn GraphicsContext, id: RenderTargetId) -> PipelineResult<()> {
        let mut target = self
            .targets
            .remove(&id)
            .ok_or(PipelineError::UnknownRenderTarget(id))?;
        target.release(ctx)
    }

    /// Reallocate a target at a new size, keeping its id
    pub fn resize(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        id: RenderTargetId,
        width: u32,
        height: u32,
    ) -> PipelineResult<()> {
        let target = self
            .targets
            .get_mut(&id)
            .ok_or(PipelineError::UnknownRenderTarget(id))?;
        if target.size() == (width, height) {
            return Ok(());
        }
        let build_mips = target.build_mips;
        target.release(ctx)?;
        match RenderTarget::allocate(ctx, id, width, height, self.current, build_mips) {
            Ok(resized) => {
                *target = resized;
                Ok(())
            }
            Err(err) => {
                self.targets.remove(&id);
                Err(err)
            }
        }
    }

    /// Switch every target to `level` samples; false if already current.
    ///
    /// The level only changes once every target has been reallocated. On
    /// failure the targets already switched go back to the previous level, and
    /// a target that cannot be restored is dropped from the manager.
    pub fn set_fsaa_level(&mut self, ctx: &mut dyn GraphicsContext, level: u32) -> PipelineResult<bool> {
        if level == self.current {
            return Ok(false);
        }
        if !self.levels.contains(&level) {
            return Err(PipelineError::Unsupported(format!(
                "FSAA level {level}, supported {:?}",
                self.levels
            )));
        }
        log::info!("Switching FSAA level {} -> {level}", self.current);
        let previous = self.current;
        let mut touched = Vec::new();
        for id in self.ids() {
            touched.push(id);
            if let Err(err) = self.reallocate(ctx, id, level) {
                log::warn!("FSAA level {level} failed on {id:?}, restoring {previous}: {err}");
                for id in touched {
                    if let Err(restore) = self.reallocate(ctx, id, previous) {
                        log::error!("Dropping render target {id:?}: {restore}");
                        self.targets.remove(&id);
                    }
                }
                return Err(err);
            }
        }
        self.current = level;
        Ok(true)
    }

    fn reallocate(&mut self, ctx: &mut dyn GraphicsContext, id: RenderTargetId, samples: u32) -> PipelineResult<()> {
        let Some(target) = self.targets.get_mut(&id) else {
            return Ok(());
        };
        let (width, height) = target.size();
        let build_mips = target.build_mips;
        target.release(ctx)?;
        *target = RenderTarget::allocate(ctx, id, width, height, samples, build_mips)?;
        Ok(())
    }

    pub fn get(&self, id: RenderTargetId) -> Option<&RenderTarget> {
        self.targets.get(&id)
    }

    pub fn get_mut(&mut self, id: RenderTargetId) -> Option<&mut RenderTarget> {
        self.targets.get_mut(&id)
    }

    pub fn ids(&self) -> Vec<RenderTargetId> {
        self.targets.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn destroy_all(&mut self, ctx: &mut dyn GraphicsContext) {
        for (id, mut target) in std::mem::take(&mut self.targets) {
            if let Err(err) = target.release(ctx) {
                log::warn!("Failed to release render target {id:?}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ContextKind, HandleKind, HeadlessContext, HeadlessDevice, HeadlessLimits};
    use rstest::rstest;

    fn main_context(device: &HeadlessDevice) -> HeadlessContext {
        let mut ctx = device.context(ContextKind::Main);
        ctx.attach().unwrap();
        ctx
    }

    #[rstest]
    #[case(8, vec![8, 6, 4, 2])]
    #[case(4, vec![4, 2])]
    #[case(5, vec![5, 3])]
    #[case(3, vec![3])]
    #[case(1, vec![1])]
    #[case(0, vec![1])]
    fn test_supported_levels(#[case] max_samples: u32, #[case] expected: Vec<u32>) {
        assert_eq!(RenderTargetManager::supported_levels(max_samples), expected);
    }

    #[test]
    fn test_initial_level() {
        assert_eq!(RenderTargetManager::new(8, None).current_level(), 8);
        assert_eq!(RenderTargetManager::new(8, Some(4)).current_level(), 4);
        assert_eq!(RenderTargetManager::new(8, Some(3)).current_level(), 8);
        assert_eq!(RenderTargetManager::new(1, None).current_level(), 1);
    }

    #[test]
    fn test_create_allocates_ownership_table() {
        let device = HeadlessDevice::new();
        let mut ctx = main_context(&device);
        let mut manager = RenderTargetManager::new(ctx.max_samples(), None);

        let plain = manager.create(&mut ctx, 64, 32, false).unwrap();
        let mipped = manager.create(&mut ctx, 64, 32, true).unwrap();

        let target = manager.get(plain).unwrap();
        assert_eq!(target.samples(), 8);
        assert!(target.attachment(AttachmentSlot::Lighting).is_some());
        assert!(target.attachment(AttachmentSlot::Resolve).is_none());
        let target = manager.get(mipped).unwrap();
        assert!(target.resolve_framebuffer().is_some());
        let resolve = target.attachment(AttachmentSlot::Resolve).unwrap();
        assert!(matches!(
            device.object(resolve),
            Some(crate::backend::HeadlessObject::Texture { samples: 1, mip_levels: 7, .. })
        ));
        assert_eq!(device.live_objects(HandleKind::Framebuffer), 5);

        manager.destroy(&mut ctx, plain).unwrap();
        manager.destroy(&mut ctx, mipped).unwrap();
        assert_eq!(device.live_objects(HandleKind::Framebuffer), 0);
        assert_eq!(device.live_objects(HandleKind::Texture), 0);
        assert!(matches!(
            manager.destroy(&mut ctx, plain),
            Err(PipelineError::UnknownRenderTarget(_))
        ));
    }

    #[test]
    fn test_resize_and_fsaa_keep_identity() {
        let device = HeadlessDevice::new();
        let mut ctx = main_context(&device);
        let mut manager = RenderTargetManager::new(ctx.max_samples(), None);
        let id = manager.create(&mut ctx, 64, 64, true).unwrap();

        manager.resize(&mut ctx, id, 128, 32).unwrap();
        assert_eq!(manager.get(id).unwrap().size(), (128, 32));
        assert!(manager.set_fsaa_level(&mut ctx, 4).unwrap());
        assert!(!manager.set_fsaa_level(&mut ctx, 4).unwrap());
        assert!(manager.set_fsaa_level(&mut ctx, 3).is_err());

        assert_eq!(manager.ids(), vec![id]);
        let target = manager.get(id).unwrap();
        assert_eq!(target.samples(), 4);
        assert_eq!(target.size(), (128, 32));
        assert_eq!(device.live_objects(HandleKind::Framebuffer), 3);
        assert_eq!(device.live_objects(HandleKind::Texture), 6);
    }

    #[test]
    fn test_unsupported_samples_fail_cleanly() {
        let device = HeadlessDevice::with_limits(HeadlessLimits {
            max_color_samples: 8,
            max_depth_samples: 8,
        });
        let mut ctx = main_context(&device);
        let mut manager = RenderTargetManager::new(16, None);
        assert!(manager.create(&mut ctx, 16, 16, false).is_err());
        assert!(manager.is_empty());
        assert_eq!(device.live_objects(HandleKind::Texture), 0);
    }

    #[test]
    fn test_failed_fsaa_switch_restores_previous_level() {
        let device = HeadlessDevice::with_limits(HeadlessLimits {
            max_color_samples: 8,
            max_depth_samples: 8,
        });
        let mut ctx = main_context(&device);
        let mut manager = RenderTargetManager::new(16, Some(8));
        let a = manager.create(&mut ctx, 32, 32, false).unwrap();
        let b = manager.create(&mut ctx, 16, 16, true).unwrap();

        assert!(manager.set_fsaa_level(&mut ctx, 16).is_err());

        assert_eq!(manager.current_level(), 8);
        assert_eq!(manager.ids(), vec![a, b]);
        for id in [a, b] {
            let target = manager.get(id).unwrap();
            assert_eq!(target.samples(), 8);
            assert!(target.geometry_framebuffer().is_some());
        }
        assert_eq!(device.live_objects(HandleKind::Framebuffer), 5);
    }

    #[test]
    fn test_end_frame_resolves_only_dirty_mip_targets() {
        let device = HeadlessDevice::new();
        let mut ctx = main_context(&device);
        let mut manager = RenderTargetManager::new(ctx.max_samples(), None);
        let id = manager.create(&mut ctx, 16, 16, true).unwrap();
        let target = manager.get_mut(id).unwrap();

        target.end_frame(&mut ctx).unwrap();
        assert_eq!(device.blits(), 0);
        target.mark_dirty();
        target.end_frame(&mut ctx).unwrap();
        assert_eq!(device.blits(), 1);
        assert!(!target.is_dirty());
    }
}
