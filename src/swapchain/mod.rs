use crate::render::{ImageViewHandle, ImageViewSpec, RenderBackend, RenderError};
use crate::runtime::{
    ChainKind, CompositorRuntime, ImageFormat, ImageWait, RuntimeError, SessionHandle,
    SwapchainHandle, SwapchainSpec, ViewProfile,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwapchainError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("compositor offers no {0:?}-compatible swapchain format")]
    NoCompatibleFormat(ChainKind),
    #[error("view {0} already holds acquired images")]
    AlreadyAcquired(usize),
    #[error("view {0} has no acquired images to release")]
    NotAcquired(usize),
    #[error("cannot destroy swapchains while view {0} holds acquired images")]
    StillAcquired(usize),
    #[error("view index {index} out of range ({count} views)")]
    ViewOutOfRange { index: usize, count: usize },
    #[error("runtime returned image index {image} beyond the {count} buffered images of view {view}")]
    ImageIndexOutOfRange { view: usize, image: u32, count: usize },
}

pub type SwapchainResult<T> = Result<T, SwapchainError>;

struct Chain {
    handle: SwapchainHandle,
    kind: ChainKind,
    views: Vec<ImageViewHandle>,
}

/// One view's pair of presentable chains plus acquire bookkeeping.
struct ViewChains {
    color: Chain,
    depth: Chain,
    extent: ViewProfile,
    acquired: bool,
}

/// Images handed out by a successful acquire, everything the render-layer
/// protocol needs to clear, draw, and reference the color sub-image.
#[derive(Debug, Clone, Copy)]
pub struct AcquiredImages {
    pub color_chain: SwapchainHandle,
    pub color_view: ImageViewHandle,
    pub depth_view: ImageViewHandle,
    pub extent: ViewProfile,
}

/// Owns, per view, a color and a depth chain and the image views
/// materialized over their buffered images. Bounded by the session's
/// lifetime; `destroy_all` must run before the session is destroyed.
pub struct SwapchainManager {
    session: SessionHandle,
    color_format: Option<ImageFormat>,
    depth_format: Option<ImageFormat>,
    entries: Vec<ViewChains>,
}

impl SwapchainManager {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            color_format: None,
            depth_format: None,
            entries: Vec::new(),
        }
    }

    pub fn view_count(&self) -> usize {
        self.entries.len()
    }

    /// Live chain handles; invariant: `2 × view_count` after a full create.
    pub fn chain_count(&self) -> usize {
        self.entries.len() * 2
    }

    pub fn color_format(&self) -> Option<ImageFormat> {
        self.color_format
    }

    pub fn depth_format(&self) -> Option<ImageFormat> {
        self.depth_format
    }

    pub fn is_acquired(&self, view_index: usize) -> bool {
        self.entries
            .get(view_index)
            .is_some_and(|entry| entry.acquired)
    }

    /// Negotiates formats once, then brings up one color and one depth
    /// chain per view, each with exactly as many image views as the
    /// runtime reports buffered images. On failure the partially built
    /// chain is torn back down and already-completed views stay owned, so
    /// `destroy_all` cleans up whatever exists.
    pub fn create_for_views(
        &mut self,
        runtime: &mut dyn CompositorRuntime,
        backend: &mut dyn RenderBackend,
        views: &[ViewProfile],
    ) -> SwapchainResult<()> {
        let offered = runtime.enumerate_swapchain_formats(self.session)?;
        let color_format = backend
            .select_color_format(&offered)
            .ok_or(SwapchainError::NoCompatibleFormat(ChainKind::Color))?;
        let depth_format = backend
            .select_depth_format(&offered)
            .ok_or(SwapchainError::NoCompatibleFormat(ChainKind::Depth))?;
        self.color_format = Some(color_format);
        self.depth_format = Some(depth_format);
        log::info!(
            "[swapchain] negotiated formats color={color_format:?} depth={depth_format:?} for {} views",
            views.len()
        );

        for profile in views {
            let color = self.create_chain(runtime, backend, *profile, color_format, ChainKind::Color)?;
            let depth = match self.create_chain(runtime, backend, *profile, depth_format, ChainKind::Depth)
            {
                Ok(chain) => chain,
                Err(err) => {
                    Self::destroy_chain(runtime, backend, color);
                    return Err(err);
                }
            };
            self.entries.push(ViewChains {
                color,
                depth,
                extent: *profile,
                acquired: false,
            });
        }
        Ok(())
    }

    fn create_chain(
        &mut self,
        runtime: &mut dyn CompositorRuntime,
        backend: &mut dyn RenderBackend,
        profile: ViewProfile,
        format: ImageFormat,
        kind: ChainKind,
    ) -> SwapchainResult<Chain> {
        let spec = SwapchainSpec {
            kind,
            format,
            width: profile.width,
            height: profile.height,
            sample_count: profile.sample_count,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        };
        let handle = runtime.create_swapchain(self.session, &spec)?;

        // Image count is the runtime's call; materialize exactly that many
        // views. Any failure from here unwinds this chain completely.
        let result: SwapchainResult<Vec<ImageViewHandle>> = (|| {
            let count = runtime.swapchain_image_count(handle)?;
            backend.allocate_swapchain_images(handle, kind, count)?;
            let mut views = Vec::with_capacity(count as usize);
            for index in 0..count {
                let image = match backend.swapchain_image(handle, index) {
                    Ok(image) => image,
                    Err(err) => {
                        Self::destroy_views(backend, &views);
                        let _ = backend.free_swapchain_images(handle);
                        return Err(err.into());
                    }
                };
                let spec = ImageViewSpec {
                    image,
                    kind,
                    format,
                    width: profile.width,
                    height: profile.height,
                };
                match backend.create_image_view(&spec) {
                    Ok(view) => views.push(view),
                    Err(err) => {
                        Self::destroy_views(backend, &views);
                        let _ = backend.free_swapchain_images(handle);
                        return Err(err.into());
                    }
                }
            }
            Ok(views)
        })();

        match result {
            Ok(views) => {
                log::debug!(
                    "[swapchain] {kind:?} chain {handle:?} up with {} image views",
                    views.len()
                );
                Ok(Chain {
                    handle,
                    kind,
                    views,
                })
            }
            Err(err) => {
                if let Err(destroy_err) = runtime.destroy_swapchain(handle) {
                    log::error!(
                        "[swapchain] failed to unwind half-built chain {handle:?}: {destroy_err}"
                    );
                }
                Err(err)
            }
        }
    }

    /// Acquires the next color and depth images for a view and blocks
    /// until both are usable. The wait budget is deliberately unbounded:
    /// the loop must not run ahead of the compositor. A failure releases
    /// whatever was acquired before it surfaces.
    pub fn acquire_and_wait(
        &mut self,
        runtime: &mut dyn CompositorRuntime,
        view_index: usize,
    ) -> SwapchainResult<AcquiredImages> {
        let count = self.entries.len();
        let entry = self
            .entries
            .get_mut(view_index)
            .ok_or(SwapchainError::ViewOutOfRange {
                index: view_index,
                count,
            })?;
        if entry.acquired {
            return Err(SwapchainError::AlreadyAcquired(view_index));
        }

        let color_index = runtime.acquire_image(entry.color.handle)?;
        let depth_index = match runtime.acquire_image(entry.depth.handle) {
            Ok(index) => index,
            Err(err) => {
                let _ = runtime.release_image(entry.color.handle);
                return Err(err.into());
            }
        };

        let waited = runtime
            .wait_image(entry.color.handle, ImageWait::Infinite)
            .and_then(|()| runtime.wait_image(entry.depth.handle, ImageWait::Infinite));
        if let Err(err) = waited {
            let _ = runtime.release_image(entry.color.handle);
            let _ = runtime.release_image(entry.depth.handle);
            return Err(err.into());
        }

        let color_view = Self::view_at(&entry.color, view_index, color_index)?;
        let depth_view = Self::view_at(&entry.depth, view_index, depth_index)?;
        entry.acquired = true;
        Ok(AcquiredImages {
            color_chain: entry.color.handle,
            color_view,
            depth_view,
            extent: entry.extent,
        })
    }

    /// Hands both images back to the compositor. Must run exactly once per
    /// successful acquire, on every exit path, or the chain stalls.
    pub fn release(
        &mut self,
        runtime: &mut dyn CompositorRuntime,
        view_index: usize,
    ) -> SwapchainResult<()> {
        let count = self.entries.len();
        let entry = self
            .entries
            .get_mut(view_index)
            .ok_or(SwapchainError::ViewOutOfRange {
                index: view_index,
                count,
            })?;
        if !entry.acquired {
            return Err(SwapchainError::NotAcquired(view_index));
        }
        entry.acquired = false;

        let color = runtime.release_image(entry.color.handle);
        let depth = runtime.release_image(entry.depth.handle);
        color?;
        depth?;
        Ok(())
    }

    /// Destroys image views before chain handles, newest view first.
    /// Rejected while any image is still acquired; cleanup is attempted
    /// for every chain even when one teardown call fails, and the first
    /// failure is reported.
    pub fn destroy_all(
        &mut self,
        runtime: &mut dyn CompositorRuntime,
        backend: &mut dyn RenderBackend,
    ) -> SwapchainResult<()> {
        if let Some(index) = self.entries.iter().position(|entry| entry.acquired) {
            return Err(SwapchainError::StillAcquired(index));
        }

        let mut first_error = None;
        while let Some(entry) = self.entries.pop() {
            for chain in [entry.depth, entry.color] {
                if let Err(err) = Self::try_destroy_chain(runtime, backend, chain) {
                    log::error!("[swapchain] teardown error: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn view_at(chain: &Chain, view_index: usize, image: u32) -> SwapchainResult<ImageViewHandle> {
        chain.views.get(image as usize).copied().ok_or({
            SwapchainError::ImageIndexOutOfRange {
                view: view_index,
                image,
                count: chain.views.len(),
            }
        })
    }

    fn destroy_views(backend: &mut dyn RenderBackend, views: &[ImageViewHandle]) {
        for &view in views.iter().rev() {
            if let Err(err) = backend.destroy_image_view(view) {
                log::error!("[swapchain] failed to destroy image view {view:?}: {err}");
            }
        }
    }

    fn try_destroy_chain(
        runtime: &mut dyn CompositorRuntime,
        backend: &mut dyn RenderBackend,
        chain: Chain,
    ) -> SwapchainResult<()> {
        let mut first_error: Option<SwapchainError> = None;
        for &view in chain.views.iter().rev() {
            if let Err(err) = backend.destroy_image_view(view) {
                first_error.get_or_insert(err.into());
            }
        }
        if let Err(err) = backend.free_swapchain_images(chain.handle) {
            first_error.get_or_insert(err.into());
        }
        if let Err(err) = runtime.destroy_swapchain(chain.handle) {
            first_error.get_or_insert(err.into());
        }
        log::debug!("[swapchain] {:?} chain {:?} destroyed", chain.kind, chain.handle);
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn destroy_chain(
        runtime: &mut dyn CompositorRuntime,
        backend: &mut dyn RenderBackend,
        chain: Chain,
    ) {
        if let Err(err) = Self::try_destroy_chain(runtime, backend, chain) {
            log::error!("[swapchain] unwind teardown error: {err}");
        }
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        // Native handles need the runtime and backend to free; all this
        // drop can do is flag the leak.
        if !self.entries.is_empty() {
            log::error!(
                "[swapchain] dropped with {} live view chains; destroy_all was never called",
                self.entries.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{FORMAT_BGRA8_SRGB, FORMAT_D32_SFLOAT, GraphicsBinding, NullRenderBackend};
    use crate::runtime::sim::SimulatedRuntime;
    use crate::runtime::FormFactor;

    const VIEWS: [ViewProfile; 2] = [
        ViewProfile {
            width: 1664,
            height: 1856,
            sample_count: 1,
        },
        ViewProfile {
            width: 1664,
            height: 1856,
            sample_count: 1,
        },
    ];

    fn fixture(runtime: &mut SimulatedRuntime) -> SwapchainManager {
        let system = runtime.system(FormFactor::HeadMounted).expect("system");
        let session = runtime
            .create_session(system, &GraphicsBinding::default())
            .expect("session");
        SwapchainManager::new(session)
    }

    fn teardown(
        mut manager: SwapchainManager,
        runtime: &mut SimulatedRuntime,
        backend: &mut NullRenderBackend,
    ) {
        manager
            .destroy_all(runtime, backend)
            .expect("teardown should succeed");
    }

    #[test]
    fn two_views_three_images_make_four_chains_twelve_views() {
        let mut runtime = SimulatedRuntime::new().with_images_per_chain(3);
        let mut backend = NullRenderBackend::new();
        let mut manager = fixture(&mut runtime);

        manager
            .create_for_views(&mut runtime, &mut backend, &VIEWS)
            .expect("create should succeed");

        assert_eq!(manager.chain_count(), 4);
        assert_eq!(runtime.live_chain_count(), 4);
        assert_eq!(backend.live_image_view_count(), 12);
        assert_eq!(manager.color_format(), Some(FORMAT_BGRA8_SRGB));
        assert_eq!(manager.depth_format(), Some(FORMAT_D32_SFLOAT));

        teardown(manager, &mut runtime, &mut backend);
        assert_eq!(runtime.live_chain_count(), 0);
        assert_eq!(backend.live_image_view_count(), 0);
        assert_eq!(backend.allocated_chain_count(), 0);
    }

    #[test]
    fn chains_carry_single_layer_single_mip_spec() {
        let mut runtime = SimulatedRuntime::new();
        let mut backend = NullRenderBackend::new();
        let mut manager = fixture(&mut runtime);

        manager
            .create_for_views(&mut runtime, &mut backend, &VIEWS[..1])
            .expect("create");
        let chain = manager.entries[0].color.handle;
        let spec = runtime.chain_spec(chain).expect("spec recorded");
        assert_eq!(spec.face_count, 1);
        assert_eq!(spec.array_size, 1);
        assert_eq!(spec.mip_count, 1);
        assert_eq!(spec.width, VIEWS[0].width);

        teardown(manager, &mut runtime, &mut backend);
    }

    #[test]
    fn missing_depth_format_is_a_configuration_error() {
        let mut runtime = SimulatedRuntime::new();
        let mut backend = NullRenderBackend::new().with_depth_formats(vec![]);
        let mut manager = fixture(&mut runtime);

        let err = manager
            .create_for_views(&mut runtime, &mut backend, &VIEWS)
            .expect_err("no depth format must fail");
        assert!(matches!(
            err,
            SwapchainError::NoCompatibleFormat(ChainKind::Depth)
        ));
        assert_eq!(runtime.live_chain_count(), 0);
    }

    #[test]
    fn acquire_release_bookkeeping() {
        let mut runtime = SimulatedRuntime::new();
        let mut backend = NullRenderBackend::new();
        let mut manager = fixture(&mut runtime);
        manager
            .create_for_views(&mut runtime, &mut backend, &VIEWS)
            .expect("create");

        let acquired = manager
            .acquire_and_wait(&mut runtime, 0)
            .expect("acquire view 0");
        assert_eq!(acquired.extent, VIEWS[0]);
        assert!(manager.is_acquired(0));
        assert!(matches!(
            manager.acquire_and_wait(&mut runtime, 0),
            Err(SwapchainError::AlreadyAcquired(0))
        ));

        manager.release(&mut runtime, 0).expect("release view 0");
        assert!(!manager.is_acquired(0));
        assert!(matches!(
            manager.release(&mut runtime, 0),
            Err(SwapchainError::NotAcquired(0))
        ));
        assert_eq!(runtime.acquired_image_count(), 0);

        teardown(manager, &mut runtime, &mut backend);
    }

    #[test]
    fn destroy_is_rejected_while_acquired() {
        let mut runtime = SimulatedRuntime::new();
        let mut backend = NullRenderBackend::new();
        let mut manager = fixture(&mut runtime);
        manager
            .create_for_views(&mut runtime, &mut backend, &VIEWS)
            .expect("create");

        manager
            .acquire_and_wait(&mut runtime, 1)
            .expect("acquire view 1");
        assert!(matches!(
            manager.destroy_all(&mut runtime, &mut backend),
            Err(SwapchainError::StillAcquired(1))
        ));
        assert_eq!(runtime.live_chain_count(), 4);

        manager.release(&mut runtime, 1).expect("release");
        teardown(manager, &mut runtime, &mut backend);
    }

    #[test]
    fn wait_failure_releases_both_acquisitions() {
        let mut runtime = SimulatedRuntime::new();
        let mut backend = NullRenderBackend::new();
        let mut manager = fixture(&mut runtime);
        manager
            .create_for_views(&mut runtime, &mut backend, &VIEWS)
            .expect("create");

        runtime.fail_wait_image(1);
        assert!(manager.acquire_and_wait(&mut runtime, 0).is_err());
        assert!(!manager.is_acquired(0));
        assert_eq!(runtime.acquired_image_count(), 0);

        // chain is healthy again afterwards
        manager.acquire_and_wait(&mut runtime, 0).expect("acquire");
        manager.release(&mut runtime, 0).expect("release");
        teardown(manager, &mut runtime, &mut backend);
    }

    #[test]
    fn partial_creation_failure_leaves_manager_destroyable() {
        // allow view 0's pair plus one more chain, then fail
        let mut runtime = SimulatedRuntime::new();
        runtime.limit_swapchain_creates(3);
        let mut backend = NullRenderBackend::new();
        let mut manager = fixture(&mut runtime);

        assert!(
            manager
                .create_for_views(&mut runtime, &mut backend, &VIEWS)
                .is_err()
        );
        // the half-built second pair was unwound; the first pair survives
        assert_eq!(manager.view_count(), 1);
        assert_eq!(runtime.live_chain_count(), 2);

        teardown(manager, &mut runtime, &mut backend);
        assert_eq!(runtime.live_chain_count(), 0);
        assert_eq!(backend.live_image_view_count(), 0);
    }
}
