use crate::render::{RenderBackend, RenderError, RenderRegion};
use crate::runtime::{
    BlendMode, CompositorRuntime, FrameTiming, ProjectionLayer, ProjectionView, RuntimeError,
    SessionHandle, SubImage, ViewLayout,
};
use crate::session::SessionLifecycle;
use crate::space::ReferenceSpaceAnchor;
use crate::swapchain::{AcquiredImages, SwapchainError, SwapchainManager};
use thiserror::Error;

/// Background tone for opaque displays.
pub const OPAQUE_CLEAR: [f32; 4] = [0.17, 0.17, 0.17, 1.0];
/// Pass-through displays get black so the environment stays visible.
pub const PASSTHROUGH_CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
pub const FAR_DEPTH: f32 = 1.0;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Swapchain(#[from] SwapchainError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

pub type FrameResult<T> = Result<T, FrameError>;

/// Per-tick orchestrator. Owns nothing durable beyond the negotiated
/// blend mode and layout; every tick re-queries timing, consults the
/// lifecycle's authorization gate, and always closes the frame it began.
pub struct FrameLoop {
    layout: ViewLayout,
    blend_mode: BlendMode,
    frames: u64,
}

impl FrameLoop {
    pub fn new(layout: ViewLayout, blend_mode: BlendMode) -> Self {
        Self {
            layout,
            blend_mode,
            frames: 0,
        }
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn clear_color(&self) -> [f32; 4] {
        match self.blend_mode {
            BlendMode::Opaque => OPAQUE_CLEAR,
            BlendMode::Additive | BlendMode::AlphaBlend => PASSTHROUGH_CLEAR,
        }
    }

    /// One tick: wait for the pacing signal, open the frame, render (or
    /// not, per the authorization gate and the runtime's hint), close the
    /// frame. The close runs even when the middle step failed; only a
    /// wait/begin/end protocol failure aborts the run.
    pub fn tick(
        &mut self,
        runtime: &mut dyn CompositorRuntime,
        backend: &mut dyn RenderBackend,
        lifecycle: &SessionLifecycle,
        swapchains: &mut SwapchainManager,
        space: &ReferenceSpaceAnchor,
    ) -> FrameResult<()> {
        let session = lifecycle.session();
        let timing = runtime.wait_frame(session)?;
        runtime.begin_frame(session)?;

        let mut layers = Vec::new();
        if lifecycle.render_authorized(timing.should_render) {
            match self.render_layer(runtime, backend, swapchains, space, session, &timing) {
                Ok(Some(layer)) => layers.push(layer),
                Ok(None) => {}
                Err(err) => {
                    log::warn!("[frame] dropping layer this tick: {err}");
                }
            }
        }

        runtime.end_frame(
            session,
            timing.predicted_display_time,
            self.blend_mode,
            &layers,
        )?;
        self.frames += 1;
        Ok(())
    }

    /// Locates all views at the predicted display time and renders each
    /// into freshly acquired images. Returns `None` when the layer could
    /// not be produced this tick; the caller submits an empty set.
    fn render_layer(
        &mut self,
        runtime: &mut dyn CompositorRuntime,
        backend: &mut dyn RenderBackend,
        swapchains: &mut SwapchainManager,
        space: &ReferenceSpaceAnchor,
        session: SessionHandle,
        timing: &FrameTiming,
    ) -> FrameResult<Option<ProjectionLayer>> {
        let located = match runtime.locate_views(
            session,
            space.handle(),
            self.layout,
            timing.predicted_display_time,
        ) {
            Ok(views) => views,
            Err(err) => {
                log::warn!("[frame] view locate failed: {err}");
                return Ok(None);
            }
        };
        if located.len() != swapchains.view_count() {
            log::warn!(
                "[frame] runtime located {} views but {} chains are up",
                located.len(),
                swapchains.view_count()
            );
            return Ok(None);
        }

        let mut projections = Vec::with_capacity(located.len());
        for (index, view) in located.iter().enumerate() {
            let acquired = match swapchains.acquire_and_wait(runtime, index) {
                Ok(acquired) => acquired,
                Err(err) => {
                    log::warn!("[frame] view {index} acquire failed: {err}");
                    return Ok(None);
                }
            };

            // Release pairs with the successful acquire on every exit
            // path; a draw failure surfaces only after the images are
            // back with the compositor.
            let drawn = self.render_view(backend, &acquired);
            swapchains.release(runtime, index)?;
            drawn?;

            projections.push(ProjectionView {
                pose: view.pose,
                fov: view.fov,
                sub_image: SubImage {
                    chain: acquired.color_chain,
                    width: acquired.extent.width,
                    height: acquired.extent.height,
                    array_index: 0,
                },
            });
        }

        Ok(Some(ProjectionLayer {
            space: space.handle(),
            views: projections,
        }))
    }

    fn render_view(
        &self,
        backend: &mut dyn RenderBackend,
        acquired: &AcquiredImages,
    ) -> Result<(), RenderError> {
        backend.begin_rendering()?;
        let drawn = backend
            .set_render_region(RenderRegion::covering(acquired.extent))
            .and_then(|()| backend.clear_color(acquired.color_view, self.clear_color()))
            .and_then(|()| backend.clear_depth(acquired.depth_view, FAR_DEPTH));
        // the bracket closes even when a draw call failed
        let ended = backend.end_rendering();
        drawn.and(ended)
    }
}
