use crate::runtime::{ChainKind, SwapchainHandle, ViewProfile};
pub use crate::runtime::ImageFormat;
use std::collections::HashMap;
use thiserror::Error;

// Vulkan-convention format ids, shared by the null backend and the
// simulated compositor so format negotiation has something to intersect.
pub const FORMAT_RGBA8_UNORM: ImageFormat = ImageFormat(37);
pub const FORMAT_RGBA8_SRGB: ImageFormat = ImageFormat(43);
pub const FORMAT_BGRA8_SRGB: ImageFormat = ImageFormat(50);
pub const FORMAT_D16_UNORM: ImageFormat = ImageFormat(124);
pub const FORMAT_D32_SFLOAT: ImageFormat = ImageFormat(126);

/// Backend-owned image backing one swapchain slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub u64);

/// Backend-owned view over a swapchain image, usable as a render target
/// or depth-stencil attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewHandle(pub u64);

/// Descriptor the backend hands to the compositor at session creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphicsBinding {
    pub device_id: u64,
    pub queue_family: u32,
    pub queue_index: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageViewSpec {
    pub image: ImageHandle,
    pub kind: ChainKind,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

/// Viewport and scissor in one, derived from a view's recommended extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRegion {
    pub width: u32,
    pub height: u32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl RenderRegion {
    pub fn covering(profile: ViewProfile) -> Self {
        Self {
            width: profile.width,
            height: profile.height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("gpu backend failure in {call}: {reason}")]
    Backend { call: &'static str, reason: String },
    #[error("backend has no image view {0:?}")]
    UnknownView(ImageViewHandle),
}

impl RenderError {
    pub fn backend(call: &'static str, reason: impl Into<String>) -> Self {
        Self::Backend {
            call,
            reason: reason.into(),
        }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Capability interface over the rendering backend. The protocol core
/// never assumes a concrete graphics API; it selects formats, materializes
/// image views, and brackets per-view work between `begin_rendering` and
/// `end_rendering`. `end_rendering` must not return until the backend's
/// work for the current image is handed off, because the caller releases
/// that image to the compositor immediately afterwards.
pub trait RenderBackend: Send {
    fn label(&self) -> &'static str;

    fn graphics_binding(&self) -> GraphicsBinding;

    /// First candidate this backend can render color into, in the order
    /// given. `None` means no compatible format.
    fn select_color_format(&self, candidates: &[ImageFormat]) -> Option<ImageFormat>;

    fn select_depth_format(&self, candidates: &[ImageFormat]) -> Option<ImageFormat>;

    /// Imports the runtime's `count` buffered images for a chain.
    fn allocate_swapchain_images(
        &mut self,
        chain: SwapchainHandle,
        kind: ChainKind,
        count: u32,
    ) -> RenderResult<()>;

    fn free_swapchain_images(&mut self, chain: SwapchainHandle) -> RenderResult<()>;

    fn swapchain_image(&mut self, chain: SwapchainHandle, index: u32) -> RenderResult<ImageHandle>;

    fn create_image_view(&mut self, spec: &ImageViewSpec) -> RenderResult<ImageViewHandle>;

    fn destroy_image_view(&mut self, view: ImageViewHandle) -> RenderResult<()>;

    fn begin_rendering(&mut self) -> RenderResult<()>;

    fn end_rendering(&mut self) -> RenderResult<()>;

    fn set_render_region(&mut self, region: RenderRegion) -> RenderResult<()>;

    fn clear_color(&mut self, view: ImageViewHandle, rgba: [f32; 4]) -> RenderResult<()>;

    fn clear_depth(&mut self, view: ImageViewHandle, value: f32) -> RenderResult<()>;
}

/// Backend that tracks handles and call balance without touching a GPU.
/// Drives the demo loop and every test that exercises the frame protocol.
pub struct NullRenderBackend {
    next_handle: u64,
    color_compatible: Vec<ImageFormat>,
    depth_compatible: Vec<ImageFormat>,
    images: HashMap<(SwapchainHandle, u32), ImageHandle>,
    allocated: HashMap<SwapchainHandle, u32>,
    views: HashMap<ImageViewHandle, ImageViewSpec>,
    pass_open: bool,
    last_region: Option<RenderRegion>,
    color_clears: Vec<[f32; 4]>,
    depth_clears: Vec<f32>,
}

impl NullRenderBackend {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            color_compatible: vec![FORMAT_RGBA8_SRGB, FORMAT_BGRA8_SRGB, FORMAT_RGBA8_UNORM],
            depth_compatible: vec![FORMAT_D32_SFLOAT, FORMAT_D16_UNORM],
            images: HashMap::new(),
            allocated: HashMap::new(),
            views: HashMap::new(),
            pass_open: false,
            last_region: None,
            color_clears: Vec::new(),
            depth_clears: Vec::new(),
        }
    }

    pub fn with_color_formats(mut self, formats: Vec<ImageFormat>) -> Self {
        self.color_compatible = formats;
        self
    }

    pub fn with_depth_formats(mut self, formats: Vec<ImageFormat>) -> Self {
        self.depth_compatible = formats;
        self
    }

    pub fn live_image_view_count(&self) -> usize {
        self.views.len()
    }

    pub fn allocated_chain_count(&self) -> usize {
        self.allocated.len()
    }

    pub fn color_clears(&self) -> &[[f32; 4]] {
        &self.color_clears
    }

    pub fn depth_clears(&self) -> &[f32] {
        &self.depth_clears
    }

    pub fn last_region(&self) -> Option<RenderRegion> {
        self.last_region
    }

    fn next(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl Default for NullRenderBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for NullRenderBackend {
    fn label(&self) -> &'static str {
        "Null Render Backend"
    }

    fn graphics_binding(&self) -> GraphicsBinding {
        GraphicsBinding {
            device_id: 1,
            queue_family: 0,
            queue_index: 0,
        }
    }

    fn select_color_format(&self, candidates: &[ImageFormat]) -> Option<ImageFormat> {
        candidates
            .iter()
            .copied()
            .find(|format| self.color_compatible.contains(format))
    }

    fn select_depth_format(&self, candidates: &[ImageFormat]) -> Option<ImageFormat> {
        candidates
            .iter()
            .copied()
            .find(|format| self.depth_compatible.contains(format))
    }

    fn allocate_swapchain_images(
        &mut self,
        chain: SwapchainHandle,
        _kind: ChainKind,
        count: u32,
    ) -> RenderResult<()> {
        if self.allocated.contains_key(&chain) {
            return Err(RenderError::backend(
                "allocate_swapchain_images",
                format!("chain {chain:?} already has image data"),
            ));
        }
        for index in 0..count {
            let image = ImageHandle(self.next());
            self.images.insert((chain, index), image);
        }
        self.allocated.insert(chain, count);
        Ok(())
    }

    fn free_swapchain_images(&mut self, chain: SwapchainHandle) -> RenderResult<()> {
        let Some(count) = self.allocated.remove(&chain) else {
            return Err(RenderError::backend(
                "free_swapchain_images",
                format!("chain {chain:?} has no image data"),
            ));
        };
        for index in 0..count {
            self.images.remove(&(chain, index));
        }
        Ok(())
    }

    fn swapchain_image(&mut self, chain: SwapchainHandle, index: u32) -> RenderResult<ImageHandle> {
        self.images.get(&(chain, index)).copied().ok_or_else(|| {
            RenderError::backend(
                "swapchain_image",
                format!("chain {chain:?} has no image {index}"),
            )
        })
    }

    fn create_image_view(&mut self, spec: &ImageViewSpec) -> RenderResult<ImageViewHandle> {
        let view = ImageViewHandle(self.next());
        self.views.insert(view, *spec);
        Ok(view)
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) -> RenderResult<()> {
        match self.views.remove(&view) {
            Some(_) => Ok(()),
            None => Err(RenderError::UnknownView(view)),
        }
    }

    fn begin_rendering(&mut self) -> RenderResult<()> {
        if self.pass_open {
            return Err(RenderError::backend(
                "begin_rendering",
                "previous rendering bracket still open",
            ));
        }
        self.pass_open = true;
        Ok(())
    }

    fn end_rendering(&mut self) -> RenderResult<()> {
        if !self.pass_open {
            return Err(RenderError::backend(
                "end_rendering",
                "no rendering bracket open",
            ));
        }
        self.pass_open = false;
        Ok(())
    }

    fn set_render_region(&mut self, region: RenderRegion) -> RenderResult<()> {
        self.last_region = Some(region);
        Ok(())
    }

    fn clear_color(&mut self, view: ImageViewHandle, rgba: [f32; 4]) -> RenderResult<()> {
        if !self.views.contains_key(&view) {
            return Err(RenderError::UnknownView(view));
        }
        self.color_clears.push(rgba);
        Ok(())
    }

    fn clear_depth(&mut self, view: ImageViewHandle, value: f32) -> RenderResult<()> {
        if !self.views.contains_key(&view) {
            return Err(RenderError::UnknownView(view));
        }
        self.depth_clears.push(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ChainKind;

    #[test]
    fn format_selection_honors_candidate_order() {
        let backend = NullRenderBackend::new();
        let offered = [FORMAT_BGRA8_SRGB, FORMAT_RGBA8_SRGB, FORMAT_D32_SFLOAT];

        assert_eq!(
            backend.select_color_format(&offered),
            Some(FORMAT_BGRA8_SRGB)
        );
        assert_eq!(
            backend.select_depth_format(&offered),
            Some(FORMAT_D32_SFLOAT)
        );
    }

    #[test]
    fn format_selection_reports_no_match() {
        let backend = NullRenderBackend::new().with_depth_formats(vec![]);
        assert_eq!(backend.select_depth_format(&[FORMAT_D16_UNORM]), None);
    }

    #[test]
    fn image_data_allocation_round_trips() {
        let mut backend = NullRenderBackend::new();
        let chain = SwapchainHandle(7);

        backend
            .allocate_swapchain_images(chain, ChainKind::Color, 3)
            .expect("allocation should succeed");
        for index in 0..3 {
            backend
                .swapchain_image(chain, index)
                .expect("allocated image should resolve");
        }
        assert!(backend.swapchain_image(chain, 3).is_err());

        backend
            .free_swapchain_images(chain)
            .expect("free should succeed");
        assert!(backend.swapchain_image(chain, 0).is_err());
        assert_eq!(backend.allocated_chain_count(), 0);
    }

    #[test]
    fn rendering_bracket_must_balance() {
        let mut backend = NullRenderBackend::new();

        assert!(backend.end_rendering().is_err());
        backend.begin_rendering().expect("bracket should open");
        assert!(backend.begin_rendering().is_err());
        backend.end_rendering().expect("bracket should close");
    }

    #[test]
    fn clears_require_a_live_view() {
        let mut backend = NullRenderBackend::new();
        let spec = ImageViewSpec {
            image: ImageHandle(1),
            kind: ChainKind::Color,
            format: FORMAT_RGBA8_SRGB,
            width: 64,
            height: 64,
        };
        let view = backend.create_image_view(&spec).expect("view");

        backend
            .clear_color(view, [0.0, 0.0, 0.0, 1.0])
            .expect("clear against live view");
        backend.destroy_image_view(view).expect("destroy");
        assert!(backend.clear_color(view, [0.0, 0.0, 0.0, 1.0]).is_err());
    }
}
