#[cfg(feature = "xr-openxr")]
pub mod openxr;
pub mod sim;

use crate::render::GraphicsBinding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier for the target device family, resolved once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub u64);

/// Handle to the one session bound between this client and the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// Handle to a single presentable image chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceHandle(pub u64);

/// Timestamp in nanoseconds on the compositor's clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct DisplayTime(pub i64);

/// Pixel format identifier as advertised by the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageFormat(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormFactor {
    HeadMounted,
    Handheld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewLayout {
    Mono,
    Stereo,
}

/// Compositing mode negotiated with the runtime. Opaque displays replace
/// the environment; additive and alpha-blend displays pass it through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendMode {
    Opaque,
    Additive,
    AlphaBlend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    View,
    Local,
    Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    Color,
    Depth,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posef {
    /// Unit quaternion, `[x, y, z, w]`.
    pub orientation: [f32; 4],
    pub position: [f32; 3],
}

impl Posef {
    pub const IDENTITY: Self = Self {
        orientation: [0.0, 0.0, 0.0, 1.0],
        position: [0.0, 0.0, 0.0],
    };
}

impl Default for Posef {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Half-angles of one view's frustum, in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fovf {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

/// Recommended render-target shape for one view, as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewProfile {
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
}

/// One view located within a reference space at a display time.
#[derive(Debug, Clone, Copy)]
pub struct LocatedView {
    pub pose: Posef,
    pub fov: Fovf,
}

/// Result of the per-tick timing query. `should_render` is the runtime's
/// hint that submitted layers will actually be composited this frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameTiming {
    pub predicted_display_time: DisplayTime,
    pub predicted_period_nanos: i64,
    pub should_render: bool,
}

/// Session lifecycle states as reported by the compositor's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    Exiting,
    LossPending,
}

/// Events drained from the compositor's queue each tick. Closed union,
/// dispatched by exhaustive match; adapters translate runtime-native
/// event records into these variants and drop kinds they do not model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuntimeEvent {
    EventsLost { count: u32 },
    InstanceLossPending { lost_at: DisplayTime },
    InteractionProfileChanged { session: SessionHandle },
    ReferenceSpaceChangePending { session: SessionHandle },
    SessionStateChanged { session: SessionHandle, state: SessionState },
}

/// Creation parameters for one presentable image chain.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainSpec {
    pub kind: ChainKind,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum ImageWait {
    /// Block until the runtime signals the image, however long that takes.
    Infinite,
    Nanos(i64),
}

/// One view's contribution to a projection layer.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionView {
    pub pose: Posef,
    pub fov: Fovf,
    pub sub_image: SubImage,
}

/// Region of a swapchain image referenced by a projection view.
#[derive(Debug, Clone, Copy)]
pub struct SubImage {
    pub chain: SwapchainHandle,
    pub width: u32,
    pub height: u32,
    pub array_index: u32,
}

/// A composition layer: per-view projections expressed in one space.
#[derive(Debug, Clone)]
pub struct ProjectionLayer {
    pub space: SpaceHandle,
    pub views: Vec<ProjectionView>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("compositor rejected {call}: {reason}")]
    Call { call: &'static str, reason: String },
    #[error("compositor connection unusable: {0}")]
    ConnectionLost(String),
    #[error("unknown handle passed to {call}")]
    UnknownHandle { call: &'static str },
}

impl RuntimeError {
    pub fn call(call: &'static str, reason: impl Into<String>) -> Self {
        Self::Call {
            call,
            reason: reason.into(),
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Capability interface over the external spatial compositor. One
/// implementation drives a live runtime; `sim::SimulatedRuntime` drives
/// tests and the demo loop. All calls happen on the single protocol
/// thread, so the trait takes `&mut self` throughout.
pub trait CompositorRuntime: Send {
    fn label(&self) -> &'static str;

    fn system(&mut self, form_factor: FormFactor) -> RuntimeResult<SystemId>;

    fn enumerate_views(
        &mut self,
        system: SystemId,
        layout: ViewLayout,
    ) -> RuntimeResult<Vec<ViewProfile>>;

    fn enumerate_blend_modes(&mut self, system: SystemId) -> RuntimeResult<Vec<BlendMode>>;

    fn create_session(
        &mut self,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> RuntimeResult<SessionHandle>;

    fn destroy_session(&mut self, session: SessionHandle) -> RuntimeResult<()>;

    fn begin_session(&mut self, session: SessionHandle) -> RuntimeResult<()>;

    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()>;

    /// Drains one event from the runtime's queue, `None` when empty.
    fn poll_event(&mut self) -> RuntimeResult<Option<RuntimeEvent>>;

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        kind: SpaceKind,
        pose: Posef,
    ) -> RuntimeResult<SpaceHandle>;

    fn destroy_reference_space(&mut self, space: SpaceHandle) -> RuntimeResult<()>;

    /// Formats in runtime preference order.
    fn enumerate_swapchain_formats(
        &mut self,
        session: SessionHandle,
    ) -> RuntimeResult<Vec<ImageFormat>>;

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        spec: &SwapchainSpec,
    ) -> RuntimeResult<SwapchainHandle>;

    fn destroy_swapchain(&mut self, chain: SwapchainHandle) -> RuntimeResult<()>;

    /// Buffered image count for a chain; decided by the runtime, never by
    /// the application.
    fn swapchain_image_count(&mut self, chain: SwapchainHandle) -> RuntimeResult<u32>;

    fn acquire_image(&mut self, chain: SwapchainHandle) -> RuntimeResult<u32>;

    fn wait_image(&mut self, chain: SwapchainHandle, timeout: ImageWait) -> RuntimeResult<()>;

    fn release_image(&mut self, chain: SwapchainHandle) -> RuntimeResult<()>;

    /// Blocks on the runtime's pacing signal and returns predicted timing.
    /// This call is the frame loop's sole rate limiter.
    fn wait_frame(&mut self, session: SessionHandle) -> RuntimeResult<FrameTiming>;

    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()>;

    /// Closes the frame opened by `begin_frame`. Must be called exactly
    /// once per begun frame, with an empty layer slice when nothing was
    /// rendered, or compositor pacing desynchronizes.
    fn end_frame(
        &mut self,
        session: SessionHandle,
        display_time: DisplayTime,
        blend_mode: BlendMode,
        layers: &[ProjectionLayer],
    ) -> RuntimeResult<()>;

    fn locate_views(
        &mut self,
        session: SessionHandle,
        space: SpaceHandle,
        layout: ViewLayout,
        time: DisplayTime,
    ) -> RuntimeResult<Vec<LocatedView>>;
}
