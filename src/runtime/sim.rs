//! Scripted compositor used by tests and the demo loop. Mirrors the real
//! protocol's ordering rules: it rejects unpaired frame begin/end calls,
//! double acquisition, and destruction of a chain whose image is still out.

use super::{
    BlendMode, CompositorRuntime, DisplayTime, FormFactor, FrameTiming, Fovf, ImageFormat,
    ImageWait, LocatedView, Posef, ProjectionLayer, RuntimeError, RuntimeEvent, RuntimeResult,
    SessionHandle, SessionState, SpaceHandle, SpaceKind, SwapchainHandle, SwapchainSpec, SystemId,
    ViewLayout, ViewProfile,
};
use crate::render::{
    FORMAT_BGRA8_SRGB, FORMAT_D16_UNORM, FORMAT_D32_SFLOAT, FORMAT_RGBA8_SRGB, GraphicsBinding,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

const START_TIME_NANOS: i64 = 1_000_000_000;
const FRAME_PERIOD_NANOS: i64 = 11_111_111;

#[derive(Default)]
struct ProbeInner {
    begin_session_calls: u32,
    end_session_calls: u32,
    frames_ended: u64,
    layer_counts: Vec<usize>,
    live_chains: usize,
    live_spaces: usize,
    session_live: bool,
    acquired_images: usize,
}

/// Shared view of the simulated compositor's counters. Stays valid after
/// the runtime itself is boxed and handed to the application root, so
/// tests can assert on protocol traffic post-run.
#[derive(Clone, Default)]
pub struct SimProbe {
    inner: Arc<Mutex<ProbeInner>>,
}

impl SimProbe {
    fn with<R>(&self, read: impl FnOnce(&ProbeInner) -> R) -> R {
        let inner = self.inner.lock().expect("sim probe mutex should not poison");
        read(&inner)
    }

    fn update(&self, write: impl FnOnce(&mut ProbeInner)) {
        let mut inner = self.inner.lock().expect("sim probe mutex should not poison");
        write(&mut inner);
    }

    pub fn begin_session_calls(&self) -> u32 {
        self.with(|inner| inner.begin_session_calls)
    }

    pub fn end_session_calls(&self) -> u32 {
        self.with(|inner| inner.end_session_calls)
    }

    pub fn frames_ended(&self) -> u64 {
        self.with(|inner| inner.frames_ended)
    }

    /// Layer count submitted with each ended frame, in order.
    pub fn layer_counts(&self) -> Vec<usize> {
        self.with(|inner| inner.layer_counts.clone())
    }

    pub fn live_chain_count(&self) -> usize {
        self.with(|inner| inner.live_chains)
    }

    pub fn live_space_count(&self) -> usize {
        self.with(|inner| inner.live_spaces)
    }

    pub fn session_live(&self) -> bool {
        self.with(|inner| inner.session_live)
    }

    pub fn acquired_image_count(&self) -> usize {
        self.with(|inner| inner.acquired_images)
    }
}

struct ChainRecord {
    spec: SwapchainSpec,
    acquired: Option<u32>,
    next_index: u32,
}

pub struct SimulatedRuntime {
    next_handle: u64,
    probe: SimProbe,
    session: Option<SessionHandle>,
    session_begun: bool,
    spaces: Vec<SpaceHandle>,
    chains: HashMap<SwapchainHandle, ChainRecord>,
    events: VecDeque<RuntimeEvent>,
    scripted: VecDeque<(u64, SessionState)>,
    stereo_profiles: Vec<ViewProfile>,
    blend_modes: Vec<BlendMode>,
    formats: Vec<ImageFormat>,
    images_per_chain: u32,
    should_render: bool,
    now: i64,
    frame_open: bool,
    frames_ended: u64,
    fail_locate_views: u32,
    fail_begin_frame: u32,
    fail_wait_image: u32,
    swapchain_creates_left: Option<u32>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            probe: SimProbe::default(),
            session: None,
            session_begun: false,
            spaces: Vec::new(),
            chains: HashMap::new(),
            events: VecDeque::new(),
            scripted: VecDeque::new(),
            stereo_profiles: vec![
                ViewProfile {
                    width: 1664,
                    height: 1856,
                    sample_count: 1,
                };
                2
            ],
            blend_modes: vec![BlendMode::Opaque],
            formats: vec![
                FORMAT_BGRA8_SRGB,
                FORMAT_RGBA8_SRGB,
                FORMAT_D32_SFLOAT,
                FORMAT_D16_UNORM,
            ],
            images_per_chain: 3,
            should_render: true,
            now: START_TIME_NANOS,
            frame_open: false,
            frames_ended: 0,
            fail_locate_views: 0,
            fail_begin_frame: 0,
            fail_wait_image: 0,
            swapchain_creates_left: None,
        }
    }

    pub fn with_images_per_chain(mut self, count: u32) -> Self {
        self.images_per_chain = count;
        self
    }

    pub fn with_blend_modes(mut self, modes: Vec<BlendMode>) -> Self {
        self.blend_modes = modes;
        self
    }

    pub fn with_formats(mut self, formats: Vec<ImageFormat>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_should_render(mut self, should_render: bool) -> Self {
        self.should_render = should_render;
        self
    }

    pub fn set_view_profiles(&mut self, profiles: Vec<ViewProfile>) {
        self.stereo_profiles = profiles;
    }

    /// Clone-able counter handle that outlives a move into `Box<dyn _>`.
    pub fn probe(&self) -> SimProbe {
        self.probe.clone()
    }

    /// Queues an event for immediate delivery on the next poll.
    pub fn queue_event(&mut self, event: RuntimeEvent) {
        self.events.push_back(event);
    }

    /// Schedules a state transition for the owned session, delivered once
    /// `after_frames` frames have been submitted. Entries keep FIFO order.
    pub fn schedule_state(&mut self, after_frames: u64, state: SessionState) {
        self.scripted.push_back((after_frames, state));
    }

    /// Makes the next `count` view-locate calls report failure.
    pub fn fail_locate_views(&mut self, count: u32) {
        self.fail_locate_views = count;
    }

    pub fn fail_begin_frame(&mut self, count: u32) {
        self.fail_begin_frame = count;
    }

    pub fn fail_wait_image(&mut self, count: u32) {
        self.fail_wait_image = count;
    }

    /// Allows `count` more swapchain creations, then fails the rest.
    pub fn limit_swapchain_creates(&mut self, count: u32) {
        self.swapchain_creates_left = Some(count);
    }

    pub fn begin_session_calls(&self) -> u32 {
        self.probe.begin_session_calls()
    }

    pub fn end_session_calls(&self) -> u32 {
        self.probe.end_session_calls()
    }

    pub fn frames_ended(&self) -> u64 {
        self.frames_ended
    }

    pub fn layer_counts(&self) -> Vec<usize> {
        self.probe.layer_counts()
    }

    pub fn live_chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn live_space_count(&self) -> usize {
        self.spaces.len()
    }

    pub fn session_live(&self) -> bool {
        self.session.is_some()
    }

    /// Creation parameters the client passed for a live chain.
    pub fn chain_spec(&self, chain: SwapchainHandle) -> Option<SwapchainSpec> {
        self.chains.get(&chain).map(|record| record.spec)
    }

    pub fn acquired_image_count(&self) -> usize {
        self.chains
            .values()
            .filter(|record| record.acquired.is_some())
            .count()
    }

    fn next(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn check_session(&self, call: &'static str, session: SessionHandle) -> RuntimeResult<()> {
        if self.session == Some(session) {
            Ok(())
        } else {
            Err(RuntimeError::UnknownHandle { call })
        }
    }

    fn chain_mut<'a>(
        chains: &'a mut HashMap<SwapchainHandle, ChainRecord>,
        call: &'static str,
        chain: SwapchainHandle,
    ) -> RuntimeResult<&'a mut ChainRecord> {
        chains
            .get_mut(&chain)
            .ok_or(RuntimeError::UnknownHandle { call })
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositorRuntime for SimulatedRuntime {
    fn label(&self) -> &'static str {
        "Simulated Compositor"
    }

    fn system(&mut self, _form_factor: FormFactor) -> RuntimeResult<SystemId> {
        Ok(SystemId(1))
    }

    fn enumerate_views(
        &mut self,
        _system: SystemId,
        layout: ViewLayout,
    ) -> RuntimeResult<Vec<ViewProfile>> {
        match layout {
            ViewLayout::Stereo => Ok(self.stereo_profiles.clone()),
            ViewLayout::Mono => Ok(Vec::new()),
        }
    }

    fn enumerate_blend_modes(&mut self, _system: SystemId) -> RuntimeResult<Vec<BlendMode>> {
        Ok(self.blend_modes.clone())
    }

    fn create_session(
        &mut self,
        _system: SystemId,
        _binding: &GraphicsBinding,
    ) -> RuntimeResult<SessionHandle> {
        if self.session.is_some() {
            return Err(RuntimeError::call(
                "create_session",
                "session already exists",
            ));
        }
        let handle = SessionHandle(self.next());
        self.session = Some(handle);
        self.probe.update(|inner| inner.session_live = true);
        Ok(handle)
    }

    fn destroy_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.check_session("destroy_session", session)?;
        if !self.chains.is_empty() {
            return Err(RuntimeError::call(
                "destroy_session",
                format!("{} swapchains still live", self.chains.len()),
            ));
        }
        if !self.spaces.is_empty() {
            return Err(RuntimeError::call(
                "destroy_session",
                format!("{} reference spaces still live", self.spaces.len()),
            ));
        }
        self.session = None;
        self.session_begun = false;
        self.probe.update(|inner| inner.session_live = false);
        Ok(())
    }

    fn begin_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.check_session("begin_session", session)?;
        if self.session_begun {
            return Err(RuntimeError::call("begin_session", "session already begun"));
        }
        self.session_begun = true;
        self.probe.update(|inner| inner.begin_session_calls += 1);
        Ok(())
    }

    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.check_session("end_session", session)?;
        if !self.session_begun {
            return Err(RuntimeError::call("end_session", "session not begun"));
        }
        self.session_begun = false;
        self.probe.update(|inner| inner.end_session_calls += 1);
        Ok(())
    }

    fn poll_event(&mut self) -> RuntimeResult<Option<RuntimeEvent>> {
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }
        if let (Some(session), Some(&(after, state))) = (self.session, self.scripted.front()) {
            if self.frames_ended >= after {
                self.scripted.pop_front();
                return Ok(Some(RuntimeEvent::SessionStateChanged { session, state }));
            }
        }
        Ok(None)
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        _kind: SpaceKind,
        _pose: Posef,
    ) -> RuntimeResult<SpaceHandle> {
        self.check_session("create_reference_space", session)?;
        let handle = SpaceHandle(self.next());
        self.spaces.push(handle);
        self.probe.update(|inner| inner.live_spaces += 1);
        Ok(handle)
    }

    fn destroy_reference_space(&mut self, space: SpaceHandle) -> RuntimeResult<()> {
        let index = self
            .spaces
            .iter()
            .position(|&candidate| candidate == space)
            .ok_or(RuntimeError::UnknownHandle {
                call: "destroy_reference_space",
            })?;
        self.spaces.remove(index);
        self.probe.update(|inner| inner.live_spaces -= 1);
        Ok(())
    }

    fn enumerate_swapchain_formats(
        &mut self,
        session: SessionHandle,
    ) -> RuntimeResult<Vec<ImageFormat>> {
        self.check_session("enumerate_swapchain_formats", session)?;
        Ok(self.formats.clone())
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        spec: &SwapchainSpec,
    ) -> RuntimeResult<SwapchainHandle> {
        self.check_session("create_swapchain", session)?;
        if let Some(left) = self.swapchain_creates_left.as_mut() {
            if *left == 0 {
                return Err(RuntimeError::call("create_swapchain", "out of chain memory"));
            }
            *left -= 1;
        }
        let handle = SwapchainHandle(self.next());
        self.chains.insert(
            handle,
            ChainRecord {
                spec: *spec,
                acquired: None,
                next_index: 0,
            },
        );
        self.probe.update(|inner| inner.live_chains += 1);
        Ok(handle)
    }

    fn destroy_swapchain(&mut self, chain: SwapchainHandle) -> RuntimeResult<()> {
        let record = Self::chain_mut(&mut self.chains, "destroy_swapchain", chain)?;
        if record.acquired.is_some() {
            return Err(RuntimeError::call(
                "destroy_swapchain",
                "an image is still acquired",
            ));
        }
        self.chains.remove(&chain);
        self.probe.update(|inner| inner.live_chains -= 1);
        Ok(())
    }

    fn swapchain_image_count(&mut self, chain: SwapchainHandle) -> RuntimeResult<u32> {
        Self::chain_mut(&mut self.chains, "swapchain_image_count", chain)?;
        Ok(self.images_per_chain)
    }

    fn acquire_image(&mut self, chain: SwapchainHandle) -> RuntimeResult<u32> {
        let count = self.images_per_chain;
        let record = Self::chain_mut(&mut self.chains, "acquire_image", chain)?;
        if record.acquired.is_some() {
            return Err(RuntimeError::call(
                "acquire_image",
                "previous image not released",
            ));
        }
        let index = record.next_index;
        record.acquired = Some(index);
        record.next_index = (index + 1) % count.max(1);
        self.probe.update(|inner| inner.acquired_images += 1);
        Ok(index)
    }

    fn wait_image(&mut self, chain: SwapchainHandle, _timeout: ImageWait) -> RuntimeResult<()> {
        if self.fail_wait_image > 0 {
            self.fail_wait_image -= 1;
            return Err(RuntimeError::call("wait_image", "device lost"));
        }
        let record = Self::chain_mut(&mut self.chains, "wait_image", chain)?;
        if record.acquired.is_none() {
            return Err(RuntimeError::call("wait_image", "no image acquired"));
        }
        Ok(())
    }

    fn release_image(&mut self, chain: SwapchainHandle) -> RuntimeResult<()> {
        let record = Self::chain_mut(&mut self.chains, "release_image", chain)?;
        if record.acquired.take().is_none() {
            return Err(RuntimeError::call("release_image", "no image acquired"));
        }
        self.probe.update(|inner| inner.acquired_images -= 1);
        Ok(())
    }

    fn wait_frame(&mut self, session: SessionHandle) -> RuntimeResult<FrameTiming> {
        self.check_session("wait_frame", session)?;
        if !self.session_begun {
            return Err(RuntimeError::call("wait_frame", "session not running"));
        }
        self.now += FRAME_PERIOD_NANOS;
        Ok(FrameTiming {
            predicted_display_time: DisplayTime(self.now),
            predicted_period_nanos: FRAME_PERIOD_NANOS,
            should_render: self.should_render,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.check_session("begin_frame", session)?;
        if self.fail_begin_frame > 0 {
            self.fail_begin_frame -= 1;
            return Err(RuntimeError::call("begin_frame", "compositor fault"));
        }
        if self.frame_open {
            return Err(RuntimeError::call("begin_frame", "frame already open"));
        }
        self.frame_open = true;
        Ok(())
    }

    fn end_frame(
        &mut self,
        session: SessionHandle,
        _display_time: DisplayTime,
        _blend_mode: BlendMode,
        layers: &[ProjectionLayer],
    ) -> RuntimeResult<()> {
        self.check_session("end_frame", session)?;
        if !self.frame_open {
            return Err(RuntimeError::call("end_frame", "no frame open"));
        }
        self.frame_open = false;
        self.frames_ended += 1;
        let count = layers.len();
        self.probe.update(|inner| {
            inner.frames_ended += 1;
            inner.layer_counts.push(count);
        });
        Ok(())
    }

    fn locate_views(
        &mut self,
        session: SessionHandle,
        space: SpaceHandle,
        layout: ViewLayout,
        _time: DisplayTime,
    ) -> RuntimeResult<Vec<LocatedView>> {
        self.check_session("locate_views", session)?;
        if !self.spaces.contains(&space) {
            return Err(RuntimeError::UnknownHandle {
                call: "locate_views",
            });
        }
        if self.fail_locate_views > 0 {
            self.fail_locate_views -= 1;
            return Err(RuntimeError::call("locate_views", "tracking lost"));
        }
        let count = match layout {
            ViewLayout::Mono => 1,
            ViewLayout::Stereo => self.stereo_profiles.len(),
        };
        Ok((0..count)
            .map(|_| LocatedView {
                pose: Posef::IDENTITY,
                fov: Fovf {
                    angle_left: -0.785,
                    angle_right: 0.785,
                    angle_up: 0.785,
                    angle_down: -0.785,
                },
            })
            .collect())
    }
}
