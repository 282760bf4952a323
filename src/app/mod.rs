use crate::frame::{FrameError, FrameLoop};
use crate::render::RenderBackend;
use crate::runtime::{
    BlendMode, CompositorRuntime, FormFactor, RuntimeError, SessionHandle, SessionState,
    ViewLayout,
};
use crate::session::{EventDispatcher, SessionLifecycle};
use crate::space::ReferenceSpaceAnchor;
use crate::swapchain::{SwapchainError, SwapchainManager};
use crate::view::{resolve_blend_mode, resolve_views};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Poll cadence while no session is running and nothing paces the loop.
const IDLE_POLL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app_name: String,
    pub form_factor: FormFactor,
    /// View layouts in preference order; stereo defaults apply when none
    /// resolves.
    pub preferred_layouts: Vec<ViewLayout>,
    /// Blend modes in preference order; `Opaque` applies when none is
    /// advertised.
    pub preferred_blend_modes: Vec<BlendMode>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "vergence-client".to_owned(),
            form_factor: FormFactor::HeadMounted,
            preferred_layouts: vec![ViewLayout::Stereo],
            preferred_blend_modes: vec![BlendMode::Opaque, BlendMode::Additive],
        }
    }
}

impl AppConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// What a completed run looked like, for callers and tests.
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    pub frames: u64,
    pub final_state: SessionState,
    pub blend_mode: BlendMode,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Swapchain(#[from] SwapchainError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Application root: owns the compositor connection and the rendering
/// backend, wires the object graph in dependency order, and drives the
/// outer run loop until a terminal event clears `application_running`.
pub struct App {
    config: AppConfig,
    runtime: Box<dyn CompositorRuntime>,
    backend: Box<dyn RenderBackend>,
}

impl App {
    pub fn new(
        config: AppConfig,
        runtime: Box<dyn CompositorRuntime>,
        backend: Box<dyn RenderBackend>,
    ) -> Self {
        Self {
            config,
            runtime,
            backend,
        }
    }

    /// Brings up system → session → reference space → swapchains, drives
    /// the tick loop, and tears everything down in reverse order. The
    /// teardown runs on every path out of the loop, including fatal
    /// protocol errors.
    pub fn run(&mut self) -> Result<RunReport, AppError> {
        let runtime = self.runtime.as_mut();
        let backend = self.backend.as_mut();
        log::info!(
            "[app] {} starting ({} / {})",
            self.config.app_name,
            runtime.label(),
            backend.label()
        );

        let system = runtime.system(self.config.form_factor)?;
        let view_config = resolve_views(runtime, system, &self.config.preferred_layouts);
        let blend_mode = resolve_blend_mode(runtime, system, &self.config.preferred_blend_modes);
        let binding = backend.graphics_binding();
        let session = runtime.create_session(system, &binding)?;

        let mut lifecycle = SessionLifecycle::new(session);
        let mut dispatcher = EventDispatcher::default();
        let mut frame_loop = FrameLoop::new(view_config.layout, blend_mode);
        let mut swapchains = SwapchainManager::new(session);

        let space = match ReferenceSpaceAnchor::create(runtime, session) {
            Ok(space) => space,
            Err(err) => {
                best_effort_destroy_session(runtime, session);
                return Err(err.into());
            }
        };

        let outcome = swapchains
            .create_for_views(runtime, backend, &view_config.views)
            .map_err(AppError::from)
            .and_then(|()| {
                drive(
                    runtime,
                    backend,
                    &mut dispatcher,
                    &mut lifecycle,
                    &mut swapchains,
                    &space,
                    &mut frame_loop,
                )
            });

        let mut teardown_failure: Option<AppError> = None;
        if let Err(err) = swapchains.destroy_all(runtime, backend) {
            log::error!("[app] swapchain teardown failed: {err}");
            teardown_failure.get_or_insert(err.into());
        }
        if let Err(err) = space.destroy(runtime) {
            log::error!("[app] reference space teardown failed: {err}");
            teardown_failure.get_or_insert(err.into());
        }
        if let Err(err) = runtime.destroy_session(session) {
            log::error!("[app] session teardown failed: {err}");
            teardown_failure.get_or_insert(err.into());
        }

        outcome?;
        if let Some(err) = teardown_failure {
            return Err(err);
        }

        let report = RunReport {
            frames: frame_loop.frames(),
            final_state: lifecycle.state(),
            blend_mode,
        };
        log::info!(
            "[app] run complete: {} frames, final state {:?}",
            report.frames,
            report.final_state
        );
        Ok(report)
    }
}

fn drive(
    runtime: &mut dyn CompositorRuntime,
    backend: &mut dyn RenderBackend,
    dispatcher: &mut EventDispatcher,
    lifecycle: &mut SessionLifecycle,
    swapchains: &mut SwapchainManager,
    space: &ReferenceSpaceAnchor,
    frame_loop: &mut FrameLoop,
) -> Result<(), AppError> {
    while lifecycle.application_running() {
        dispatcher.pump(runtime, lifecycle)?;
        if !lifecycle.application_running() {
            break;
        }
        if lifecycle.session_running() {
            frame_loop.tick(runtime, backend, lifecycle, swapchains, space)?;
        } else {
            // no wait-frame call paces the loop until a session runs
            thread::sleep(IDLE_POLL);
        }
    }
    Ok(())
}

fn best_effort_destroy_session(runtime: &mut dyn CompositorRuntime, session: SessionHandle) {
    if let Err(err) = runtime.destroy_session(session) {
        log::error!("[app] session teardown failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::NullRenderBackend;
    use crate::runtime::sim::SimulatedRuntime;

    #[test]
    fn config_defaults_are_documented_fallbacks() {
        let config = AppConfig::default();
        assert_eq!(config.form_factor, FormFactor::HeadMounted);
        assert_eq!(config.preferred_layouts, vec![ViewLayout::Stereo]);
        assert_eq!(config.preferred_blend_modes[0], BlendMode::Opaque);
    }

    #[test]
    fn config_parses_from_json_with_defaults_filled() {
        let config = AppConfig::from_json(
            r#"{"app_name":"probe","preferred_blend_modes":["Additive","Opaque"]}"#,
        )
        .expect("config should parse");

        assert_eq!(config.app_name, "probe");
        assert_eq!(
            config.preferred_blend_modes,
            vec![BlendMode::Additive, BlendMode::Opaque]
        );
        assert_eq!(config.preferred_layouts, vec![ViewLayout::Stereo]);
    }

    #[test]
    fn failed_swapchain_bringup_still_tears_down_everything() {
        let mut runtime = SimulatedRuntime::new();
        runtime.limit_swapchain_creates(1);
        let probe = runtime.probe();
        let mut app = App::new(
            AppConfig::default(),
            Box::new(runtime),
            Box::new(NullRenderBackend::new()),
        );

        assert!(app.run().is_err());
        assert_eq!(probe.live_chain_count(), 0);
        assert_eq!(probe.live_space_count(), 0);
        assert!(!probe.session_live());
    }
}
