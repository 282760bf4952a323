pub mod app;
pub mod frame;
pub mod render;
pub mod runtime;
pub mod session;
pub mod space;
pub mod swapchain;
pub mod view;

use runtime::SessionState;

/// Bootstraps a client run against the simulated compositor, scripted
/// through a full lifecycle: ready, synchronized, visible, focused, then
/// a compositor-initiated stop.
pub fn run() {
    let mut sim = runtime::sim::SimulatedRuntime::new();

    #[cfg(feature = "xr-openxr")]
    match runtime::openxr::OpenXrDiscovery::initialize("vergence-client") {
        Ok(discovery) => match discovery.view_profiles() {
            Ok(profiles) => {
                log::info!("[app] seeding simulation with live view profiles: {profiles:?}");
                sim.set_view_profiles(profiles);
            }
            Err(err) => log::warn!("[app] live view enumeration failed: {err}"),
        },
        Err(err) => {
            log::warn!("[app] OpenXR runtime unavailable; staying on simulation: {err}");
        }
    }

    sim.schedule_state(0, SessionState::Ready);
    sim.schedule_state(1, SessionState::Synchronized);
    sim.schedule_state(2, SessionState::Visible);
    sim.schedule_state(3, SessionState::Focused);
    sim.schedule_state(8, SessionState::Stopping);
    sim.schedule_state(8, SessionState::Exiting);

    let mut app = app::App::new(
        app::AppConfig::default(),
        Box::new(sim),
        Box::new(render::NullRenderBackend::new()),
    );
    match app.run() {
        Ok(report) => log::info!(
            "[app] demo run finished after {} frames in state {:?}",
            report.frames,
            report.final_state
        ),
        Err(err) => log::error!("[app] demo run failed: {err}"),
    }
}
