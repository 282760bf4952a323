use vergence::app::{App, AppConfig};
use vergence::render::NullRenderBackend;
use vergence::runtime::sim::SimulatedRuntime;
use vergence::runtime::{RuntimeEvent, SessionHandle, SessionState};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn run_scripted(sim: SimulatedRuntime) -> (vergence::app::RunReport, vergence::runtime::sim::SimProbe) {
    let probe = sim.probe();
    let mut app = App::new(
        AppConfig::default(),
        Box::new(sim),
        Box::new(NullRenderBackend::new()),
    );
    let report = app.run().expect("scripted run should succeed");
    (report, probe)
}

#[test]
fn full_lifecycle_runs_to_exit_and_cleans_up() {
    init_logging();
    let mut sim = SimulatedRuntime::new();
    sim.schedule_state(0, SessionState::Ready);
    sim.schedule_state(1, SessionState::Synchronized);
    sim.schedule_state(2, SessionState::Visible);
    sim.schedule_state(3, SessionState::Focused);
    sim.schedule_state(6, SessionState::Stopping);
    sim.schedule_state(6, SessionState::Exiting);

    let (report, probe) = run_scripted(sim);

    assert_eq!(report.frames, 6);
    assert_eq!(report.final_state, SessionState::Exiting);
    assert_eq!(probe.begin_session_calls(), 1);
    assert_eq!(probe.end_session_calls(), 1);
    // frame 1 runs in Ready (unauthorized), the rest carry one layer
    assert_eq!(probe.layer_counts(), vec![0, 1, 1, 1, 1, 1]);
    assert_eq!(probe.acquired_image_count(), 0);
    assert_eq!(probe.live_chain_count(), 0);
    assert_eq!(probe.live_space_count(), 0);
    assert!(!probe.session_live());
}

#[test]
fn loss_pending_terminates_without_an_end_request() {
    init_logging();
    let mut sim = SimulatedRuntime::new();
    sim.schedule_state(0, SessionState::Ready);
    sim.schedule_state(2, SessionState::LossPending);

    let (report, probe) = run_scripted(sim);

    assert_eq!(report.final_state, SessionState::LossPending);
    assert_eq!(probe.begin_session_calls(), 1);
    assert_eq!(probe.end_session_calls(), 0);
    assert!(!probe.session_live());
    assert_eq!(probe.live_chain_count(), 0);
}

#[test]
fn foreign_session_events_do_not_drive_the_lifecycle() {
    init_logging();
    let mut sim = SimulatedRuntime::new();
    // a state change for a session this client does not own
    sim.queue_event(RuntimeEvent::SessionStateChanged {
        session: SessionHandle(999),
        state: SessionState::Ready,
    });
    sim.schedule_state(0, SessionState::Ready);
    sim.schedule_state(2, SessionState::Stopping);
    sim.schedule_state(2, SessionState::Exiting);

    let (report, probe) = run_scripted(sim);

    assert_eq!(probe.begin_session_calls(), 1);
    assert_eq!(probe.end_session_calls(), 1);
    assert_eq!(report.frames, 2);
}

#[test]
fn duplicate_ready_events_begin_once() {
    init_logging();
    let mut sim = SimulatedRuntime::new();
    sim.schedule_state(0, SessionState::Ready);
    sim.schedule_state(0, SessionState::Ready);
    sim.schedule_state(1, SessionState::Stopping);
    sim.schedule_state(1, SessionState::Exiting);

    let (_report, probe) = run_scripted(sim);

    assert_eq!(probe.begin_session_calls(), 1);
    assert_eq!(probe.end_session_calls(), 1);
}
