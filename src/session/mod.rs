use crate::runtime::{
    CompositorRuntime, RuntimeEvent, RuntimeResult, SessionHandle, SessionState,
};

/// Lifecycle flags and state for the one session this client owns.
///
/// Transitions are driven exclusively by session-state-changed events.
/// `session_running` tracks whether the compositor accepted a begin
/// request; `application_running` stays set until a terminal transition
/// (`Exiting`, `LossPending`, or an instance-loss event) tells the outer
/// loop to wind down.
pub struct SessionLifecycle {
    session: SessionHandle,
    state: SessionState,
    session_running: bool,
    application_running: bool,
}

impl SessionLifecycle {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            state: SessionState::Unknown,
            session_running: false,
            application_running: true,
        }
    }

    pub fn session(&self) -> SessionHandle {
        self.session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_running(&self) -> bool {
        self.session_running
    }

    pub fn application_running(&self) -> bool {
        self.application_running
    }

    /// Cooperative shutdown, observed at the top of the next tick.
    pub fn request_shutdown(&mut self) {
        self.application_running = false;
    }

    /// True when frames submitted this tick will be composited: the
    /// session has reached `Synchronized`/`Visible`/`Focused` and the
    /// runtime's per-tick hint says rendering is worthwhile.
    pub fn render_authorized(&self, should_render: bool) -> bool {
        should_render
            && matches!(
                self.state,
                SessionState::Synchronized | SessionState::Visible | SessionState::Focused
            )
    }

    /// Applies one state-changed event. Events tagged with a foreign
    /// session are logged and discarded. Begin/end request failures
    /// propagate; the compositor connection is unusable after one.
    pub fn on_state_changed(
        &mut self,
        runtime: &mut dyn CompositorRuntime,
        session: SessionHandle,
        next: SessionState,
    ) -> RuntimeResult<()> {
        if session != self.session {
            log::warn!(
                "[session] discarding state change for foreign session {session:?} (own: {:?})",
                self.session
            );
            return Ok(());
        }

        log::info!("[session] {:?} -> {next:?}", self.state);
        match next {
            SessionState::Ready => {
                // A duplicate Ready while running must not issue a second
                // begin request.
                if !self.session_running {
                    runtime.begin_session(self.session)?;
                    self.session_running = true;
                }
            }
            SessionState::Stopping => {
                if self.session_running {
                    runtime.end_session(self.session)?;
                    self.session_running = false;
                }
            }
            SessionState::Exiting | SessionState::LossPending => {
                self.session_running = false;
                self.application_running = false;
            }
            // Synchronized is informational: the compositor started
            // consuming our frames, nothing to request back.
            SessionState::Synchronized
            | SessionState::Unknown
            | SessionState::Idle
            | SessionState::Visible
            | SessionState::Focused => {}
        }
        self.state = next;
        Ok(())
    }

    /// Instance-level loss: the whole connection is going away.
    pub fn on_instance_loss(&mut self) {
        self.session_running = false;
        self.application_running = false;
    }
}

/// Drains the compositor's event queue once per tick and routes each
/// event: state changes to the lifecycle, everything else logged and
/// dropped.
#[derive(Default)]
pub struct EventDispatcher {
    drained: u64,
}

impl EventDispatcher {
    pub fn drained(&self) -> u64 {
        self.drained
    }

    pub fn pump(
        &mut self,
        runtime: &mut dyn CompositorRuntime,
        lifecycle: &mut SessionLifecycle,
    ) -> RuntimeResult<()> {
        while let Some(event) = runtime.poll_event()? {
            self.drained += 1;
            match event {
                RuntimeEvent::SessionStateChanged { session, state } => {
                    lifecycle.on_state_changed(runtime, session, state)?;
                }
                RuntimeEvent::InstanceLossPending { lost_at } => {
                    log::warn!("[events] instance loss pending at {lost_at:?}; shutting down");
                    lifecycle.on_instance_loss();
                }
                RuntimeEvent::EventsLost { count } => {
                    log::warn!("[events] compositor dropped {count} queued events");
                }
                RuntimeEvent::InteractionProfileChanged { session } => {
                    log::debug!("[events] interaction profile changed for {session:?}");
                }
                RuntimeEvent::ReferenceSpaceChangePending { session } => {
                    log::debug!("[events] reference space change pending for {session:?}");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::GraphicsBinding;
    use crate::runtime::sim::SimulatedRuntime;
    use crate::runtime::{DisplayTime, FormFactor};
    use proptest::prelude::*;

    fn fixture() -> (SimulatedRuntime, SessionLifecycle) {
        let mut runtime = SimulatedRuntime::new();
        let system = runtime.system(FormFactor::HeadMounted).expect("system");
        let session = runtime
            .create_session(system, &GraphicsBinding::default())
            .expect("session");
        (runtime, SessionLifecycle::new(session))
    }

    fn apply(
        runtime: &mut SimulatedRuntime,
        lifecycle: &mut SessionLifecycle,
        states: &[SessionState],
    ) {
        let session = lifecycle.session();
        for &state in states {
            lifecycle
                .on_state_changed(runtime, session, state)
                .expect("transition should apply");
        }
    }

    #[test]
    fn ready_begins_session_once() {
        let (mut runtime, mut lifecycle) = fixture();

        apply(&mut runtime, &mut lifecycle, &[SessionState::Idle, SessionState::Ready]);
        assert!(lifecycle.session_running());
        assert_eq!(runtime.begin_session_calls(), 1);

        // duplicate Ready within the same running period
        apply(&mut runtime, &mut lifecycle, &[SessionState::Ready]);
        assert_eq!(runtime.begin_session_calls(), 1);
    }

    #[test]
    fn stopping_then_exiting_ends_session_once() {
        let (mut runtime, mut lifecycle) = fixture();

        apply(
            &mut runtime,
            &mut lifecycle,
            &[
                SessionState::Ready,
                SessionState::Synchronized,
                SessionState::Stopping,
                SessionState::Exiting,
            ],
        );
        assert_eq!(runtime.end_session_calls(), 1);
        assert!(!lifecycle.session_running());
        assert!(!lifecycle.application_running());
    }

    #[test]
    fn foreign_session_events_are_discarded() {
        let (mut runtime, mut lifecycle) = fixture();
        let foreign = SessionHandle(lifecycle.session().0 + 99);

        lifecycle
            .on_state_changed(&mut runtime, foreign, SessionState::Ready)
            .expect("foreign event is not an error");
        assert_eq!(lifecycle.state(), SessionState::Unknown);
        assert!(!lifecycle.session_running());
        assert_eq!(runtime.begin_session_calls(), 0);
    }

    #[test]
    fn authorization_requires_state_and_hint() {
        let (mut runtime, mut lifecycle) = fixture();

        assert!(!lifecycle.render_authorized(true));
        apply(&mut runtime, &mut lifecycle, &[SessionState::Ready]);
        assert!(!lifecycle.render_authorized(true));
        apply(&mut runtime, &mut lifecycle, &[SessionState::Synchronized]);
        assert!(lifecycle.render_authorized(true));
        assert!(!lifecycle.render_authorized(false));
        apply(&mut runtime, &mut lifecycle, &[SessionState::Visible, SessionState::Focused]);
        assert!(lifecycle.render_authorized(true));
    }

    #[test]
    fn loss_pending_absorbs_from_any_state() {
        let (mut runtime, mut lifecycle) = fixture();

        apply(
            &mut runtime,
            &mut lifecycle,
            &[SessionState::Ready, SessionState::Visible, SessionState::LossPending],
        );
        assert_eq!(lifecycle.state(), SessionState::LossPending);
        assert!(!lifecycle.session_running());
        assert!(!lifecycle.application_running());
        // no end request on loss: the connection is already gone
        assert_eq!(runtime.end_session_calls(), 0);
    }

    #[test]
    fn dispatcher_routes_and_counts() {
        let (mut runtime, mut lifecycle) = fixture();
        let session = lifecycle.session();
        runtime.queue_event(RuntimeEvent::EventsLost { count: 3 });
        runtime.queue_event(RuntimeEvent::InteractionProfileChanged { session });
        runtime.queue_event(RuntimeEvent::SessionStateChanged {
            session,
            state: SessionState::Ready,
        });

        let mut dispatcher = EventDispatcher::default();
        dispatcher
            .pump(&mut runtime, &mut lifecycle)
            .expect("pump should drain");

        assert_eq!(dispatcher.drained(), 3);
        assert!(lifecycle.session_running());
    }

    #[test]
    fn instance_loss_event_stops_the_application() {
        let (mut runtime, mut lifecycle) = fixture();
        runtime.queue_event(RuntimeEvent::InstanceLossPending {
            lost_at: DisplayTime(42),
        });

        EventDispatcher::default()
            .pump(&mut runtime, &mut lifecycle)
            .expect("pump");
        assert!(!lifecycle.application_running());
    }

    fn arbitrary_state() -> impl Strategy<Value = SessionState> {
        prop_oneof![
            Just(SessionState::Idle),
            Just(SessionState::Ready),
            Just(SessionState::Synchronized),
            Just(SessionState::Visible),
            Just(SessionState::Focused),
            Just(SessionState::Stopping),
            Just(SessionState::Exiting),
            Just(SessionState::LossPending),
        ]
    }

    proptest! {
        // For every delivered sequence, session_running holds iff a Ready
        // was accepted with no Stopping/Exiting/LossPending after it. The
        // stream is cut at the first terminal state: the compositor never
        // revives a session past Exiting/LossPending.
        #[test]
        fn session_running_matches_event_fold(states in proptest::collection::vec(arbitrary_state(), 0..24)) {
            let terminal = states
                .iter()
                .position(|state| {
                    matches!(state, SessionState::Exiting | SessionState::LossPending)
                })
                .map_or(states.len(), |index| index + 1);
            let delivered = &states[..terminal];

            let (mut runtime, mut lifecycle) = fixture();
            apply(&mut runtime, &mut lifecycle, delivered);

            let expected = delivered.iter().fold(false, |running, state| match state {
                SessionState::Ready => true,
                SessionState::Stopping
                | SessionState::Exiting
                | SessionState::LossPending => false,
                _ => running,
            });
            prop_assert_eq!(lifecycle.session_running(), expected);
        }
    }
}
