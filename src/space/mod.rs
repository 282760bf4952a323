use crate::runtime::{
    CompositorRuntime, Posef, RuntimeResult, SessionHandle, SpaceHandle, SpaceKind,
};

/// Local reference frame anchored at an identity pose, used to locate
/// views each tick. Created after the session, destroyed before it.
pub struct ReferenceSpaceAnchor {
    handle: SpaceHandle,
}

impl ReferenceSpaceAnchor {
    pub fn create(
        runtime: &mut dyn CompositorRuntime,
        session: SessionHandle,
    ) -> RuntimeResult<Self> {
        let handle = runtime.create_reference_space(session, SpaceKind::Local, Posef::IDENTITY)?;
        log::debug!("[space] local reference space {handle:?} created");
        Ok(Self { handle })
    }

    pub fn handle(&self) -> SpaceHandle {
        self.handle
    }

    pub fn destroy(self, runtime: &mut dyn CompositorRuntime) -> RuntimeResult<()> {
        runtime.destroy_reference_space(self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::GraphicsBinding;
    use crate::runtime::sim::SimulatedRuntime;
    use crate::runtime::FormFactor;

    #[test]
    fn anchor_creates_and_destroys_one_space() {
        let mut runtime = SimulatedRuntime::new();
        let system = runtime.system(FormFactor::HeadMounted).expect("system");
        let session = runtime
            .create_session(system, &GraphicsBinding::default())
            .expect("session");

        let anchor = ReferenceSpaceAnchor::create(&mut runtime, session).expect("anchor");
        assert_eq!(runtime.live_space_count(), 1);

        anchor.destroy(&mut runtime).expect("destroy");
        assert_eq!(runtime.live_space_count(), 0);
    }
}
