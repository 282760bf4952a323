use crate::runtime::{BlendMode, CompositorRuntime, SystemId, ViewLayout, ViewProfile};

/// Chosen view layout plus, per view, the runtime's recommended image
/// extents. Immutable once resolved.
#[derive(Debug, Clone)]
pub struct ViewConfiguration {
    pub layout: ViewLayout,
    pub views: Vec<ViewProfile>,
}

impl ViewConfiguration {
    pub fn view_count(&self) -> usize {
        self.views.len()
    }
}

/// Extent used when the runtime cannot be asked for recommendations.
pub const FALLBACK_PROFILE: ViewProfile = ViewProfile {
    width: 1664,
    height: 1856,
    sample_count: 1,
};

/// Picks the first preferred layout the runtime reports views for. When
/// nothing matches, falls back to a stereo pair at `FALLBACK_PROFILE`.
pub fn resolve_views(
    runtime: &mut dyn CompositorRuntime,
    system: SystemId,
    preferred: &[ViewLayout],
) -> ViewConfiguration {
    for &layout in preferred {
        match runtime.enumerate_views(system, layout) {
            Ok(views) if !views.is_empty() => {
                log::info!("[view] layout {layout:?} with {} views", views.len());
                return ViewConfiguration { layout, views };
            }
            Ok(_) => {
                log::debug!("[view] layout {layout:?} not offered");
            }
            Err(err) => {
                log::warn!("[view] enumeration for {layout:?} failed: {err}");
            }
        }
    }
    log::warn!("[view] no preferred layout available; using stereo defaults");
    ViewConfiguration {
        layout: ViewLayout::Stereo,
        views: vec![FALLBACK_PROFILE; 2],
    }
}

/// Intersects the application's preference list with the runtime's
/// advertised modes, in preference order. Falls back to `Opaque`.
pub fn resolve_blend_mode(
    runtime: &mut dyn CompositorRuntime,
    system: SystemId,
    preferred: &[BlendMode],
) -> BlendMode {
    match runtime.enumerate_blend_modes(system) {
        Ok(supported) => {
            for &mode in preferred {
                if supported.contains(&mode) {
                    log::info!("[view] blend mode {mode:?}");
                    return mode;
                }
            }
            log::warn!(
                "[view] none of {preferred:?} advertised (runtime offers {supported:?}); using Opaque"
            );
        }
        Err(err) => {
            log::warn!("[view] blend mode enumeration failed: {err}; using Opaque");
        }
    }
    BlendMode::Opaque
}
