//! Live-runtime discovery through the OpenXR loader. Resolves the
//! instance, system identity, view profiles, and blend modes so the rest
//! of the client can be configured against real hardware.
//
// TODO: drive create_session and the swapchain protocol through this
// instance once a graphics-binding extension is negotiated with the
// render backend.

use super::{BlendMode, FormFactor, RuntimeError, RuntimeResult, ViewProfile};
use openxr::{
    ApplicationInfo, Entry, EnvironmentBlendMode, ExtensionSet, Instance, ViewConfigurationType,
};

pub struct OpenXrDiscovery {
    instance: Instance,
    system_id: openxr::SystemId,
}

impl OpenXrDiscovery {
    pub fn initialize(app_name: &str) -> RuntimeResult<Self> {
        Self::initialize_for(app_name, FormFactor::HeadMounted)
    }

    pub fn initialize_for(app_name: &str, form_factor: FormFactor) -> RuntimeResult<Self> {
        let entry = Entry::load().map_err(|err| {
            RuntimeError::ConnectionLost(format!("failed to load OpenXR loader: {err}"))
        })?;

        let app_info = ApplicationInfo {
            application_name: app_name,
            application_version: 1,
            engine_name: "vergence",
            engine_version: 1,
        };
        let instance = entry
            .create_instance(&app_info, &ExtensionSet::default(), &[])
            .map_err(|err| RuntimeError::call("create_instance", format!("{err:?}")))?;

        match instance.properties() {
            Ok(properties) => {
                let version = properties.runtime_version;
                log::info!(
                    "[runtime] OpenXR runtime: {} {}.{}.{}",
                    properties.runtime_name,
                    version.major(),
                    version.minor(),
                    version.patch()
                );
            }
            Err(err) => {
                log::warn!("[runtime] instance properties unavailable: {err:?}");
            }
        }

        let xr_form_factor = match form_factor {
            FormFactor::HeadMounted => openxr::FormFactor::HEAD_MOUNTED_DISPLAY,
            FormFactor::Handheld => openxr::FormFactor::HANDHELD_DISPLAY,
        };
        let system_id = instance
            .system(xr_form_factor)
            .map_err(|err| RuntimeError::call("get_system", format!("{err:?}")))?;

        Ok(Self {
            instance,
            system_id,
        })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn system_id(&self) -> openxr::SystemId {
        self.system_id
    }

    /// Recommended stereo render-target extents from the live runtime.
    pub fn view_profiles(&self) -> RuntimeResult<Vec<ViewProfile>> {
        let views = self
            .instance
            .enumerate_view_configuration_views(
                self.system_id,
                ViewConfigurationType::PRIMARY_STEREO,
            )
            .map_err(|err| RuntimeError::call("enumerate_view_configuration_views", format!("{err:?}")))?;
        Ok(views
            .iter()
            .map(|view| ViewProfile {
                width: view.recommended_image_rect_width,
                height: view.recommended_image_rect_height,
                sample_count: view.recommended_swapchain_sample_count,
            })
            .collect())
    }

    /// Blend modes the live runtime advertises for stereo rendering,
    /// in runtime preference order. Modes this client does not model are
    /// dropped here, at the adapter boundary.
    pub fn blend_modes(&self) -> RuntimeResult<Vec<BlendMode>> {
        let modes = self
            .instance
            .enumerate_environment_blend_modes(
                self.system_id,
                ViewConfigurationType::PRIMARY_STEREO,
            )
            .map_err(|err| RuntimeError::call("enumerate_environment_blend_modes", format!("{err:?}")))?;
        Ok(modes
            .into_iter()
            .filter_map(|mode| {
                if mode == EnvironmentBlendMode::OPAQUE {
                    Some(BlendMode::Opaque)
                } else if mode == EnvironmentBlendMode::ADDITIVE {
                    Some(BlendMode::Additive)
                } else if mode == EnvironmentBlendMode::ALPHA_BLEND {
                    Some(BlendMode::AlphaBlend)
                } else {
                    log::debug!("[runtime] dropping unmodeled blend mode {mode:?}");
                    None
                }
            })
            .collect())
    }
}
