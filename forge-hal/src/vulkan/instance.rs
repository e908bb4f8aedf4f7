//! Context init: instance creation, entry-point loading, debug-callback
//! installation, physical-device enumeration (§4.1).

use super::debug;
use crate::{auxil, InitError};
use ash::vk;
use std::ffi::{CStr, CString};
use std::sync::Arc;

/// Instance extensions always requested when present.
const REQUIRED_INSTANCE_EXTENSIONS: &[&CStr] = &[];

const OPTIONAL_INSTANCE_EXTENSIONS: &[&CStr] = &[
    ash::ext::debug_utils::NAME,
    ash::khr::get_physical_device_properties2::NAME,
];

/// Process-scope shared instance state: owns the raw `ash::Instance`,
/// the entry-point loader, and the installed debug messenger if any
/// (§3 Context).
pub struct InstanceShared {
    pub(crate) raw: ash::Instance,
    pub(crate) entry: ash::Entry,
    pub(crate) extensions: Vec<&'static CStr>,
    pub(crate) debug_utils: Option<debug::DebugUtils>,
    pub(crate) instance_api_version: u32,
    pub(crate) has_nv_optimus: bool,
}

impl std::fmt::Debug for InstanceShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceShared")
            .field("instance_api_version", &self.instance_api_version)
            .field("extensions", &self.extensions)
            .finish()
    }
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        unsafe {
            if let Some(du) = &self.debug_utils {
                du.destroy();
            }
            self.raw.destroy_instance(None);
        }
    }
}

/// Process-scope Context handle. Cheaply `Clone`: it's a reference to
/// the shared instance state, which may be shared across multiple
/// renderers (§3 Context: "may be shared across multiple renderers").
#[derive(Clone, Debug)]
pub struct Instance {
    pub(crate) shared: Arc<InstanceShared>,
}

/// Configuration accepted by `init_context` (§6 Configuration).
#[derive(Clone, Debug, Default)]
pub struct ContextDesc {
    pub app_name: String,
    pub enable_validation: bool,
    pub enable_gpu_based_validation: bool,
    pub extra_instance_layers: Vec<String>,
    pub extra_instance_extensions: Vec<String>,
}

impl Instance {
    /// `init_context(app_name, desc) -> Context` (§4.1).
    pub fn init(desc: &ContextDesc) -> Result<Self, InitError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|_| {
            InitError::MissingInstanceExtension("libvulkan.so / vulkan-1.dll not found")
        })?;

        let instance_api_version = match unsafe { entry.try_enumerate_instance_version() } {
            Ok(Some(version)) => version,
            _ => vk::API_VERSION_1_0,
        };

        let app_name = CString::new(desc.app_name.clone()).unwrap_or_default();
        let engine_name = CString::new("The Forge").unwrap();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .engine_name(&engine_name)
            .api_version(instance_api_version.max(vk::API_VERSION_1_1));

        let supported_extensions: Vec<vk::ExtensionProperties> =
            unsafe { entry.enumerate_instance_extension_properties(None) }
                .unwrap_or_default();
        let has_extension = |name: &CStr| {
            supported_extensions.iter().any(|ext| {
                ext.extension_name_as_c_str().map(|n| n == name).unwrap_or(false)
            })
        };

        for required in REQUIRED_INSTANCE_EXTENSIONS {
            if !has_extension(required) {
                return Err(InitError::MissingInstanceExtension(
                    required.to_str().unwrap_or("<invalid>"),
                ));
            }
        }

        let mut extensions: Vec<&'static CStr> = REQUIRED_INSTANCE_EXTENSIONS.to_vec();
        for optional in OPTIONAL_INSTANCE_EXTENSIONS {
            if has_extension(optional) {
                extensions.push(optional);
            }
        }

        let mut layers: Vec<CString> = Vec::new();
        if desc.enable_validation {
            layers.push(CString::new("VK_LAYER_KHRONOS_validation").unwrap());
        }
        let layer_ptrs: Vec<*const std::ffi::c_char> =
            layers.iter().map(|l| l.as_ptr()).collect();
        let extension_ptrs: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|e| e.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);

        let raw = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|_| InitError::Device(crate::DeviceError::Internal("vkCreateInstance")))?;

        let debug_utils = if desc.enable_validation && has_extension(ash::ext::debug_utils::NAME) {
            Some(debug::DebugUtils::new(&entry, &raw))
        } else {
            None
        };

        let shared = Arc::new(InstanceShared {
            raw,
            entry,
            extensions,
            debug_utils,
            instance_api_version,
            has_nv_optimus: false,
        });

        Ok(Self { shared })
    }

    /// Enumerate physical devices, filter out anything without a
    /// graphics-capable queue family or of CPU type, and build a
    /// `GpuInfo` per survivor (§4.1).
    pub fn enumerate_adapters(&self) -> Vec<super::Adapter> {
        let physical_devices = unsafe { self.shared.raw.enumerate_physical_devices() }
            .unwrap_or_default();

        physical_devices
            .into_iter()
            .filter_map(|phd| super::Adapter::expose(self.shared.clone(), phd))
            .collect()
    }
}

pub(crate) fn is_rejected_driver(vendor_id: u32, device_id: u32) -> bool {
    auxil::is_rejected(vendor_id, device_id).is_some()
}
