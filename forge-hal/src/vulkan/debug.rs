//! Object naming, the validation callback, and device-fault reporting
//! (§4.1, §4.11).

use crate::auxil;
use ash::vk;
use std::borrow::Cow;
use std::ffi::CStr;

/// Asserts on error-severity validation messages after filtering known
/// false positives (§7: "a global `gAssertOnVkValidationError` (default
/// true) asserts on error severity"). Exposed so embedders running
/// under a debugger can flip it off.
pub static ASSERT_ON_VALIDATION_ERROR: std::sync::atomic::AtomicBool =
    std::sync::atomic::AtomicBool::new(true);

pub struct DebugUtils {
    extension: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugUtils {
    pub fn new(entry: &ash::Entry, instance: &ash::Instance) -> Self {
        let extension = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_utils_messenger_callback));

        let messenger = unsafe { extension.create_debug_utils_messenger(&create_info, None) }
            .unwrap_or(vk::DebugUtilsMessengerEXT::null());

        Self { extension, messenger }
    }

    /// # Safety
    /// Must only be called once, during instance teardown.
    pub unsafe fn destroy(&self) {
        if self.messenger != vk::DebugUtilsMessengerEXT::null() {
            self.extension
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

unsafe extern "system" fn debug_utils_messenger_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data_ptr: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = &*callback_data_ptr;
    let message_id_name = if callback_data.p_message_id_name.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy()
    };
    let message = if callback_data.p_message.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    if auxil::is_benign_validation_message(&message_id_name) {
        return vk::FALSE;
    }

    let component = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "vkvalidation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "vkperf",
        _ => "vkinstance-layer",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("{component}: {message_id_name}: {message}");
            if ASSERT_ON_VALIDATION_ERROR.load(std::sync::atomic::Ordering::Relaxed) {
                debug_assert!(false, "{component}: {message}");
            }
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("{component}: {message_id_name}: {message}")
        }
        _ => log::debug!("{component}: {message_id_name}: {message}"),
    }

    vk::FALSE
}

/// `CHECK_VKRESULT` equivalent (§7: "logs `(file, line, result)` and
/// asserts in debug; in release it returns, leaving the output handle
/// unchanged"). Callers use `?` on [`crate::DeviceError`] instead of a
/// macro, but route every mapping through here so the logging behavior
/// matches.
#[track_caller]
pub(crate) fn check_vk_result(result: vk::Result) -> Result<(), crate::DeviceError> {
    if result == vk::Result::SUCCESS || result == vk::Result::SUBOPTIMAL_KHR {
        return Ok(());
    }
    let location = std::panic::Location::caller();
    log::error!(
        "vkresult: {}:{}: {result:?}",
        location.file(),
        location.line()
    );
    Err(super::map_device_error(result))
}

/// Colour passed to `cmdBeginDebugMarker`/`cmdInsertDebugMarker`
/// (§4.11: "Debug-markers for begin/end/insert accept an RGB colour").
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkerColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

/// Device-fault report emitted by `on_vk_device_lost` when
/// `VK_EXT_device_fault` is available (§4.1).
#[derive(Clone, Debug)]
pub struct DeviceFaultReport {
    pub description: String,
    pub vendor_info: Vec<String>,
    pub address_info: Vec<AddressInfo>,
}

#[derive(Clone, Copy, Debug)]
pub struct AddressInfo {
    pub lower_bound: u64,
    pub upper_bound: u64,
}

/// Runs on device loss: dumps the fault report if the extension is
/// present, otherwise just logs, then the caller decides whether to
/// assert (§4.1, §7 "Device-lost").
pub fn on_vk_device_lost(report: Option<DeviceFaultReport>) {
    match report {
        Some(report) => {
            log::error!("device lost: {}", report.description);
            for info in &report.vendor_info {
                log::error!("device lost: vendor info: {info}");
            }
            for addr in &report.address_info {
                log::error!(
                    "device lost: address range [{:#x}, {:#x})",
                    addr.lower_bound,
                    addr.upper_bound
                );
            }
        }
        None => log::error!("device lost (no VK_EXT_device_fault report available)"),
    }
}
