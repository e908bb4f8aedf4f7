//! Small helpers shared across `vulkan` modules that don't belong to
//! any one of them: vendor identification and driver-rejection data.

pub mod db {
    //! PCI vendor IDs.
    pub mod vendor {
        pub const AMD: u32 = 0x1002;
        pub const APPLE: u32 = 0x106b;
        pub const ARM: u32 = 0x13b5;
        pub const BROADCOM: u32 = 0x14e4;
        pub const IMGTEC: u32 = 0x1010;
        pub const INTEL: u32 = 0x8086;
        pub const MESA: u32 = 0x10005;
        pub const NVIDIA: u32 = 0x10de;
        pub const QUALCOMM: u32 = 0x5143;
    }
}

/// A (vendor, driver-version-lower-bound) pair known to be broken badly
/// enough that `init_renderer` should refuse rather than limp along
/// (§4.1 "Selected GPU is validated against a driver-rejection table").
#[derive(Clone, Copy, Debug)]
pub struct RejectedDriver {
    pub vendor_id: u32,
    pub device_id: Option<u32>,
    pub reason: &'static str,
}

/// The built-in rejection table. Empty by default; callers extend via
/// [`is_rejected`]'s companion list in `RendererDesc` if a future driver
/// needs blacklisting. Kept as a real (if currently empty) table rather
/// than a stub so the check in `adapter.rs` has a single call site.
pub const REJECTED_DRIVERS: &[RejectedDriver] = &[];

pub fn is_rejected(vendor_id: u32, device_id: u32) -> Option<&'static RejectedDriver> {
    REJECTED_DRIVERS.iter().find(|entry| {
        entry.vendor_id == vendor_id && entry.device_id.map_or(true, |id| id == device_id)
    })
}

/// Two validation-message IDs known to be false positives on supported
/// configurations (§4.1: "suppresses two known-benign validation IDs").
pub const BENIGN_VALIDATION_MESSAGE_IDS: &[&str] = [
    "VUID-VkSwapchainCreateInfoKHR-imageExtent-01274",
    "VUID-vkAcquireNextImageKHR-semaphore-01288",
]
.as_slice();

pub fn is_benign_validation_message(message_id_name: &str) -> bool {
    BENIGN_VALIDATION_MESSAGE_IDS.contains(&message_id_name)
}
