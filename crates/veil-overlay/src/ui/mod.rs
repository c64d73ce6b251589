//! Drawing-toolkit seam.
//!
//! The interposers never talk to the toolkit directly; they fill an
//! [`OverlayFrame`] and hand it to an [`OverlayUi`] implementation. The
//! real implementation wraps an immediate-mode toolkit bound to the
//! Direct3D 9 device; tests use a mock.

#[cfg(test)]
pub mod mock;

#[cfg(target_os = "windows")]
mod imgui_dx9;

#[cfg(target_os = "windows")]
pub use imgui_dx9::ImguiOverlay;

use veil_core::error::Result;

/// Raw `IDirect3DDevice9` pointer, kept address-typed so the seam stays
/// platform-neutral.
pub type DeviceHandle = usize;

/// Content of one visible frame: a status panel plus a minimal corner HUD.
#[derive(Debug, Clone, Copy)]
pub struct OverlayFrame<'a> {
    pub process: &'a str,
    pub module: &'a str,
    pub toggle_hint: &'a str,
    pub fps: f32,
    pub frame_time_ms: f32,
    pub frame_count: u64,
}

/// Device-bound drawing surface consumed by the interposers.
///
/// `invalidate_device_objects` / `recreate_device_objects` bracket the
/// device-reset lifecycle; between the two calls no drawing may happen.
pub trait OverlayUi {
    fn init(&mut self, device: DeviceHandle) -> Result<()>;
    fn draw(&mut self, frame: &OverlayFrame<'_>) -> Result<()>;
    fn invalidate_device_objects(&mut self);
    fn recreate_device_objects(&mut self) -> Result<()>;
    fn shutdown(&mut self);
}
