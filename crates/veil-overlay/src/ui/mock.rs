//! Test double for the drawing seam.

use veil_core::error::{Error, Result};

use crate::ui::{DeviceHandle, OverlayFrame, OverlayUi};

/// Records every call and can be scripted to fail or panic.
#[derive(Debug, Default)]
pub struct MockUi {
    pub init_calls: usize,
    pub draw_calls: usize,
    pub invalidate_calls: usize,
    pub recreate_calls: usize,
    pub shutdown_calls: usize,

    pub device: Option<DeviceHandle>,
    /// Mirrors whether device-dependent resources currently exist.
    pub device_objects_live: bool,

    pub fail_init: bool,
    pub fail_draw: bool,
    pub fail_recreate: bool,
    pub panic_on_draw: bool,
}

impl MockUi {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverlayUi for MockUi {
    fn init(&mut self, device: DeviceHandle) -> Result<()> {
        self.init_calls += 1;
        if self.fail_init {
            return Err(Error::Drawing("scripted init failure".into()));
        }
        self.device = Some(device);
        self.device_objects_live = true;
        Ok(())
    }

    fn draw(&mut self, _frame: &OverlayFrame<'_>) -> Result<()> {
        self.draw_calls += 1;
        if self.panic_on_draw {
            panic!("scripted draw panic");
        }
        if self.fail_draw {
            return Err(Error::Drawing("scripted draw failure".into()));
        }
        Ok(())
    }

    fn invalidate_device_objects(&mut self) {
        self.invalidate_calls += 1;
        self.device_objects_live = false;
    }

    fn recreate_device_objects(&mut self) -> Result<()> {
        self.recreate_calls += 1;
        if self.fail_recreate {
            return Err(Error::Drawing("scripted recreate failure".into()));
        }
        self.device_objects_live = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.shutdown_calls += 1;
        self.device_objects_live = false;
        self.device = None;
    }
}
