//! Immediate-mode toolkit bound to the host's Direct3D 9 device.
//!
//! The toolkit and its renderer are consumed as opaque dependencies; this
//! module only adapts them to the [`OverlayUi`] seam. The renderer holds
//! device-dependent objects, so it is dropped ahead of a device reset and
//! rebuilt afterwards.

use std::ptr::NonNull;
use std::time::Instant;

use imgui::{Condition, Context};
use imgui_dx9_renderer::Renderer;
use tracing::debug;
use winapi::shared::d3d9::IDirect3DDevice9;
use winapi::shared::d3d9types::D3DVIEWPORT9;

use veil_core::error::{Error, Result};

use crate::ui::{DeviceHandle, OverlayFrame, OverlayUi};

pub struct ImguiOverlay {
    context: Option<Context>,
    renderer: Option<Renderer>,
    device: Option<NonNull<IDirect3DDevice9>>,
    last_frame: Option<Instant>,
}

impl ImguiOverlay {
    pub fn new() -> Self {
        Self {
            context: None,
            renderer: None,
            device: None,
            last_frame: None,
        }
    }

    fn display_size(device: NonNull<IDirect3DDevice9>) -> Result<[f32; 2]> {
        let mut viewport = D3DVIEWPORT9 {
            X: 0,
            Y: 0,
            Width: 0,
            Height: 0,
            MinZ: 0.0,
            MaxZ: 0.0,
        };
        // SAFETY: the device is live for the duration of the hooked call
        // that handed it to us.
        let status = unsafe { device.as_ref().GetViewport(&mut viewport) };
        if status < 0 || viewport.Width == 0 || viewport.Height == 0 {
            return Err(Error::DeviceNotReady);
        }
        Ok([viewport.Width as f32, viewport.Height as f32])
    }

    fn build_renderer(context: &mut Context, device: NonNull<IDirect3DDevice9>) -> Result<Renderer> {
        // SAFETY: the device pointer originates from the hooked call and
        // outlives the renderer, which is dropped before every reset.
        unsafe { Renderer::new_raw(context, device) }
            .map_err(|e| Error::Drawing(format!("renderer creation failed: {e}")))
    }
}

impl Default for ImguiOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayUi for ImguiOverlay {
    fn init(&mut self, device: DeviceHandle) -> Result<()> {
        let device = NonNull::new(device as *mut IDirect3DDevice9).ok_or(Error::DeviceNotReady)?;

        let mut context = Context::create();
        context.set_ini_filename(None);
        context.io_mut().display_size = Self::display_size(device)?;

        let renderer = Self::build_renderer(&mut context, device)?;

        self.context = Some(context);
        self.renderer = Some(renderer);
        self.device = Some(device);
        self.last_frame = None;
        Ok(())
    }

    fn draw(&mut self, frame: &OverlayFrame<'_>) -> Result<()> {
        let (Some(context), Some(renderer)) = (self.context.as_mut(), self.renderer.as_mut())
        else {
            return Err(Error::Drawing("drawing before initialization".into()));
        };

        let now = Instant::now();
        if let Some(last) = self.last_frame {
            context.io_mut().delta_time = now.duration_since(last).as_secs_f32().max(1e-6);
        }
        self.last_frame = Some(now);

        let ui = context.frame();

        imgui::Window::new("veil")
            .position([50.0, 50.0], Condition::FirstUseEver)
            .size([350.0, 250.0], Condition::FirstUseEver)
            .always_auto_resize(true)
            .build(&ui, || {
                ui.text(format!("veil {}", env!("CARGO_PKG_VERSION")));
                ui.separator();
                ui.text(format!("host:   {}", frame.process));
                ui.text(format!("module: {}", frame.module));
                ui.separator();
                ui.text(format!("{:.1} fps ({:.3} ms)", frame.fps, frame.frame_time_ms));
                ui.text(format!("frame #{}", frame.frame_count));
                ui.separator();
                ui.text(frame.toggle_hint);
            });

        imgui::Window::new("veil-hud")
            .position([10.0, 10.0], Condition::Always)
            .bg_alpha(0.3)
            .title_bar(false)
            .resizable(false)
            .movable(false)
            .scroll_bar(false)
            .always_auto_resize(true)
            .build(&ui, || {
                ui.text("veil");
                ui.text(format!("{:.0} fps", frame.fps));
            });

        let draw_data = ui.render();
        renderer
            .render(draw_data)
            .map_err(|e| Error::Drawing(format!("render submission failed: {e}")))
    }

    fn invalidate_device_objects(&mut self) {
        // Device-dependent state lives in the renderer; dropping it is the
        // invalidation.
        self.renderer = None;
        debug!("renderer released ahead of device reset");
    }

    fn recreate_device_objects(&mut self) -> Result<()> {
        let (Some(context), Some(device)) = (self.context.as_mut(), self.device) else {
            return Err(Error::Drawing("recreate before initialization".into()));
        };
        // The backbuffer may have changed size across the reset.
        if let Ok(size) = Self::display_size(device) {
            context.io_mut().display_size = size;
        }
        self.renderer = Some(Self::build_renderer(context, device)?);
        debug!("renderer recreated after device reset");
        Ok(())
    }

    fn shutdown(&mut self) {
        self.renderer = None;
        self.context = None;
        self.device = None;
        self.last_frame = None;
    }
}

// SAFETY: the overlay is only ever touched from the render callback thread
// (and the teardown path, serialized behind the flow mutex); the raw device
// pointer is not used off that thread.
unsafe impl Send for ImguiOverlay {}
