//! The `extern "system"` interposing functions and the context they read.
//!
//! The context is published once, before any hook is enabled, so the
//! detours never observe a half-built world. Original entry points are
//! stored by the interposition manager's publish step between hook
//! creation and activation.

#![cfg(target_os = "windows")]

use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use tracing::error;
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Direct3D9::{D3DERR_INVALIDCALL, D3DPRESENT_PARAMETERS, IDirect3DDevice9};
use windows::Win32::Graphics::Gdi::RGNDATA;
use windows::core::{HRESULT, Interface};

use crate::input::AsyncKeys;
use crate::interpose::{PresentFlow, guarded_frame};
use crate::ui::ImguiOverlay;

pub type PresentFn = unsafe extern "system" fn(
    *mut c_void,
    *const RECT,
    *const RECT,
    HWND,
    *const RGNDATA,
) -> HRESULT;

pub type ResetFn = unsafe extern "system" fn(*mut c_void, *mut D3DPRESENT_PARAMETERS) -> HRESULT;

/// Everything the detours touch, owned in one place and torn down once.
pub struct OverlayContext {
    pub flow: Mutex<PresentFlow<ImguiOverlay, AsyncKeys>>,
    pub present_original: AtomicUsize,
    pub reset_original: AtomicUsize,
}

impl OverlayContext {
    pub fn new(flow: PresentFlow<ImguiOverlay, AsyncKeys>) -> Self {
        Self {
            flow: Mutex::new(flow),
            present_original: AtomicUsize::new(0),
            reset_original: AtomicUsize::new(0),
        }
    }
}

static CONTEXT: OnceLock<OverlayContext> = OnceLock::new();

/// Publish the context. Must happen before any hook is enabled; returns
/// false if a context already exists.
pub fn install_context(context: OverlayContext) -> bool {
    CONTEXT.set(context).is_ok()
}

pub fn context() -> Option<&'static OverlayContext> {
    CONTEXT.get()
}

fn device_ready(device: *mut c_void) -> bool {
    // SAFETY: the host hands its live device to the hooked entry point;
    // it is borrowed only for the duration of the readiness query.
    unsafe {
        IDirect3DDevice9::from_raw_borrowed(&device)
            .map(|d| d.TestCooperativeLevel().is_ok())
            .unwrap_or(false)
    }
}

/// Frame-present interposer. Draws (or defers, or degrades) and then
/// forwards to the recorded original exactly once.
pub unsafe extern "system" fn present_detour(
    device: *mut c_void,
    source_rect: *const RECT,
    dest_rect: *const RECT,
    dest_window_override: HWND,
    dirty_region: *const RGNDATA,
) -> HRESULT {
    let Some(context) = context() else {
        return HRESULT(0);
    };

    guarded_frame(
        || {
            // A held lock means teardown is running; skip this frame's
            // interface work rather than stalling the render thread.
            if let Ok(mut flow) = context.flow.try_lock() {
                flow.on_frame(device as usize, || device_ready(device));
            }
        },
        || {
            let original = context.present_original.load(Ordering::Acquire);
            if original == 0 {
                return HRESULT(0);
            }
            // SAFETY: published by the interposition manager before the
            // hook was enabled; the engine keeps the trampoline alive
            // until the hook is removed.
            let original: PresentFn = unsafe { std::mem::transmute(original) };
            unsafe { original(device, source_rect, dest_rect, dest_window_override, dirty_region) }
        },
    )
}

/// Device-reset interposer. Brackets the original reset with interface
/// resource invalidation and recreation.
pub unsafe extern "system" fn reset_detour(
    device: *mut c_void,
    presentation_parameters: *mut D3DPRESENT_PARAMETERS,
) -> HRESULT {
    let Some(context) = context() else {
        return D3DERR_INVALIDCALL;
    };
    let original = context.reset_original.load(Ordering::Acquire);
    if original == 0 {
        return D3DERR_INVALIDCALL;
    }

    if catch_unwind(AssertUnwindSafe(|| {
        if let Ok(mut flow) = context.flow.try_lock() {
            flow.before_reset();
        }
    }))
    .is_err()
    {
        error!("panic contained ahead of device reset");
    }

    // SAFETY: same publication contract as the present original.
    let original: ResetFn = unsafe { std::mem::transmute(original) };
    let status = unsafe { original(device, presentation_parameters) };

    if catch_unwind(AssertUnwindSafe(|| {
        if let Ok(mut flow) = context.flow.try_lock() {
            flow.after_reset(status.0);
        }
    }))
    .is_err()
    {
        error!("panic contained after device reset");
    }

    status
}
