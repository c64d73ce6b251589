//! # veil-overlay
//!
//! Injected Direct3D 9 overlay. Locates the frame-present and device-reset
//! functions inside the host's rendering-overlay module by byte signature,
//! interposes them with trampoline hooks, and draws a small status
//! interface on top of the swapchain without touching the host's own
//! rendering code.
//!
//! Loaded as a DLL: attach spawns the lifecycle thread, detach funnels
//! into the same ordered teardown the exit key uses.

pub mod console;
pub mod detour;
pub mod input;
pub mod interpose;
pub mod runtime;
pub mod ui;

#[cfg(target_os = "windows")]
mod entry {
    use std::ffi::c_void;

    use windows::Win32::Foundation::{BOOL, CloseHandle, HMODULE};
    use windows::Win32::System::LibraryLoader::{
        DisableThreadLibraryCalls, FreeLibraryAndExitThread,
    };
    use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};
    use windows::Win32::System::Threading::{CreateThread, THREAD_CREATION_FLAGS};

    use crate::runtime;

    unsafe extern "system" fn overlay_main(parameter: *mut c_void) -> u32 {
        let module = HMODULE(parameter);
        let ok = runtime::run();
        // SAFETY: unloads this module and ends the thread; never returns.
        unsafe { FreeLibraryAndExitThread(module, if ok { 0 } else { 1 }) }
    }

    fn attach(module: HMODULE) -> bool {
        // SAFETY: valid module handle from the loader; thread notifications
        // are not needed.
        unsafe {
            let _ = DisableThreadLibraryCalls(module);
        }

        // The lifecycle runs on its own thread; DllMain must not block
        // under the loader lock.
        // SAFETY: overlay_main matches LPTHREAD_START_ROUTINE and the
        // module handle stays valid until FreeLibraryAndExitThread.
        let thread = unsafe {
            CreateThread(
                None,
                0,
                Some(overlay_main),
                Some(module.0),
                THREAD_CREATION_FLAGS(0),
                None,
            )
        };

        match thread {
            Ok(handle) => {
                // SAFETY: the thread keeps running after its handle closes.
                unsafe {
                    let _ = CloseHandle(handle);
                }
                true
            }
            Err(_) => false,
        }
    }

    #[unsafe(no_mangle)]
    pub extern "system" fn DllMain(module: HMODULE, reason: u32, reserved: *mut c_void) -> BOOL {
        match reason {
            DLL_PROCESS_ATTACH => {
                if !attach(module) {
                    return BOOL(0);
                }
            }
            DLL_PROCESS_DETACH => {
                // On process termination the OS reclaims everything;
                // unwinding our hooks then is both pointless and unsafe.
                if reserved.is_null() {
                    runtime::teardown();
                }
            }
            _ => {}
        }
        BOOL(1)
    }
}
