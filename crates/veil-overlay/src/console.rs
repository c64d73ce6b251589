//! Debug console wiring.
//!
//! The host process has no console of its own; one is allocated on attach
//! so the tracing output has somewhere to go, and released last on detach.

use tracing_subscriber::EnvFilter;

#[cfg(target_os = "windows")]
pub fn init() {
    use windows::Win32::System::Console::AllocConsole;

    // SAFETY: AllocConsole fails harmlessly if the process already has a
    // console; logging then goes to the existing one.
    unsafe {
        let _ = AllocConsole();
    }
    init_subscriber();
}

#[cfg(not(target_os = "windows"))]
pub fn init() {
    init_subscriber();
}

fn init_subscriber() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("veil_core=debug,veil_overlay=debug"));

    // try_init: a second attach in the same process must not panic.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .try_init();
}

#[cfg(target_os = "windows")]
pub fn release() {
    use windows::Win32::System::Console::FreeConsole;

    // SAFETY: releasing a console we may or may not own is harmless.
    unsafe {
        let _ = FreeConsole();
    }
}

#[cfg(not(target_os = "windows"))]
pub fn release() {}
