//! Lifecycle orchestration.
//!
//! Runs on its own thread, spawned from the DLL entry point: validate the
//! host, wait out the settling delay, locate and hook the two target
//! functions, then idle watching the exit key. Teardown releases interface
//! resources first, hooks second, and the debug console last; it is
//! idempotent because both the exit key and process detach funnel into it.

use tracing::{info, warn};

use veil_core::config::OverlayConfig;
use veil_core::error::{Error, Result};
use veil_core::memory::QueryExecutable;
use veil_core::resolve::{ResolvedFunction, resolve_in_image};
use veil_core::scan::scan_slice;

/// The two call sites the scanner pipeline produced. The frame-present
/// function is required; reset handling is best-effort.
#[derive(Debug, Clone)]
pub struct LocatedTargets {
    pub present: ResolvedFunction,
    pub reset: Option<ResolvedFunction>,
}

/// Scan an already-mapped module image for both call sites and resolve
/// each to an absolute function address.
pub fn locate_in_image<Q: QueryExecutable>(
    image: &[u8],
    base: usize,
    config: &OverlayConfig,
    gate: &Q,
) -> Result<LocatedTargets> {
    let present = locate_one(image, base, config, &config.present_pattern, gate)?;
    info!(
        address = format_args!("{:#x}", present.address),
        offset = present.offset,
        "frame-present function located"
    );

    let reset = match locate_one(image, base, config, &config.reset_pattern, gate) {
        Ok(found) => {
            info!(
                address = format_args!("{:#x}", found.address),
                offset = found.offset,
                "device-reset function located"
            );
            Some(found)
        }
        Err(e) => {
            warn!(error = %e, "device-reset function not located; continuing without it");
            None
        }
    };

    Ok(LocatedTargets { present, reset })
}

fn locate_one<Q: QueryExecutable>(
    image: &[u8],
    base: usize,
    config: &OverlayConfig,
    pattern: &veil_core::pattern::Pattern,
    gate: &Q,
) -> Result<ResolvedFunction> {
    let offset =
        scan_slice(image, pattern).ok_or_else(|| Error::PatternNotFound(pattern.to_string()))?;
    let signature_address = base + offset;

    resolve_in_image(
        image,
        base,
        signature_address,
        pattern,
        &config.offset_window,
        gate,
    )
    .ok_or(Error::DecodeFailed {
        address: signature_address,
    })
}

/// Case-insensitive allow-list heuristic over the host executable's file
/// name. Not a security boundary; callers warn and continue on mismatch.
pub fn host_matches(executable: &str, allowlist: &[String]) -> bool {
    let file_name = executable
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(executable)
        .to_ascii_lowercase();
    allowlist
        .iter()
        .any(|entry| file_name.contains(&entry.to_ascii_lowercase()))
}

#[cfg(target_os = "windows")]
pub use win::{run, teardown};

#[cfg(target_os = "windows")]
mod win {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tracing::{error, info, warn};

    use veil_core::config::OverlayConfig;
    use veil_core::error::Result;
    use veil_core::hook::{HookSet, MinHookEngine};
    use veil_core::memory::{PageProtectionQuery, module_region};

    use super::{LocatedTargets, host_matches, locate_in_image};
    use crate::console;
    use crate::detour::{self, OverlayContext, present_detour, reset_detour};
    use crate::input::{AsyncKeys, EdgeDetector, KeyPoll};
    use crate::interpose::PresentFlow;
    use crate::ui::ImguiOverlay;

    type InstalledHooks = HookSet<MinHookEngine, PageProtectionQuery>;

    static HOOKS: Mutex<Option<InstalledHooks>> = Mutex::new(None);
    static TORN_DOWN: AtomicBool = AtomicBool::new(false);

    const CONFIG_FILE: &str = "veil.json";

    /// Full overlay lifetime: initialize, idle until the exit key, tear
    /// down. Returns false when initialization failed and the library
    /// should unload itself.
    pub fn run() -> bool {
        console::init();
        info!(version = env!("CARGO_PKG_VERSION"), "veil overlay attached");

        let config = match OverlayConfig::load(CONFIG_FILE) {
            Ok(c) => {
                info!(path = CONFIG_FILE, "loaded configuration");
                c
            }
            Err(e) => {
                warn!(error = %e, "no usable configuration file; using defaults");
                OverlayConfig::default()
            }
        };

        if let Err(e) = initialize(&config) {
            error!(error = %e, "overlay initialization failed");
            fatal_box(&format!("veil overlay failed to initialize:\n{e}"));
            teardown();
            return false;
        }

        info!(
            exit_key = %crate::input::key_label(config.exit_key),
            "initialization complete; idling"
        );
        idle_until_exit(&config);

        teardown();
        true
    }

    fn initialize(config: &OverlayConfig) -> anyhow::Result<()> {
        use anyhow::Context;

        let executable = host_executable_name().unwrap_or_default();
        if !host_matches(&executable, &config.process_allowlist) {
            // Heuristic only; the module check below is the real gate.
            warn!(
                executable = %executable,
                "host process not on the allow-list; continuing anyway"
            );
        } else {
            info!(executable = %executable, "host process validated");
        }

        info!(
            delay_ms = config.settle_delay_ms,
            "waiting for the host to settle before scanning"
        );
        std::thread::sleep(Duration::from_millis(config.settle_delay_ms));

        let targets = locate_targets(config)
            .with_context(|| format!("locating targets in {}", config.target_module))?;

        install_hooks(config, &targets).context("installing hooks")?;
        Ok(())
    }

    fn locate_targets(config: &OverlayConfig) -> Result<LocatedTargets> {
        let region = module_region(&config.target_module)?;
        // SAFETY: the loader keeps the module image mapped while it is
        // loaded; the slice does not outlive this call.
        let image =
            unsafe { std::slice::from_raw_parts(region.start as *const u8, region.len()) };
        locate_in_image(image, region.start, config, &PageProtectionQuery)
    }

    fn install_hooks(config: &OverlayConfig, targets: &LocatedTargets) -> anyhow::Result<()> {
        let flow = PresentFlow::new(
            ImguiOverlay::new(),
            AsyncKeys,
            config.toggle_key,
            host_executable_name().unwrap_or_default(),
            config.target_module.clone(),
        );
        if !detour::install_context(OverlayContext::new(flow)) {
            anyhow::bail!("overlay context already installed");
        }
        let Some(context) = detour::context() else {
            anyhow::bail!("overlay context unavailable after install");
        };

        let mut hooks = HookSet::new(MinHookEngine::new(), PageProtectionQuery)?;

        // The present hook is the whole point; its failure is fatal.
        hooks.install(
            targets.present.address,
            present_detour as usize,
            |original| {
                context
                    .present_original
                    .store(original, Ordering::Release);
            },
        )?;

        // Reset is best-effort: without it a device reset loses the
        // overlay until re-injection, nothing worse.
        if let Some(reset) = &targets.reset {
            if let Err(e) = hooks.install(reset.address, reset_detour as usize, |original| {
                context.reset_original.store(original, Ordering::Release);
            }) {
                warn!(error = %e, "device-reset hook not installed");
            }
        }

        if let Ok(mut slot) = HOOKS.lock() {
            *slot = Some(hooks);
        }
        Ok(())
    }

    fn idle_until_exit(config: &OverlayConfig) {
        let keys = AsyncKeys;
        let mut exit_edge = EdgeDetector::new();
        loop {
            if exit_edge.rising(keys.is_down(config.exit_key)) {
                info!("exit key pressed; shutting down");
                break;
            }
            std::thread::sleep(Duration::from_millis(config.poll_interval_ms));
        }
    }

    /// Ordered, idempotent shutdown: interface resources, then hooks,
    /// then the console. Reached from both the exit key and DLL detach.
    pub fn teardown() {
        if TORN_DOWN.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("tearing down");

        if let Some(context) = detour::context() {
            if let Ok(mut flow) = context.flow.lock() {
                flow.retire();
            }
        }

        if let Ok(mut slot) = HOOKS.lock() {
            if let Some(mut hooks) = slot.take() {
                hooks.retract_all();
            }
        }

        console::release();
    }

    fn host_executable_name() -> Option<String> {
        use windows::Win32::System::LibraryLoader::GetModuleFileNameW;

        let mut buffer = [0u16; 260];
        // SAFETY: GetModuleFileNameW with a null module reports the host
        // executable's path into the buffer.
        let written = unsafe { GetModuleFileNameW(None, &mut buffer) } as usize;
        if written == 0 {
            return None;
        }
        Some(String::from_utf16_lossy(&buffer[..written]))
    }

    fn fatal_box(text: &str) {
        use windows::Win32::UI::WindowsAndMessaging::{MB_ICONERROR, MessageBoxA};
        use windows::core::PCSTR;

        let mut message = text.as_bytes().to_vec();
        message.push(0);
        // SAFETY: both strings are NUL-terminated for the duration of the
        // call.
        unsafe {
            MessageBoxA(
                None,
                PCSTR(message.as_ptr()),
                PCSTR(b"veil overlay\0".as_ptr()),
                MB_ICONERROR,
            );
        }
    }
}
