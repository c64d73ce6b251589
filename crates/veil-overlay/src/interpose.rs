//! Present/Reset interposer state machines.
//!
//! Both run synchronously on whatever thread the host uses to call the
//! hooked entry points. The flows here are platform-neutral; the
//! `extern "system"` detours that feed them live in `detour`.
//!
//! The frame interposer defers interface initialization until the device
//! reports a ready cooperative state, flips visibility on the toggle key's
//! down-edge, and degrades to hidden on any drawing failure. Nothing in
//! here may ever stop the host's own frame presentation: forwarding to the
//! original function is the caller's responsibility and happens exactly
//! once per call, no matter what the flow does.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::input::{EdgeDetector, KeyPoll, key_label};
use crate::ui::{DeviceHandle, OverlayFrame, OverlayUi};

/// Interface lifecycle as seen from the frame-present interposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPhase {
    /// Drawing subsystem not yet bound to a device.
    Uninit,
    /// Just initialized; promotes to `Visible` on the next frame
    /// evaluation (the overlay comes up visible).
    Ready,
    Visible,
    Hidden,
}

/// State owned by the interposers: the drawing seam, the toggle key, and
/// the visibility machine. Single-writer by construction; every mutation
/// happens on the render callback thread.
pub struct PresentFlow<U, K> {
    ui: U,
    keys: K,
    toggle_key: u16,
    toggle_edge: EdgeDetector,
    phase: OverlayPhase,
    retired: bool,

    process: String,
    module: String,
    toggle_hint: String,

    frame_count: u64,
    fps: f32,
    frame_time_ms: f32,
    last_frame: Option<Instant>,
}

impl<U: OverlayUi, K: KeyPoll> PresentFlow<U, K> {
    pub fn new(ui: U, keys: K, toggle_key: u16, process: String, module: String) -> Self {
        Self {
            ui,
            keys,
            toggle_key,
            toggle_edge: EdgeDetector::new(),
            phase: OverlayPhase::Uninit,
            retired: false,
            process,
            module,
            toggle_hint: format!("{} toggles the overlay", key_label(toggle_key)),
            frame_count: 0,
            fps: 0.0,
            frame_time_ms: 0.0,
            last_frame: None,
        }
    }

    pub fn phase(&self) -> OverlayPhase {
        self.phase
    }

    pub fn initialized(&self) -> bool {
        self.phase != OverlayPhase::Uninit
    }

    #[cfg(test)]
    pub fn ui(&self) -> &U {
        &self.ui
    }

    #[cfg(test)]
    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    /// One frame-present interception. `device_ready` is only consulted
    /// while uninitialized; a not-ready device defers initialization to a
    /// later call rather than forcing it.
    pub fn on_frame(&mut self, device: DeviceHandle, device_ready: impl FnOnce() -> bool) {
        if self.retired {
            return;
        }

        if self.phase == OverlayPhase::Uninit {
            if device == 0 {
                return;
            }
            if !device_ready() {
                debug!("device not ready; deferring interface init");
                return;
            }
            match self.ui.init(device) {
                Ok(()) => {
                    self.phase = OverlayPhase::Ready;
                    info!(
                        device = format_args!("{:#x}", device),
                        "interface initialized"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "interface init failed; retrying on a later frame");
                    return;
                }
            }
        }

        if self.phase == OverlayPhase::Ready {
            self.phase = OverlayPhase::Visible;
        }

        if self.toggle_edge.rising(self.keys.is_down(self.toggle_key)) {
            self.phase = match self.phase {
                OverlayPhase::Visible => OverlayPhase::Hidden,
                _ => OverlayPhase::Visible,
            };
            info!(
                visible = self.phase == OverlayPhase::Visible,
                "overlay visibility toggled"
            );
        }

        if self.phase == OverlayPhase::Visible {
            self.tick();
            let frame = OverlayFrame {
                process: &self.process,
                module: &self.module,
                toggle_hint: &self.toggle_hint,
                fps: self.fps,
                frame_time_ms: self.frame_time_ms,
                frame_count: self.frame_count,
            };
            if let Err(e) = self.ui.draw(&frame) {
                warn!(error = %e, "frame drawing failed; hiding overlay");
                self.phase = OverlayPhase::Hidden;
            }
        }
    }

    /// Release device-dependent resources ahead of the original reset.
    pub fn before_reset(&mut self) {
        if self.retired || !self.initialized() {
            return;
        }
        debug!("device reset requested; releasing interface resources");
        self.ui.invalidate_device_objects();
    }

    /// React to the original reset's status. Resources are recreated only
    /// after a successful reset; a failed one leaves them released so the
    /// next successful reset picks them back up.
    pub fn after_reset(&mut self, status: i32) {
        if self.retired || !self.initialized() {
            return;
        }
        if status >= 0 {
            if let Err(e) = self.ui.recreate_device_objects() {
                warn!(error = %e, "failed to recreate interface resources; hiding overlay");
                self.phase = OverlayPhase::Hidden;
            } else {
                debug!("interface resources recreated after device reset");
            }
        } else {
            warn!(status, "device reset failed; interface resources stay released");
        }
    }

    /// Convenience wrapper keeping the forward-exactly-once contract in
    /// one place for callers that own the original call.
    pub fn on_reset<F: FnOnce() -> i32>(&mut self, forward: F) -> i32 {
        self.before_reset();
        let status = forward();
        self.after_reset(status);
        status
    }

    /// Tear the interface down and refuse all further work. Called from
    /// the shutdown path while the hooks may still be live.
    pub fn retire(&mut self) {
        if self.retired {
            return;
        }
        if self.initialized() {
            self.ui.shutdown();
        }
        self.phase = OverlayPhase::Uninit;
        self.retired = true;
    }

    fn tick(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_frame {
            let delta = now.duration_since(last).as_secs_f32().max(1e-6);
            let instantaneous = 1.0 / delta;
            self.fps = if self.fps == 0.0 {
                instantaneous
            } else {
                self.fps * 0.9 + instantaneous * 0.1
            };
            self.frame_time_ms = delta * 1000.0;
        }
        self.last_frame = Some(now);
        self.frame_count += 1;
    }
}

/// Run the interface work for one interception, then forward. A panic in
/// the interface work is contained here; the forward happens exactly once
/// regardless of what the work did.
pub fn guarded_frame<R>(frame_work: impl FnOnce(), forward: impl FnOnce() -> R) -> R {
    if catch_unwind(AssertUnwindSafe(frame_work)).is_err() {
        error!("panic contained in overlay frame work");
    }
    forward()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ScriptedKeys;
    use crate::ui::mock::MockUi;

    const DEVICE: DeviceHandle = 0xD3D0_0000;

    fn flow_with_keys(keys: ScriptedKeys) -> PresentFlow<MockUi, ScriptedKeys> {
        PresentFlow::new(
            MockUi::new(),
            keys,
            0x70,
            "tf_win64.exe".to_string(),
            "gameoverlayrenderer64.dll".to_string(),
        )
    }

    fn flow() -> PresentFlow<MockUi, ScriptedKeys> {
        flow_with_keys(ScriptedKeys::new(&[]))
    }

    #[test]
    fn test_not_ready_device_defers_init() {
        let mut flow = flow();
        flow.on_frame(DEVICE, || false);
        assert_eq!(flow.ui().init_calls, 0);
        assert_eq!(flow.phase(), OverlayPhase::Uninit);
    }

    #[test]
    fn test_null_device_is_skipped() {
        let mut flow = flow();
        flow.on_frame(0, || true);
        assert_eq!(flow.ui().init_calls, 0);
        assert_eq!(flow.phase(), OverlayPhase::Uninit);
    }

    #[test]
    fn test_ready_device_initializes_and_draws_same_call() {
        let mut flow = flow();
        flow.on_frame(DEVICE, || true);
        assert_eq!(flow.ui().init_calls, 1);
        assert_eq!(flow.ui().device, Some(DEVICE));
        assert_eq!(flow.ui().draw_calls, 1);
        assert_eq!(flow.phase(), OverlayPhase::Visible);
    }

    #[test]
    fn test_failed_init_is_retried() {
        let mut flow = flow();
        flow.ui_mut().fail_init = true;
        flow.on_frame(DEVICE, || true);
        assert_eq!(flow.phase(), OverlayPhase::Uninit);
        assert_eq!(flow.ui().draw_calls, 0);

        flow.ui_mut().fail_init = false;
        flow.on_frame(DEVICE, || true);
        assert_eq!(flow.ui().init_calls, 2);
        assert_eq!(flow.phase(), OverlayPhase::Visible);
    }

    #[test]
    fn test_toggle_acts_on_down_edge_only() {
        // Frames: visible, toggle down (hide), still held, released,
        // pressed again (show).
        let keys = ScriptedKeys::new(&[false, true, true, false, true]);
        let mut flow = flow_with_keys(keys);

        flow.on_frame(DEVICE, || true);
        assert_eq!(flow.phase(), OverlayPhase::Visible);

        flow.on_frame(DEVICE, || true);
        assert_eq!(flow.phase(), OverlayPhase::Hidden);

        flow.on_frame(DEVICE, || true);
        assert_eq!(flow.phase(), OverlayPhase::Hidden);

        flow.on_frame(DEVICE, || true);
        assert_eq!(flow.phase(), OverlayPhase::Hidden);

        flow.on_frame(DEVICE, || true);
        assert_eq!(flow.phase(), OverlayPhase::Visible);

        // Drawing happened only on the visible frames.
        assert_eq!(flow.ui().draw_calls, 2);
    }

    #[test]
    fn test_draw_failure_degrades_to_hidden() {
        let mut flow = flow();
        flow.ui_mut().fail_draw = true;
        flow.on_frame(DEVICE, || true);
        assert_eq!(flow.phase(), OverlayPhase::Hidden);
        assert_eq!(flow.ui().draw_calls, 1);

        // Stays hidden; no further draw attempts.
        flow.on_frame(DEVICE, || true);
        assert_eq!(flow.ui().draw_calls, 1);
    }

    #[test]
    fn test_guarded_frame_forwards_exactly_once_on_failure() {
        let mut flow = flow();
        flow.ui_mut().fail_draw = true;
        let mut forwards = 0;

        let status = guarded_frame(
            || flow.on_frame(DEVICE, || true),
            || {
                forwards += 1;
                0i32
            },
        );

        assert_eq!(status, 0);
        assert_eq!(forwards, 1);
    }

    #[test]
    fn test_guarded_frame_forwards_exactly_once_on_panic() {
        let mut flow = flow();
        flow.ui_mut().panic_on_draw = true;
        let mut forwards = 0;

        guarded_frame(
            || flow.on_frame(DEVICE, || true),
            || {
                forwards += 1;
                0i32
            },
        );

        assert_eq!(forwards, 1);
    }

    #[test]
    fn test_reset_before_init_only_forwards() {
        let mut flow = flow();
        let mut forwards = 0;
        let status = flow.on_reset(|| {
            forwards += 1;
            0
        });
        assert_eq!(status, 0);
        assert_eq!(forwards, 1);
        assert_eq!(flow.ui().invalidate_calls, 0);
        assert_eq!(flow.ui().recreate_calls, 0);
    }

    #[test]
    fn test_successful_reset_brackets_resources() {
        let mut flow = flow();
        flow.on_frame(DEVICE, || true);

        let status = flow.on_reset(|| 0);
        assert_eq!(status, 0);
        assert_eq!(flow.ui().invalidate_calls, 1);
        assert_eq!(flow.ui().recreate_calls, 1);
        assert!(flow.ui().device_objects_live);
    }

    #[test]
    fn test_failed_reset_leaves_resources_released_until_success() {
        let mut flow = flow();
        flow.on_frame(DEVICE, || true);

        // D3DERR_DEVICELOST-style failure.
        let status = flow.on_reset(|| -2005530520);
        assert!(status < 0);
        assert_eq!(flow.ui().invalidate_calls, 1);
        assert_eq!(flow.ui().recreate_calls, 0);
        assert!(!flow.ui().device_objects_live);

        // A later successful reset recreates them.
        flow.on_reset(|| 0);
        assert_eq!(flow.ui().recreate_calls, 1);
        assert!(flow.ui().device_objects_live);
    }

    #[test]
    fn test_recreate_failure_hides_overlay() {
        let mut flow = flow();
        flow.on_frame(DEVICE, || true);
        flow.ui_mut().fail_recreate = true;

        flow.on_reset(|| 0);
        assert_eq!(flow.phase(), OverlayPhase::Hidden);
    }

    #[test]
    fn test_retire_shuts_down_and_blocks_further_frames() {
        let mut flow = flow();
        flow.on_frame(DEVICE, || true);
        assert!(flow.initialized());

        flow.retire();
        assert_eq!(flow.ui().shutdown_calls, 1);

        flow.on_frame(DEVICE, || true);
        assert_eq!(flow.ui().init_calls, 1);
        assert_eq!(flow.ui().draw_calls, 1);

        // Idempotent.
        flow.retire();
        assert_eq!(flow.ui().shutdown_calls, 1);
    }
}
