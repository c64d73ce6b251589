//! Overlay configuration.
//!
//! Every empirically-chosen constant is a field with the known-good value
//! as its default, so a drifted host build can be accommodated without
//! recompiling. Loaded from JSON when a config file is present.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pattern::Pattern;
use crate::resolve::OffsetWindow;

/// Virtual-key code for F1.
pub const DEFAULT_TOGGLE_KEY: u16 = 0x70;
/// Virtual-key code for Delete.
pub const DEFAULT_EXIT_KEY: u16 = 0x2E;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Module whose image is scanned for the two call-site signatures.
    pub target_module: String,

    /// Lowercased substrings accepted in the host executable's file name.
    /// A mismatch warns but does not abort; the check is a heuristic.
    pub process_allowlist: Vec<String>,

    /// Call-site signature for the frame-present function. Required.
    pub present_pattern: Pattern,

    /// Call-site signature for the device-reset function. Optional at
    /// runtime; a miss costs only reset handling.
    pub reset_pattern: Pattern,

    /// Backward-offset search window for the relative-load instruction.
    pub offset_window: OffsetWindow,

    /// Key that flips overlay visibility, acting on the down-edge.
    pub toggle_key: u16,

    /// Key that triggers voluntary unload, polled on the idle loop.
    pub exit_key: u16,

    /// Startle delay before scanning, letting the host finish its own
    /// startup.
    pub settle_delay_ms: u64,

    /// Idle-loop poll interval for the exit key.
    pub poll_interval_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            target_module: "gameoverlayrenderer64.dll".to_string(),
            process_allowlist: vec![
                "tf2".to_string(),
                "hl2".to_string(),
                "tf_win64".to_string(),
            ],
            present_pattern: Pattern::parse("48 8B ? 88 00 00 00 E8")
                .expect("default pattern parses"),
            reset_pattern: Pattern::parse("48 8B ? 80 00 00 00 E8")
                .expect("default pattern parses"),
            offset_window: OffsetWindow::default(),
            toggle_key: DEFAULT_TOGGLE_KEY,
            exit_key: DEFAULT_EXIT_KEY,
            settle_delay_ms: 3000,
            poll_interval_ms: 100,
        }
    }
}

impl OverlayConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
