//! Key-state polling and edge detection.

/// Key-state query seam; the Windows implementation polls the async key
/// state, tests script their own sequences.
pub trait KeyPoll {
    fn is_down(&self, key: u16) -> bool;
}

/// Turns a level-polled key into down-edge events so a held key acts once.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    was_down: bool,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// True only on the transition from released to pressed.
    pub fn rising(&mut self, down: bool) -> bool {
        let fired = down && !self.was_down;
        self.was_down = down;
        fired
    }
}

/// Human-readable label for the handful of virtual keys the overlay binds.
pub fn key_label(key: u16) -> String {
    match key {
        0x70..=0x7B => format!("F{}", key - 0x6F),
        0x2E => "Del".to_string(),
        0x2D => "Ins".to_string(),
        other => format!("0x{:02X}", other),
    }
}

#[cfg(target_os = "windows")]
pub use win::AsyncKeys;

#[cfg(target_os = "windows")]
mod win {
    use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;

    use super::KeyPoll;

    /// Polls `GetAsyncKeyState`; the high bit reports the held state.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AsyncKeys;

    impl KeyPoll for AsyncKeys {
        fn is_down(&self, key: u16) -> bool {
            // SAFETY: GetAsyncKeyState is safe for any virtual-key value.
            let state = unsafe { GetAsyncKeyState(key as i32) };
            (state as u16) & 0x8000 != 0
        }
    }
}

/// Scripted key source for tests: answers one `is_down` poll per queued
/// entry, then reports released.
#[cfg(test)]
pub struct ScriptedKeys {
    states: std::cell::RefCell<std::collections::VecDeque<bool>>,
}

#[cfg(test)]
impl ScriptedKeys {
    pub fn new(states: &[bool]) -> Self {
        Self {
            states: std::cell::RefCell::new(states.iter().copied().collect()),
        }
    }
}

#[cfg(test)]
impl KeyPoll for ScriptedKeys {
    fn is_down(&self, _key: u16) -> bool {
        self.states.borrow_mut().pop_front().unwrap_or(false)
    }
}
