use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Module not loaded: {0}")]
    ModuleNotFound(String),

    #[error("Pattern not found: {0}")]
    PatternNotFound(String),

    #[error("No relative-load instruction decoded near {address:#x}")]
    DecodeFailed { address: usize },

    #[error("Address {0:#x} is not committed executable memory")]
    AddressNotExecutable(usize),

    #[error("Hook engine failed to initialize (status {0})")]
    EngineInit(i32),

    #[error("Failed to create hook at {target:#x} (status {status})")]
    HookCreateFailed { target: usize, status: i32 },

    #[error("Failed to enable hook at {target:#x} (status {status})")]
    HookEnableFailed { target: usize, status: i32 },

    #[error("Device is not ready for drawing")]
    DeviceNotReady,

    #[error("Overlay drawing failed: {0}")]
    Drawing(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Scanning and resolution misses are expected outcomes the caller may
    /// tolerate; everything else signals a real fault.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ModuleNotFound(_) | Error::PatternNotFound(_) | Error::DecodeFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(Error::PatternNotFound("present".into()).is_not_found());
        assert!(Error::ModuleNotFound("overlay.dll".into()).is_not_found());
        assert!(Error::DecodeFailed { address: 0x1000 }.is_not_found());
        assert!(!Error::AddressNotExecutable(0).is_not_found());
        assert!(
            !Error::HookEnableFailed {
                target: 0x1000,
                status: 9
            }
            .is_not_found()
        );
    }
}
