//! MinHook-backed engine.

use std::ffi::c_void;
use std::ptr;

use minhook_sys::{
    MH_CreateHook, MH_DisableHook, MH_EnableHook, MH_Initialize, MH_OK, MH_RemoveHook,
    MH_Uninitialize,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::hook::HookEngine;

/// Thin wrapper over the MinHook C library. Tracks whether the library is
/// initialized so shutdown stays idempotent.
#[derive(Debug, Default)]
pub struct MinHookEngine {
    initialized: bool,
}

impl MinHookEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HookEngine for MinHookEngine {
    fn initialize(&mut self) -> Result<()> {
        // SAFETY: MH_Initialize has no preconditions; a second call is
        // rejected with a status we surface as an error.
        let status = unsafe { MH_Initialize() };
        if status != MH_OK {
            return Err(Error::EngineInit(status));
        }
        self.initialized = true;
        debug!("hook engine initialized");
        Ok(())
    }

    fn create(&mut self, target: usize, detour: usize) -> Result<usize> {
        let mut original = ptr::null_mut::<c_void>();
        // SAFETY: target and detour are validated function addresses; the
        // engine writes the trampoline address into `original` on success.
        let status =
            unsafe { MH_CreateHook(target as *mut c_void, detour as *mut c_void, &mut original) };
        if status != MH_OK {
            return Err(Error::HookCreateFailed { target, status });
        }
        Ok(original as usize)
    }

    fn enable(&mut self, target: usize) -> Result<()> {
        // SAFETY: the hook at `target` was created by this engine.
        let status = unsafe { MH_EnableHook(target as *mut c_void) };
        if status != MH_OK {
            return Err(Error::HookEnableFailed { target, status });
        }
        Ok(())
    }

    fn disable(&mut self, target: usize) -> Result<()> {
        // SAFETY: the hook at `target` was created by this engine.
        let status = unsafe { MH_DisableHook(target as *mut c_void) };
        if status != MH_OK {
            return Err(Error::HookEnableFailed { target, status });
        }
        Ok(())
    }

    fn remove(&mut self, target: usize) -> Result<()> {
        // SAFETY: the hook at `target` was created by this engine.
        let status = unsafe { MH_RemoveHook(target as *mut c_void) };
        if status != MH_OK {
            return Err(Error::HookCreateFailed { target, status });
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;
        // SAFETY: called at most once after a successful initialize; all
        // hooks have been disabled by the caller.
        let status = unsafe { MH_Uninitialize() };
        if status != MH_OK {
            return Err(Error::EngineInit(status));
        }
        debug!("hook engine shut down");
        Ok(())
    }
}
