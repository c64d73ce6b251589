//! Trampoline-hook bookkeeping on top of an external hook engine.
//!
//! The engine itself (create/enable/disable primitives that patch machine
//! code and preserve the original bytes behind a trampoline) is consumed as
//! an opaque, already-correct dependency through [`HookEngine`]. This module
//! adds the pre-validation, structured failure reporting, and the retained
//! set that lets every installed hook be retracted in one pass.

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(target_os = "windows")]
mod minhook;

#[cfg(target_os = "windows")]
pub use minhook::MinHookEngine;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::memory::QueryExecutable;

/// Contract of the external trampoline engine.
///
/// `create` returns the address through which the original function remains
/// reachable after the target's entry point is patched. Failures carry the
/// engine's raw status code.
pub trait HookEngine {
    fn initialize(&mut self) -> Result<()>;
    fn create(&mut self, target: usize, detour: usize) -> Result<usize>;
    fn enable(&mut self, target: usize) -> Result<()>;
    fn disable(&mut self, target: usize) -> Result<()>;
    fn remove(&mut self, target: usize) -> Result<()>;
    fn shutdown(&mut self) -> Result<()>;
}

/// One installed hook. The original address lives here rather than in a
/// free-standing global, so several hook sets can coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookRecord {
    pub target: usize,
    pub detour: usize,
    pub original: usize,
}

/// Owns the engine, the executable-address gate, and every hook installed
/// through it.
pub struct HookSet<E: HookEngine, Q: QueryExecutable> {
    engine: E,
    gate: Q,
    records: Vec<HookRecord>,
    engine_live: bool,
}

impl<E: HookEngine, Q: QueryExecutable> HookSet<E, Q> {
    /// Initializes the engine. No hooks are installed yet; a failed
    /// initialization leaves nothing to retract.
    pub fn new(mut engine: E, gate: Q) -> Result<Self> {
        engine.initialize()?;
        Ok(Self {
            engine,
            gate,
            records: Vec::new(),
            engine_live: true,
        })
    }

    /// Install a hook: validate, create, publish the original, enable.
    ///
    /// `publish` runs after creation succeeds and before the hook is
    /// enabled, so the caller can stash the original address wherever the
    /// detour reads it; the detour can fire the instant `enable` lands.
    /// If enabling fails the created hook is removed again; a half-enabled
    /// hook is never retained.
    pub fn install(
        &mut self,
        target: usize,
        detour: usize,
        publish: impl FnOnce(usize),
    ) -> Result<HookRecord> {
        if target == 0 || detour == 0 {
            return Err(Error::AddressNotExecutable(0));
        }
        if !self.gate.is_executable(target) {
            return Err(Error::AddressNotExecutable(target));
        }

        let original = self.engine.create(target, detour)?;
        publish(original);

        if let Err(e) = self.engine.enable(target) {
            // Restore the original bytes; nothing is retained.
            if let Err(remove_err) = self.engine.remove(target) {
                warn!(
                    target = format_args!("{:#x}", target),
                    error = %remove_err,
                    "failed to remove hook after enable failure"
                );
            }
            return Err(e);
        }

        let record = HookRecord {
            target,
            detour,
            original,
        };
        self.records.push(record);

        info!(
            target = format_args!("{:#x}", target),
            original = format_args!("{:#x}", original),
            "hook installed"
        );
        Ok(record)
    }

    pub fn records(&self) -> &[HookRecord] {
        &self.records
    }

    /// Disable every retained hook, clear the set, and shut the engine
    /// down. A failure to disable one hook does not block the rest, and
    /// calling this again after it has run (or before anything was
    /// installed) is a no-op.
    pub fn retract_all(&mut self) {
        if !self.engine_live {
            return;
        }

        for record in &self.records {
            match self.engine.disable(record.target) {
                Ok(()) => debug!(
                    target = format_args!("{:#x}", record.target),
                    "hook retracted"
                ),
                Err(e) => warn!(
                    target = format_args!("{:#x}", record.target),
                    error = %e,
                    "failed to retract hook"
                ),
            }
        }
        self.records.clear();

        if let Err(e) = self.engine.shutdown() {
            warn!(error = %e, "hook engine shutdown failed");
        }
        self.engine_live = false;
    }
}

impl<E: HookEngine, Q: QueryExecutable> Drop for HookSet<E, Q> {
    fn drop(&mut self) {
        self.retract_all();
    }
}
