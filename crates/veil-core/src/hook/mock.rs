//! Scriptable hook engine for tests.
//!
//! Models the dispatch a real trampoline engine produces: once a hook is
//! created and enabled, calls to the target land on the detour; disabling
//! (or removing) restores the original dispatch.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::hook::HookEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCall {
    Initialize,
    Create(usize),
    Enable(usize),
    Disable(usize),
    Remove(usize),
    Shutdown,
}

#[derive(Debug, Default)]
struct MockHook {
    detour: usize,
    enabled: bool,
}

#[derive(Debug, Default)]
pub struct MockEngine {
    hooks: HashMap<usize, MockHook>,
    calls: Vec<EngineCall>,
    fail_create: HashMap<usize, i32>,
    fail_enable: HashMap<usize, i32>,
    fail_disable: HashMap<usize, i32>,
}

/// Synthetic distance between a target and its trampoline.
const TRAMPOLINE_OFFSET: usize = 0x5000;

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(mut self, target: usize, status: i32) -> Self {
        self.fail_create.insert(target, status);
        self
    }

    pub fn fail_enable(mut self, target: usize, status: i32) -> Self {
        self.fail_enable.insert(target, status);
        self
    }

    pub fn fail_disable(mut self, target: usize, status: i32) -> Self {
        self.fail_disable.insert(target, status);
        self
    }

    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    /// Where a call to `target` lands right now: the detour while the hook
    /// is enabled, the target's own code otherwise.
    pub fn dispatch(&self, target: usize) -> usize {
        match self.hooks.get(&target) {
            Some(hook) if hook.enabled => hook.detour,
            _ => target,
        }
    }
}

impl HookEngine for MockEngine {
    fn initialize(&mut self) -> Result<()> {
        self.calls.push(EngineCall::Initialize);
        Ok(())
    }

    fn create(&mut self, target: usize, detour: usize) -> Result<usize> {
        self.calls.push(EngineCall::Create(target));
        if let Some(&status) = self.fail_create.get(&target) {
            return Err(Error::HookCreateFailed { target, status });
        }
        self.hooks.insert(
            target,
            MockHook {
                detour,
                enabled: false,
            },
        );
        Ok(target + TRAMPOLINE_OFFSET)
    }

    fn enable(&mut self, target: usize) -> Result<()> {
        self.calls.push(EngineCall::Enable(target));
        if let Some(&status) = self.fail_enable.get(&target) {
            return Err(Error::HookEnableFailed { target, status });
        }
        match self.hooks.get_mut(&target) {
            Some(hook) => {
                hook.enabled = true;
                Ok(())
            }
            None => Err(Error::HookEnableFailed { target, status: -1 }),
        }
    }

    fn disable(&mut self, target: usize) -> Result<()> {
        self.calls.push(EngineCall::Disable(target));
        if let Some(&status) = self.fail_disable.get(&target) {
            return Err(Error::HookEnableFailed { target, status });
        }
        if let Some(hook) = self.hooks.get_mut(&target) {
            hook.enabled = false;
        }
        Ok(())
    }

    fn remove(&mut self, target: usize) -> Result<()> {
        self.calls.push(EngineCall::Remove(target));
        self.hooks.remove(&target);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.calls.push(EngineCall::Shutdown);
        Ok(())
    }
}
