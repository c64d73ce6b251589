//! Test double for the executable-address gate.

use std::collections::HashSet;

use crate::memory::{MIN_SANE_ADDRESS, QueryExecutable};

/// Reports only explicitly whitelisted addresses as executable.
#[derive(Debug, Default)]
pub struct MockExecQuery {
    executable: HashSet<usize>,
}

impl MockExecQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, address: usize) -> Self {
        self.executable.insert(address);
        self
    }
}

impl QueryExecutable for MockExecQuery {
    fn is_executable(&self, address: usize) -> bool {
        address >= MIN_SANE_ADDRESS && self.executable.contains(&address)
    }
}
