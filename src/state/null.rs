// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::state::{PersistentState, Result, Visitor};

/// Persistent state that remembers nothing.
///
/// Every read yields an empty value, and every write is silently consumed.
/// Useful whenever a persistent state must be supplied, but persistence is
/// neither available nor wanted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NullState;

impl NullState {
    /// Construct new null persistent state.
    pub fn new() -> Self {
        Self
    }
}

impl PersistentState for NullState {
    fn get(&self, _bucket: &[u8], _key: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn set(&mut self, _bucket: &[u8], _key: &[u8], _value: &[u8]) -> Result<()> {
        Ok(())
    }

    fn delete(&mut self, _bucket: &[u8], _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn for_each(&self, _bucket: &[u8], _visit: &mut Visitor<'_>) -> Result<()> {
        Ok(())
    }

    fn open_or_create(&mut self) -> Result<()> {
        Ok(())
    }
}
