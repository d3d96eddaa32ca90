// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::state::{Operation, PersistentState, Result, StateError, Visitor};

/// Persistent state that rejects writes.
///
/// Reads and opening are forwarded to the wrapped persistent state. Writes
/// never reach it, and always fail with [`StateError::PermissionDenied`].
#[derive(Debug)]
pub struct ReadOnlyState<S>
where
    S: PersistentState,
{
    inner: S,
}

impl<S> ReadOnlyState<S>
where
    S: PersistentState,
{
    /// Construct new read-only persistent state around `inner`.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Unwrap into inner persistent state.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> PersistentState for ReadOnlyState<S>
where
    S: PersistentState,
{
    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        self.inner.get(bucket, key)
    }

    fn set(&mut self, _bucket: &[u8], _key: &[u8], _value: &[u8]) -> Result<()> {
        Err(StateError::PermissionDenied {
            operation: Operation::Set,
        })
    }

    fn delete(&mut self, _bucket: &[u8], _key: &[u8]) -> Result<()> {
        Err(StateError::PermissionDenied {
            operation: Operation::Delete,
        })
    }

    fn for_each(&self, bucket: &[u8], visit: &mut Visitor<'_>) -> Result<()> {
        self.inner.for_each(bucket, visit)
    }

    fn open_or_create(&mut self) -> Result<()> {
        self.inner.open_or_create()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SqliteState;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn dump(state: &impl PersistentState, bucket: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        state.for_each(bucket, &mut |key, value| {
            entries.push((key.to_vec(), value.to_vec()));
            Ok(())
        })?;
        Ok(entries)
    }

    #[test]
    fn writes_are_denied_and_reads_forwarded() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut backing = SqliteState::new(dir.path().join("state.sqlite3"));
        backing.open_or_create()?;
        backing.set(b"entryState", b"/home/user/.bashrc", b"{hash:abc123}")?;
        let expect = dump(&backing, b"entryState")?;

        let mut state = ReadOnlyState::new(&mut backing);
        state.open_or_create()?;

        let error = state
            .set(b"entryState", b"/home/user/.bashrc", b"{hash:zzz}")
            .unwrap_err();
        assert!(error.is_permission_denied());
        let error = state.delete(b"entryState", b"/home/user/.bashrc").unwrap_err();
        assert!(error.is_permission_denied());

        assert_eq!(
            state.get(b"entryState", b"/home/user/.bashrc")?,
            b"{hash:abc123}".to_vec()
        );
        assert_eq!(dump(&state, b"entryState")?, expect);

        let backing = state.into_inner();
        assert_eq!(dump(&*backing, b"entryState")?, expect);

        Ok(())
    }
}
