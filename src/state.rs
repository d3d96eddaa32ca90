// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Persistent state.
//!
//! Dotstate remembers what it did during previous invocations through a
//! __persistent state__. The persistent state is a bucketed key-value store
//! whose contents are entirely defined by callers, e.g., the applied state of
//! each destination entry, or the last time a script was run.
//!
//! # Buckets, Keys, and Values
//!
//! A __bucket__ is a namespace that partitions keys. A __key__ identifies a
//! tracked item within a bucket, and is unique within that bucket. A __value__
//! is an opaque byte sequence. The persistent state never interprets any of
//! them. Reading a key that does not exist is never an error, it simply
//! yields an empty value.
//!
//! # Decorators
//!
//! Every execution mode shares the same storage logic. Behavior that differs
//! between modes is layered on top of the backing store by wrapping it:
//!
//! - [`DebugState`] logs every call and its outcome to an injected sink.
//! - [`DryRunState`] drops writes, but remembers that a write was attempted.
//! - [`ReadOnlyState`] rejects writes with [`StateError::PermissionDenied`].
//!
//! The [`NullState`] is not a decorator. It stands in wherever a persistent
//! state is required, but nothing should be remembered at all.
//!
//! Debug is conventionally the outermost layer so it observes final results.
//! Dry run is conventionally the innermost layer directly around the backing
//! store so no write ever reaches disk.
//!
//! # See Also
//!
//! 1. [`SqliteState`]
//! 2. [`compose`](crate::stack::compose)

pub mod debug;
pub mod dry_run;
pub mod null;
pub mod read_only;
pub mod sqlite;

pub use debug::{CallRecord, DebugSink, DebugState, TracingSink, WriterSink};
pub use dry_run::{DryRunState, ModifiedFlag};
pub use null::NullState;
pub use read_only::ReadOnlyState;
pub use sqlite::SqliteState;

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

/// Visitor callback for [`PersistentState::for_each`].
pub type Visitor<'a> = dyn FnMut(&[u8], &[u8]) -> Result<()> + 'a;

/// Bucketed key-value store.
///
/// Reads borrow the store immutably, and writes borrow it mutably. Thus, a
/// visitor passed to [`for_each`](PersistentState::for_each) can never mutate
/// the bucket that is currently being traversed.
pub trait PersistentState {
    /// Get value of key in bucket.
    ///
    /// # Errors
    ///
    /// - Return [`StateError`] only if the backend fails. An absent key yields
    ///   an empty value.
    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>>;

    /// Insert or replace value of key in bucket.
    ///
    /// # Errors
    ///
    /// - Return [`StateError`] if the backend fails, or writes are not
    ///   permitted.
    fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove key from bucket.
    ///
    /// Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// - Return [`StateError`] if the backend fails, or writes are not
    ///   permitted.
    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<()>;

    /// Visit each key-value pair currently in bucket.
    ///
    /// Traversal stops at the first error returned by the visitor, and that
    /// error is propagated to the caller.
    ///
    /// # Errors
    ///
    /// - Return [`StateError`] if the backend fails, or the visitor fails.
    fn for_each(&self, bucket: &[u8], visit: &mut Visitor<'_>) -> Result<()>;

    /// Open backing storage, creating it first if it does not exist.
    ///
    /// Repeated calls have no effect beyond the first.
    ///
    /// # Errors
    ///
    /// - Return [`StateError`] if the backend cannot be opened or created.
    fn open_or_create(&mut self) -> Result<()>;
}

impl<S> PersistentState for &mut S
where
    S: PersistentState + ?Sized,
{
    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        (**self).get(bucket, key)
    }

    fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        (**self).set(bucket, key, value)
    }

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<()> {
        (**self).delete(bucket, key)
    }

    fn for_each(&self, bucket: &[u8], visit: &mut Visitor<'_>) -> Result<()> {
        (**self).for_each(bucket, visit)
    }

    fn open_or_create(&mut self) -> Result<()> {
        (**self).open_or_create()
    }
}

impl<S> PersistentState for Box<S>
where
    S: PersistentState + ?Sized,
{
    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        (**self).get(bucket, key)
    }

    fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        (**self).set(bucket, key, value)
    }

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<()> {
        (**self).delete(bucket, key)
    }

    fn for_each(&self, bucket: &[u8], visit: &mut Visitor<'_>) -> Result<()> {
        (**self).for_each(bucket, visit)
    }

    fn open_or_create(&mut self) -> Result<()> {
        (**self).open_or_create()
    }
}

/// Operations of a persistent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Set,
    Delete,
    ForEach,
    OpenOrCreate,
}

impl Operation {
    /// Check if operation mutates persistent state.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Set | Self::Delete | Self::OpenOrCreate)
    }
}

impl Display for Operation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Get => "Get",
            Self::Set => "Set",
            Self::Delete => "Delete",
            Self::ForEach => "ForEach",
            Self::OpenOrCreate => "OpenOrCreate",
        };

        fmt.write_str(name)
    }
}

/// Persistent state error types.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Directory holding the persistent state file cannot be created.
    #[error("failed to create persistent state directory at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Backing storage cannot be read from or written to.
    #[error(transparent)]
    Backend(#[from] rusqlite::Error),

    /// Write rejected because persistent state is read-only.
    #[error("{operation} not permitted on read-only persistent state")]
    PermissionDenied { operation: Operation },

    /// Persistent state was used before being opened.
    #[error("persistent state at {:?} used before being opened", path.display())]
    NotOpen { path: PathBuf },

    /// Visitor of a bucket traversal failed.
    #[error("failed to visit persistent state entry")]
    Visit(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StateError {
    /// Wrap arbitrary visitor failure.
    pub fn visit(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Visit(error.into())
    }

    /// Check if error came from a write that the current mode forbids.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// Check if error came from any refused write.
    ///
    /// Covers writes forbidden by the current mode, and writes that the
    /// backend itself refused because its database file is read-only.
    pub fn is_read_only_failure(&self) -> bool {
        match self {
            Self::PermissionDenied { .. } => true,
            Self::Backend(error) => sqlite::is_read_only_backend(error),
            _ => false,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = StateError> = std::result::Result<T, E>;
