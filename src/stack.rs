// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Persistent state stack selection.
//!
//! Each invocation constructs exactly one composed persistent state based on
//! its execution mode, and hands it by reference to every collaborator that
//! needs to remember something. There is no global handle.
//!
//! # Layering
//!
//! ```text
//! DebugState            (only with debug enabled)
//!   └─ DryRunState      (dry run)
//!      ReadOnlyState    (read-only)
//!      NullState        (null, backing store discarded)
//!        └─ SqliteState
//! ```

use crate::state::{
    DebugSink, DebugState, DryRunState, ModifiedFlag, NullState, PersistentState, ReadOnlyState,
    Result, Visitor,
};

use serde::{Deserialize, Serialize};
use std::fmt::{Formatter, Result as FmtResult};
use tracing::{debug, instrument};

/// Execution mode of persistent state.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateMode {
    /// Persist every write.
    #[default]
    Persist,

    /// Drop writes, but remember that they were attempted.
    DryRun,

    /// Reject writes.
    ReadOnly,

    /// Remember nothing at all.
    Null,
}

/// Options to compose persistent state with.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackOptions {
    /// Execution mode.
    pub mode: StateMode,

    /// Record every call into a debug sink.
    pub debug: bool,

    /// Shadow dropped writes during dry runs.
    pub overlay: bool,
}

/// Persistent state composed for one invocation.
pub struct ComposedState<'a> {
    state: Box<dyn PersistentState + 'a>,
    modified: Option<ModifiedFlag>,
    mode: StateMode,
}

impl ComposedState<'_> {
    /// Execution mode that was composed.
    pub fn mode(&self) -> StateMode {
        self.mode
    }

    /// Check if a dry run attempted to modify persistent state.
    ///
    /// Always false outside of dry runs.
    pub fn modified(&self) -> bool {
        self.modified.as_ref().is_some_and(ModifiedFlag::is_set)
    }
}

impl std::fmt::Debug for ComposedState<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("ComposedState")
            .field("mode", &self.mode)
            .field("modified", &self.modified())
            .finish_non_exhaustive()
    }
}

impl PersistentState for ComposedState<'_> {
    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        self.state.get(bucket, key)
    }

    fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        self.state.set(bucket, key, value)
    }

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<()> {
        self.state.delete(bucket, key)
    }

    fn for_each(&self, bucket: &[u8], visit: &mut Visitor<'_>) -> Result<()> {
        self.state.for_each(bucket, visit)
    }

    fn open_or_create(&mut self) -> Result<()> {
        self.state.open_or_create()
    }
}

/// Compose persistent state around backing store according to options.
///
/// The debug sink is only used when debugging is enabled. The backing store
/// is dropped in null mode.
#[instrument(skip(backing, sink), level = "debug")]
pub fn compose<'a, S, K>(backing: S, options: StackOptions, sink: K) -> ComposedState<'a>
where
    S: PersistentState + 'a,
    K: DebugSink + 'a,
{
    let mut modified = None;
    let state: Box<dyn PersistentState + 'a> = match options.mode {
        StateMode::Persist => Box::new(backing),
        StateMode::DryRun => {
            let dry_run = if options.overlay {
                DryRunState::with_overlay(backing)
            } else {
                DryRunState::new(backing)
            };
            modified = Some(dry_run.modified_flag());
            Box::new(dry_run)
        }
        StateMode::ReadOnly => Box::new(ReadOnlyState::new(backing)),
        StateMode::Null => {
            drop(backing);
            Box::new(NullState::new())
        }
    };

    let state: Box<dyn PersistentState + 'a> = if options.debug {
        debug!("record persistent state calls");
        Box::new(DebugState::new(state, sink))
    } else {
        state
    };

    ComposedState {
        state,
        modified,
        mode: options.mode,
    }
}
