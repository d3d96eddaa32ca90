// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Persistent state for dotfile reconciliation.
//!
//! Dotstate keeps track of what a dotfile manager did in previous invocations,
//! so that applying the same source of truth to a home directory twice is
//! idempotent. Which entries were applied with what content, and which scripts
//! already ran, is all remembered in one bucketed key-value store.
//!
//! The same store serves every execution mode. Normal runs persist, dry runs
//! only pretend to, debug runs log every call, and previews may not write at
//! all. Each mode is a decorator over one shared [`PersistentState`] trait, and
//! [`compose`] picks the right stack for an invocation.
//!
//! # See Also
//!
//! 1. [`state`]
//! 2. [`record`]

pub mod config;
pub mod path;
pub mod record;
pub mod stack;
pub mod state;

pub use stack::{compose, ComposedState, StackOptions, StateMode};
pub use state::{PersistentState, StateError};
