// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dry run persistent state.
//!
//! A dry run simulates an entire invocation without persisting anything, but
//! must still report truthfully whether changes would have been made. Thus,
//! the dry run persistent state drops every write to the wrapped persistent
//! state, and raises a __modified flag__ instead.
//!
//! # Dropped Writes Versus Shadowed Writes
//!
//! By default, dropped writes are simply forgotten. Reads keep reflecting
//! what is genuinely persisted, which means a read later in the same session
//! does __not__ observe a value that an earlier write would have produced.
//!
//! Callers that need read-your-writes consistency within a session can opt
//! into a __shadow overlay__ through [`DryRunState::with_overlay`]. The overlay
//! keeps every dropped write in memory as either a shadow value or a
//! tombstone, and consults it before falling through to the wrapped
//! persistent state. The overlay is discarded with the decorator itself.
//!
//! Opening is conservatively treated as a mutation, because it may create
//! the backing storage. It is still forwarded, so that reads keep working
//! against validly opened storage.

use crate::state::{PersistentState, Result, Visitor};

use std::{cell::Cell, collections::BTreeMap, rc::Rc};

/// Shared handle to the modified flag of a dry run session.
///
/// Remains readable after the owning [`DryRunState`] has been boxed or
/// wrapped by other decorators.
#[derive(Debug, Default, Clone)]
pub struct ModifiedFlag(Rc<Cell<bool>>);

impl ModifiedFlag {
    /// Check if any mutation was attempted during the session.
    pub fn is_set(&self) -> bool {
        self.0.get()
    }

    fn raise(&self) {
        self.0.set(true);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Shadow {
    Value(Vec<u8>),
    Tombstone,
}

type Overlay = BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, Shadow>>;

/// Persistent state that drops writes but records that they occurred.
#[derive(Debug)]
pub struct DryRunState<S>
where
    S: PersistentState,
{
    inner: S,
    modified: ModifiedFlag,
    overlay: Option<Overlay>,
}

impl<S> DryRunState<S>
where
    S: PersistentState,
{
    /// Construct new dry run persistent state that forgets dropped writes.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            modified: ModifiedFlag::default(),
            overlay: None,
        }
    }

    /// Construct new dry run persistent state that shadows dropped writes.
    pub fn with_overlay(inner: S) -> Self {
        Self {
            inner,
            modified: ModifiedFlag::default(),
            overlay: Some(Overlay::new()),
        }
    }

    /// Check if any mutation was attempted during the session.
    pub fn modified(&self) -> bool {
        self.modified.is_set()
    }

    /// Obtain shared handle to modified flag.
    pub fn modified_flag(&self) -> ModifiedFlag {
        self.modified.clone()
    }

    /// Unwrap into inner persistent state.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn shadow(&mut self, bucket: &[u8], key: &[u8], shadow: Shadow) {
        if let Some(overlay) = self.overlay.as_mut() {
            overlay
                .entry(bucket.to_vec())
                .or_default()
                .insert(key.to_vec(), shadow);
        }
    }

    fn lookup(&self, bucket: &[u8], key: &[u8]) -> Option<&Shadow> {
        self.overlay.as_ref()?.get(bucket)?.get(key)
    }
}

impl<S> PersistentState for DryRunState<S>
where
    S: PersistentState,
{
    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        match self.lookup(bucket, key) {
            Some(Shadow::Value(value)) => Ok(value.clone()),
            Some(Shadow::Tombstone) => Ok(Vec::new()),
            None => self.inner.get(bucket, key),
        }
    }

    fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        self.modified.raise();
        self.shadow(bucket, key, Shadow::Value(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<()> {
        self.modified.raise();
        self.shadow(bucket, key, Shadow::Tombstone);
        Ok(())
    }

    fn for_each(&self, bucket: &[u8], visit: &mut Visitor<'_>) -> Result<()> {
        let Some(shadows) = self.overlay.as_ref().and_then(|overlay| overlay.get(bucket)) else {
            return self.inner.for_each(bucket, visit);
        };

        // INVARIANT: Merge persisted entries with shadows, shadows win.
        let mut merged = BTreeMap::new();
        self.inner.for_each(bucket, &mut |key, value| {
            merged.insert(key.to_vec(), value.to_vec());
            Ok(())
        })?;
        for (key, shadow) in shadows {
            match shadow {
                Shadow::Value(value) => merged.insert(key.clone(), value.clone()),
                Shadow::Tombstone => merged.remove(key),
            };
        }

        for (key, value) in &merged {
            visit(key, value)?;
        }

        Ok(())
    }

    fn open_or_create(&mut self) -> Result<()> {
        self.modified.raise();
        self.inner.open_or_create()
    }
}
