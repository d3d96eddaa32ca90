// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Typed persistent state records.
//!
//! The persistent state itself only knows about bytes. Collaborators that
//! remember things across invocations agree on the buckets and record layouts
//! defined here, so the reconciliation engine and the script runner never
//! have to encode or decode raw values themselves.
//!
//! # Entry State
//!
//! Every destination entry that has been applied gets an [`EntryState`]
//! record in the `entryState` bucket keyed by its absolute destination path.
//! Comparing the recorded state against the desired state and the actual
//! destination lets the reconciliation engine tell whether an entry is
//! unchanged, needs an update, or was modified externally since last applied.
//!
//! # Script State
//!
//! Scripts that should only run once, or only run when their contents change,
//! get a [`ScriptState`] record in the `scriptState` bucket. Run-once scripts
//! are keyed by the hash of their contents, so the same contents never run
//! twice even if the script gets renamed. Run-on-change scripts are keyed by
//! name, and run again whenever the recorded hash differs.
//!
//! # Encoding
//!
//! Records are stored as TOML documents.

use crate::state::{PersistentState, StateError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, instrument};

/// Bucket holding applied state of destination entries.
pub const ENTRY_STATE_BUCKET: &[u8] = b"entryState";

/// Bucket holding run bookkeeping of scripts.
pub const SCRIPT_STATE_BUCKET: &[u8] = b"scriptState";

/// Lowercase hexadecimal SHA-256 digest of some content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash target content.
    pub fn of(content: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_ref());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Treat content hash as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for ContentHash {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Kind of destination entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Remove,
}

/// Applied state of a destination entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EntryState {
    /// Kind of entry that was applied.
    pub kind: EntryKind,

    /// Hash of file contents or symlink target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,

    /// Permission bits that were applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
}

impl EntryState {
    /// Construct entry state of a file with given contents.
    pub fn file(contents: impl AsRef<[u8]>, mode: u32) -> Self {
        Self {
            kind: EntryKind::File,
            content_hash: Some(ContentHash::of(contents)),
            mode: Some(mode),
        }
    }

    /// Construct entry state of a directory.
    pub fn directory(mode: u32) -> Self {
        Self {
            kind: EntryKind::Directory,
            content_hash: None,
            mode: Some(mode),
        }
    }

    /// Construct entry state of a symlink pointing at target.
    pub fn symlink(target: impl AsRef<Path>) -> Self {
        Self {
            kind: EntryKind::Symlink,
            content_hash: Some(ContentHash::of(path_to_bytes(target.as_ref()))),
            mode: None,
        }
    }

    /// Construct entry state of a removed entry.
    pub fn removed() -> Self {
        Self {
            kind: EntryKind::Remove,
            content_hash: None,
            mode: None,
        }
    }
}

/// Run bookkeeping of a script.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScriptState {
    /// Name of the script when it last ran.
    pub name: String,

    /// Hash of script contents when it last ran.
    pub content_hash: ContentHash,

    /// Seconds since unix epoch of last run.
    pub run_at: u64,
}

/// Condition under which a script runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ScriptCondition {
    /// Run every time.
    #[default]
    Always,

    /// Run only if these exact contents never ran before.
    Once,

    /// Run only if contents changed since last run under same name.
    OnChange,
}

/// Get applied state of destination entry.
///
/// Returns `None` if entry has never been applied.
///
/// # Errors
///
/// - Return [`RecordError::State`] if persistent state fails.
/// - Return [`RecordError::Decode`] if stored record is malformed.
pub fn get_entry_state(
    state: &(impl PersistentState + ?Sized),
    path: impl AsRef<Path>,
) -> Result<Option<EntryState>> {
    decode(&state.get(ENTRY_STATE_BUCKET, path_to_bytes(path.as_ref()).as_slice())?)
}

/// Record applied state of destination entry.
///
/// # Errors
///
/// - Return [`RecordError::State`] if persistent state fails.
/// - Return [`RecordError::Encode`] if record cannot be encoded.
#[instrument(skip(state, entry), level = "debug")]
pub fn set_entry_state(
    state: &mut (impl PersistentState + ?Sized),
    path: impl AsRef<Path> + std::fmt::Debug,
    entry: &EntryState,
) -> Result<()> {
    debug!("record {:?} entry state", entry.kind);
    let value = encode(entry)?;
    state.set(
        ENTRY_STATE_BUCKET,
        path_to_bytes(path.as_ref()).as_slice(),
        value.as_bytes(),
    )?;

    Ok(())
}

/// Forget applied state of destination entry.
///
/// # Errors
///
/// - Return [`RecordError::State`] if persistent state fails.
pub fn delete_entry_state(
    state: &mut (impl PersistentState + ?Sized),
    path: impl AsRef<Path>,
) -> Result<()> {
    state.delete(ENTRY_STATE_BUCKET, path_to_bytes(path.as_ref()).as_slice())?;
    Ok(())
}

/// List applied state of every recorded destination entry.
///
/// # Errors
///
/// - Return [`RecordError::State`] if persistent state fails.
/// - Return [`RecordError::Decode`] if any stored record is malformed.
pub fn entry_states(
    state: &(impl PersistentState + ?Sized),
) -> Result<BTreeMap<PathBuf, EntryState>> {
    let mut raw = Vec::new();
    state.for_each(ENTRY_STATE_BUCKET, &mut |key, value| {
        raw.push((bytes_to_path(key), value.to_vec()));
        Ok(())
    })?;

    let mut entries = BTreeMap::new();
    for (path, value) in raw {
        if let Some(entry) = decode(&value)? {
            entries.insert(path, entry);
        }
    }

    Ok(entries)
}

/// Check if script should run under condition.
///
/// # Errors
///
/// - Return [`RecordError::State`] if persistent state fails.
/// - Return [`RecordError::Decode`] if stored record is malformed.
pub fn script_should_run(
    state: &(impl PersistentState + ?Sized),
    name: impl AsRef<str>,
    contents: impl AsRef<[u8]>,
    condition: ScriptCondition,
) -> Result<bool> {
    let hash = ContentHash::of(contents);
    let should_run = match condition {
        ScriptCondition::Always => true,
        ScriptCondition::Once => {
            let recorded: Option<ScriptState> =
                decode(&state.get(SCRIPT_STATE_BUCKET, hash.as_str().as_bytes())?)?;
            recorded.is_none()
        }
        ScriptCondition::OnChange => {
            let recorded: Option<ScriptState> =
                decode(&state.get(SCRIPT_STATE_BUCKET, name.as_ref().as_bytes())?)?;
            recorded.is_none_or(|script| script.content_hash != hash)
        }
    };

    Ok(should_run)
}

/// Record that script just ran under condition.
///
/// Scripts that always run leave no record behind.
///
/// # Errors
///
/// - Return [`RecordError::State`] if persistent state fails.
/// - Return [`RecordError::Encode`] if record cannot be encoded.
#[instrument(skip(state, name, contents), level = "debug")]
pub fn record_script_run(
    state: &mut (impl PersistentState + ?Sized),
    name: impl AsRef<str>,
    contents: impl AsRef<[u8]>,
    condition: ScriptCondition,
) -> Result<()> {
    let record = ScriptState {
        name: name.as_ref().to_string(),
        content_hash: ContentHash::of(contents),
        run_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default(),
    };

    let key = match condition {
        ScriptCondition::Always => return Ok(()),
        ScriptCondition::Once => record.content_hash.as_str().to_string(),
        ScriptCondition::OnChange => record.name.clone(),
    };

    debug!("record run of script {:?}", record.name);
    let value = encode(&record)?;
    state.set(SCRIPT_STATE_BUCKET, key.as_bytes(), value.as_bytes())?;

    Ok(())
}

fn encode<T>(record: &T) -> Result<String>
where
    T: Serialize,
{
    Ok(toml::ser::to_string(record)?)
}

fn decode<T>(value: &[u8]) -> Result<Option<T>>
where
    T: for<'de> Deserialize<'de>,
{
    // INVARIANT: Empty value means nothing was recorded.
    if value.is_empty() {
        return Ok(None);
    }

    let data = std::str::from_utf8(value).map_err(RecordError::Utf8)?;
    Ok(Some(toml::de::from_str(data)?))
}

#[cfg(unix)]
fn path_to_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_to_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::{ffi::OsStr, os::unix::ffi::OsStrExt};
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

/// Record handling error types.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// Persistent state operation fails.
    #[error(transparent)]
    State(#[from] StateError),

    /// Record cannot be encoded.
    #[error(transparent)]
    Encode(#[from] toml::ser::Error),

    /// Stored record cannot be decoded.
    #[error(transparent)]
    Decode(#[from] toml::de::Error),

    /// Stored record is not valid UTF-8.
    #[error("stored record is not valid UTF-8")]
    Utf8(#[source] std::str::Utf8Error),
}

/// Friendly result alias :3
pub type Result<T, E = RecordError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DryRunState, NullState, ReadOnlyState, SqliteState};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn open_state(dir: &TempDir) -> anyhow::Result<SqliteState> {
        let mut state = SqliteState::new(dir.path().join("state.sqlite3"));
        state.open_or_create()?;
        Ok(state)
    }

    #[test]
    fn content_hash_is_sha256_hex() {
        let result = ContentHash::of("hello\n");
        let expect = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";
        assert_eq!(result.as_str(), expect);
    }

    #[test]
    fn entry_state_encodes_as_toml() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut state = open_state(&dir)?;
        let entry = EntryState::file("hello\n", 0o644);
        set_entry_state(&mut state, "/home/user/.bashrc", &entry)?;

        let raw = state.get(ENTRY_STATE_BUCKET, b"/home/user/.bashrc")?;
        let result = String::from_utf8(raw)?;
        let expect = indoc! {r#"
            kind = "file"
            content_hash = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
            mode = 420
        "#};
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn entry_state_lifecycle() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut state = open_state(&dir)?;
        assert_eq!(get_entry_state(&state, "/home/user/.bashrc")?, None);

        let bashrc = EntryState::file("export EDITOR=vim\n", 0o644);
        let vim = EntryState::directory(0o755);
        let link = EntryState::symlink("/home/user/.config/nvim/init.lua");
        set_entry_state(&mut state, "/home/user/.bashrc", &bashrc)?;
        set_entry_state(&mut state, "/home/user/.vim", &vim)?;
        set_entry_state(&mut state, "/home/user/.vimrc", &link)?;
        assert_eq!(get_entry_state(&state, "/home/user/.bashrc")?, Some(bashrc.clone()));

        delete_entry_state(&mut state, "/home/user/.vim")?;
        let result = entry_states(&state)?;
        let expect = BTreeMap::from([
            (PathBuf::from("/home/user/.bashrc"), bashrc),
            (PathBuf::from("/home/user/.vimrc"), link),
        ]);
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn malformed_entry_state_is_decode_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut state = open_state(&dir)?;
        state.set(ENTRY_STATE_BUCKET, b"/home/user/.bashrc", b"{hash:abc123}")?;

        let result = get_entry_state(&state, "/home/user/.bashrc");
        assert!(matches!(result, Err(RecordError::Decode(_))));

        state.set(ENTRY_STATE_BUCKET, b"/home/user/.bashrc", b"\xff\xfe")?;
        let result = get_entry_state(&state, "/home/user/.bashrc");
        assert!(matches!(result, Err(RecordError::Utf8(_))));

        Ok(())
    }

    #[test]
    fn run_once_scripts_run_once_per_contents() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut state = open_state(&dir)?;
        let condition = ScriptCondition::Once;

        assert!(script_should_run(&state, "install.sh", "echo install", condition)?);
        record_script_run(&mut state, "install.sh", "echo install", condition)?;
        assert!(!script_should_run(&state, "install.sh", "echo install", condition)?);

        // Renaming does not rerun identical contents.
        assert!(!script_should_run(&state, "setup.sh", "echo install", condition)?);
        assert!(script_should_run(&state, "install.sh", "echo reinstall", condition)?);

        Ok(())
    }

    #[test]
    fn run_on_change_scripts_rerun_on_new_contents() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut state = open_state(&dir)?;
        let condition = ScriptCondition::OnChange;

        assert!(script_should_run(&state, "packages.sh", "apt install git", condition)?);
        record_script_run(&mut state, "packages.sh", "apt install git", condition)?;
        assert!(!script_should_run(&state, "packages.sh", "apt install git", condition)?);
        assert!(script_should_run(&state, "packages.sh", "apt install git vim", condition)?);

        let raw = state.get(SCRIPT_STATE_BUCKET, b"packages.sh")?;
        let recorded: Option<ScriptState> = decode(&raw)?;
        let recorded = recorded.unwrap();
        assert_eq!(recorded.name, "packages.sh");
        assert_eq!(recorded.content_hash, ContentHash::of("apt install git"));

        Ok(())
    }

    #[test]
    fn always_scripts_leave_no_record() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut state = open_state(&dir)?;

        record_script_run(&mut state, "motd.sh", "echo hi", ScriptCondition::Always)?;
        assert!(script_should_run(&state, "motd.sh", "echo hi", ScriptCondition::Always)?);

        let mut count = 0;
        state.for_each(SCRIPT_STATE_BUCKET, &mut |_, _| {
            count += 1;
            Ok(())
        })?;
        assert_eq!(count, 0);

        Ok(())
    }

    #[test]
    fn records_respect_decorators() -> anyhow::Result<()> {
        let mut read_only = ReadOnlyState::new(NullState);
        let result = set_entry_state(&mut read_only, "/home/user/.bashrc", &EntryState::removed());
        assert!(matches!(result, Err(RecordError::State(ref err)) if err.is_permission_denied()));

        let mut dry_run = DryRunState::new(NullState);
        record_script_run(&mut dry_run, "install.sh", "echo", ScriptCondition::Once)?;
        assert!(dry_run.modified());
        assert!(script_should_run(&dry_run, "install.sh", "echo", ScriptCondition::Once)?);

        Ok(())
    }
}
