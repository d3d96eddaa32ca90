// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Debug persistent state.
//!
//! Forwards every call unchanged to the wrapped persistent state, and records
//! one [`CallRecord`] per call into an injected [`DebugSink`] once the call has
//! returned. The destination of these records is entirely decided by whoever
//! constructs the decorator.

use crate::state::{Operation, PersistentState, Result, StateError, Visitor};

use std::{
    cell::RefCell,
    fmt::{Display, Formatter, Result as FmtResult},
    io::Write,
};
use tracing::debug;

/// Outcome of one persistent state call.
#[derive(Debug)]
pub struct CallRecord<'a> {
    operation: Operation,
    arguments: Vec<Argument<'a>>,
    error: Option<&'a StateError>,
}

impl<'a> CallRecord<'a> {
    fn new(operation: Operation, arguments: Vec<Argument<'a>>, error: Option<&'a StateError>) -> Self {
        Self {
            operation,
            arguments,
            error,
        }
    }

    /// Operation that was called.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Error produced by call, if any.
    pub fn error(&self) -> Option<&StateError> {
        self.error
    }

    /// Check if call succeeded.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

impl Display for CallRecord<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}", self.operation)?;
        if !self.arguments.is_empty() {
            fmt.write_str("(")?;
            for (index, argument) in self.arguments.iter().enumerate() {
                if index > 0 {
                    fmt.write_str(", ")?;
                }
                write!(fmt, "{argument}")?;
            }
            fmt.write_str(")")?;
        }

        match self.error {
            Some(error) => write!(fmt, " failed: {error}"),
            None => fmt.write_str(" succeeded"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Argument<'a> {
    Bytes(&'a [u8]),
    Visitor,
}

impl Display for Argument<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Bytes(bytes) => write!(fmt, "\"{}\"", bytes.escape_ascii()),
            Self::Visitor => fmt.write_str("_"),
        }
    }
}

/// Destination of debug call records.
pub trait DebugSink {
    /// Record one finished call.
    ///
    /// Must not fail. Whatever happens here never changes the outcome of the
    /// call being recorded.
    fn record(&self, record: &CallRecord<'_>);
}

impl<F> DebugSink for F
where
    F: Fn(&CallRecord<'_>),
{
    fn record(&self, record: &CallRecord<'_>) {
        self(record)
    }
}

/// Emit call records as tracing events at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DebugSink for TracingSink {
    fn record(&self, record: &CallRecord<'_>) {
        debug!(target: "dotstate::state", "{record}");
    }
}

/// Write call records line by line into a writer.
#[derive(Debug)]
pub struct WriterSink<W>
where
    W: Write,
{
    writer: RefCell<W>,
}

impl<W> WriterSink<W>
where
    W: Write,
{
    /// Construct new writer sink.
    pub fn new(writer: W) -> Self {
        Self {
            writer: RefCell::new(writer),
        }
    }

    /// Unwrap into inner writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W> DebugSink for WriterSink<W>
where
    W: Write,
{
    fn record(&self, record: &CallRecord<'_>) {
        if let Ok(mut writer) = self.writer.try_borrow_mut() {
            let _ = writeln!(writer, "{record}");
        }
    }
}

/// Persistent state that records every call into a debug sink.
#[derive(Debug)]
pub struct DebugState<S, K>
where
    S: PersistentState,
    K: DebugSink,
{
    inner: S,
    sink: K,
}

impl<S, K> DebugState<S, K>
where
    S: PersistentState,
    K: DebugSink,
{
    /// Construct new debug persistent state around `inner` recording into `sink`.
    pub fn new(inner: S, sink: K) -> Self {
        Self { inner, sink }
    }

    /// Unwrap into inner persistent state and sink.
    pub fn into_parts(self) -> (S, K) {
        (self.inner, self.sink)
    }

    fn log_call<T>(&self, operation: Operation, arguments: Vec<Argument<'_>>, result: &Result<T>) {
        let record = CallRecord::new(operation, arguments, result.as_ref().err());
        self.sink.record(&record);
    }
}

impl<S, K> PersistentState for DebugState<S, K>
where
    S: PersistentState,
    K: DebugSink,
{
    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        let result = self.inner.get(bucket, key);
        self.log_call(
            Operation::Get,
            vec![Argument::Bytes(bucket), Argument::Bytes(key)],
            &result,
        );
        result
    }

    fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        let result = self.inner.set(bucket, key, value);
        self.log_call(
            Operation::Set,
            vec![
                Argument::Bytes(bucket),
                Argument::Bytes(key),
                Argument::Bytes(value),
            ],
            &result,
        );
        result
    }

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<()> {
        let result = self.inner.delete(bucket, key);
        self.log_call(
            Operation::Delete,
            vec![Argument::Bytes(bucket), Argument::Bytes(key)],
            &result,
        );
        result
    }

    fn for_each(&self, bucket: &[u8], visit: &mut Visitor<'_>) -> Result<()> {
        let result = self.inner.for_each(bucket, visit);
        self.log_call(
            Operation::ForEach,
            vec![Argument::Bytes(bucket), Argument::Visitor],
            &result,
        );
        result
    }

    fn open_or_create(&mut self) -> Result<()> {
        let result = self.inner.open_or_create();
        self.log_call(Operation::OpenOrCreate, Vec::new(), &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DryRunState, NullState, ReadOnlyState, SqliteState};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::{path::Path, rc::Rc};
    use tempfile::TempDir;

    struct Capture(Rc<RefCell<Vec<String>>>);

    impl DebugSink for Capture {
        fn record(&self, record: &CallRecord<'_>) {
            self.0.borrow_mut().push(record.to_string());
        }
    }

    fn capture() -> (Rc<RefCell<Vec<String>>>, Capture) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        (Rc::clone(&lines), Capture(lines))
    }

    fn expect_success(record: &CallRecord<'_>) {
        assert!(record.succeeded(), "unexpected failure: {record}");
        assert!(record.error().is_none());
    }

    #[test_case(b"entryState", "\"entryState\""; "plain text")]
    #[test_case(b"\x00\xffkey\n", "\"\\x00\\xffkey\\n\""; "binary bytes")]
    #[test_case(b"say \"hi\"", "\"say \\\"hi\\\"\""; "embedded quotes")]
    #[test]
    fn escape_arguments(bytes: &[u8], expect: &str) {
        pretty_assertions::assert_eq!(Argument::Bytes(bytes).to_string(), expect);
    }

    #[test]
    fn one_record_per_call() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (lines, sink) = capture();
        let mut state = DebugState::new(SqliteState::new(dir.path().join("state.sqlite3")), sink);

        state.open_or_create()?;
        state.set(b"entryState", b"/home/user/.bashrc", b"{hash:abc123}")?;
        let value = state.get(b"entryState", b"/home/user/.bashrc")?;
        state.for_each(b"entryState", &mut |_, _| Ok(()))?;
        state.delete(b"entryState", b"/home/user/.bashrc")?;
        assert_eq!(value, b"{hash:abc123}".to_vec());

        let result = lines.borrow().join("\n") + "\n";
        let expect = indoc! {r#"
            OpenOrCreate succeeded
            Set("entryState", "/home/user/.bashrc", "{hash:abc123}") succeeded
            Get("entryState", "/home/user/.bashrc") succeeded
            ForEach("entryState", _) succeeded
            Delete("entryState", "/home/user/.bashrc") succeeded
        "#};
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn failures_are_recorded_and_returned_unchanged() {
        let (lines, sink) = capture();
        let mut state = DebugState::new(ReadOnlyState::new(NullState), sink);

        let error = state.set(b"entryState", b"key", b"value").unwrap_err();
        assert!(error.is_permission_denied());

        let result = lines.borrow().clone();
        let expect = vec![
            r#"Set("entryState", "key", "value") failed: Set not permitted on read-only persistent state"#
                .to_string(),
        ];
        assert_eq!(result, expect);
    }

    #[test]
    fn visitor_failure_is_recorded_once() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut backing = SqliteState::new(dir.path().join("state.sqlite3"));
        backing.open_or_create()?;
        backing.set(b"entryState", b"/home/user/.bashrc", b"{hash:abc123}")?;
        backing.set(b"entryState", b"/home/user/.zshrc", b"{hash:def456}")?;

        let (lines, sink) = capture();
        let state = DebugState::new(backing, sink);
        let result = state.for_each(b"entryState", &mut |_, _| Err(StateError::visit("bad entry")));
        assert!(matches!(result, Err(StateError::Visit(_))));

        let result = lines.borrow().clone();
        let expect = vec![
            r#"ForEach("entryState", _) failed: failed to visit persistent state entry"#.to_string(),
        ];
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn unopened_backend_error_passes_through() {
        let (lines, sink) = capture();
        let state = DebugState::new(SqliteState::new("/nonexistent/state.sqlite3"), sink);

        let error = state.get(b"entryState", b"key").unwrap_err();
        assert!(matches!(
            &error,
            StateError::NotOpen { path } if path == Path::new("/nonexistent/state.sqlite3")
        ));

        let result = lines.borrow().clone();
        let expect = vec![format!(r#"Get("entryState", "key") failed: {error}"#)];
        assert_eq!(result, expect);
    }

    #[test]
    fn wrapping_preserves_dry_run_results() -> anyhow::Result<()> {
        let (lines, sink) = capture();
        let mut bare = DryRunState::with_overlay(NullState);
        let mut wrapped = DebugState::new(DryRunState::with_overlay(NullState), sink);

        bare.set(b"bucket", b"key", b"value")?;
        wrapped.set(b"bucket", b"key", b"value")?;
        assert_eq!(
            bare.get(b"bucket", b"key")?,
            wrapped.get(b"bucket", b"key")?
        );
        assert_eq!(lines.borrow().len(), 2);

        let (inner, _) = wrapped.into_parts();
        assert_eq!(inner.modified(), bare.modified());

        Ok(())
    }

    #[test]
    fn function_sinks_observe_every_operation() -> anyhow::Result<()> {
        let mut state = DebugState::new(NullState, expect_success);
        state.open_or_create()?;
        state.set(b"bucket", b"key", b"value")?;
        state.delete(b"bucket", b"key")?;
        assert_eq!(state.get(b"bucket", b"key")?, Vec::<u8>::new());

        Ok(())
    }

    #[test]
    fn writer_sink_writes_lines() {
        let mut state = DebugState::new(NullState, WriterSink::new(Vec::new()));
        let _ = state.get(b"scriptState", b"install.sh");

        let (_, sink) = state.into_parts();
        let result = String::from_utf8_lossy(&sink.into_inner()).into_owned();
        let expect = "Get(\"scriptState\", \"install.sh\") succeeded\n";
        assert_eq!(result, expect);
    }
}
