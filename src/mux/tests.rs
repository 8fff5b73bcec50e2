// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::FusedStream;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio_util::sync::CancellationToken;

use super::*;

const EMPTY: &[u8] = b"";

fn options(encoding: Encoding, decode_failure: DecodeFailurePolicy) -> MuxOptions {
    MuxOptions::builder()
        .with_encoding(encoding)
        .with_decode_failure(decode_failure)
        .build()
}

fn texts(lines: &[CategorizedLine], source: LineSource) -> Vec<&str> {
    lines
        .iter()
        .filter(|line| line.source() == source)
        .map(|line| line.as_text().unwrap_or("<bytes>"))
        .collect()
}

/// Drains the stream, returning the lines and the terminal fault (if any).
async fn drain(mut stream: LineStream) -> (Vec<CategorizedLine>, Option<MuxError>) {
    let mut lines = Vec::new();
    while let Some(item) = stream.next_line().await {
        match item {
            Ok(line) => lines.push(line),
            Err(err) => {
                assert!(stream.next_line().await.is_none(), "fault must be the last item");
                return (lines, Some(err));
            }
        }
    }
    (lines, None)
}

struct FailingReader;

impl AsyncRead for FailingReader {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other("pipe exploded")))
    }
}

struct PanickingReader;

impl AsyncRead for PanickingReader {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        panic!("reader blew up");
    }
}

/// Oracle that only supports polling.
#[derive(Clone, Default)]
struct PolledFlag(Arc<AtomicBool>);

impl TerminationOracle for PolledFlag {
    fn has_exited(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
struct Unreachable;

impl TerminationOracle for Unreachable {
    fn has_exited(&self) -> bool {
        false
    }

    fn probe(&self) -> Result<(), MuxError> {
        Err(MuxError::OracleUnavailable {
            reason: "process handle already released".to_string(),
        })
    }
}

struct FakeProcess {
    stdout: Option<&'static [u8]>,
    stderr: Option<&'static [u8]>,
    flag: ExitFlag,
}

impl FakeProcess {
    fn new(stdout: &'static [u8], stderr: &'static [u8]) -> Self {
        Self {
            stdout: Some(stdout),
            stderr: Some(stderr),
            flag: ExitFlag::already_exited(),
        }
    }
}

impl ProcessHandle for FakeProcess {
    type Stdout = &'static [u8];
    type Stderr = &'static [u8];
    type Oracle = ExitFlag;

    fn name(&self) -> Option<&str> {
        Some("fake")
    }

    fn has_stream(&self, stream: LineSource) -> bool {
        match stream {
            LineSource::Stdout => self.stdout.is_some(),
            LineSource::Stderr => self.stderr.is_some(),
            LineSource::Stdin => false,
        }
    }

    fn take_stdout(&mut self) -> Option<Self::Stdout> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<Self::Stderr> {
        self.stderr.take()
    }

    fn oracle(&self) -> Self::Oracle {
        self.flag.clone()
    }
}

// =============================================================================
// Basic delivery
// =============================================================================

#[tokio::test]
async fn test_empty_output_after_exit() {
    let stream = Multiplexer::default()
        .multiplex(EMPTY, EMPTY, ExitFlag::already_exited())
        .unwrap();
    let lines = stream.collect_lines().await.unwrap();
    assert!(lines.is_empty());
}

#[tokio::test]
async fn test_all_lines_delivered_in_channel_order() {
    let stdout: &[u8] = b"a\nb\nc\n";
    let stderr: &[u8] = b"x\ny\n";
    let stream = Multiplexer::default()
        .multiplex(stdout, stderr, ExitFlag::already_exited())
        .unwrap();
    let lines = stream.collect_lines().await.unwrap();

    assert_eq!(lines.len(), 5);
    assert_eq!(texts(&lines, LineSource::Stdout), ["a\n", "b\n", "c\n"]);
    assert_eq!(texts(&lines, LineSource::Stderr), ["x\n", "y\n"]);
}

#[tokio::test]
async fn test_terminators_kept_and_fragment_flushed() {
    let stdout: &[u8] = b"one\r\n\ntwo";
    let stream = Multiplexer::default()
        .multiplex(stdout, EMPTY, ExitFlag::already_exited())
        .unwrap();
    let lines = stream.collect_lines().await.unwrap();
    assert_eq!(texts(&lines, LineSource::Stdout), ["one\r\n", "\n", "two"]);
}

#[tokio::test]
async fn test_terminated_and_unterminated_output_differ() {
    let collect = |stdout: &'static [u8]| async move {
        let lines = Multiplexer::default()
            .multiplex(stdout, EMPTY, ExitFlag::already_exited())
            .unwrap()
            .collect_lines()
            .await
            .unwrap();
        lines
            .iter()
            .map(|line| line.as_text().unwrap_or_default().to_string())
            .collect::<Vec<_>>()
    };
    let crlf = collect(b"a\r\nb").await;
    let lf = collect(b"a\nb\n").await;
    assert_eq!(crlf, ["a\r\n", "b"]);
    assert_eq!(lf, ["a\n", "b\n"]);
    assert_ne!(crlf, lf);
}

#[tokio::test]
async fn test_strip_terminators_option() {
    let stdout: &[u8] = b"one\r\n\ntwo";
    let options = MuxOptions::builder().with_strip_terminators(true).build();
    assert!(options.strip_terminators());
    assert!(!MuxOptions::default().strip_terminators());

    let stream = Multiplexer::new(options)
        .multiplex(stdout, EMPTY, ExitFlag::already_exited())
        .unwrap();
    let lines = stream.collect_lines().await.unwrap();
    assert_eq!(texts(&lines, LineSource::Stdout), ["one", "", "two"]);
}

#[tokio::test]
async fn test_raw_encoding_yields_bytes() {
    let stdout: &[u8] = b"\xff\xfe\n";
    let stream = Multiplexer::new(options(Encoding::Raw, DecodeFailurePolicy::FailFast))
        .multiplex(stdout, EMPTY, ExitFlag::already_exited())
        .unwrap();
    let lines = stream.collect_lines().await.unwrap();

    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].as_text(), None);
    assert_eq!(lines[0].as_bytes(), b"\xff\xfe\n");
}

#[tokio::test]
async fn test_utf16_output() {
    let stdout: &[u8] = b"h\0i\0\n\0";
    let stream = Multiplexer::new(options(Encoding::UTF16_LE, DecodeFailurePolicy::FailFast))
        .multiplex(stdout, EMPTY, ExitFlag::already_exited())
        .unwrap();
    let lines = stream.collect_lines().await.unwrap();
    assert_eq!(texts(&lines, LineSource::Stdout), ["hi\n"]);
}

#[tokio::test]
async fn test_bounded_buffer_delivers_everything() {
    let stdout: &'static [u8] = Box::leak(
        (0..100)
            .map(|i| format!("line {i}\n"))
            .collect::<String>()
            .into_bytes()
            .into_boxed_slice(),
    );
    let options = MuxOptions::builder()
        .with_buffer(BufferPolicy::from_capacity(1))
        .build();
    let stream = Multiplexer::new(options)
        .multiplex(stdout, EMPTY, ExitFlag::already_exited())
        .unwrap();
    let lines = stream.collect_lines().await.unwrap();

    assert_eq!(lines.len(), 100);
    assert_eq!(lines[0].as_text(), Some("line 0\n"));
    assert_eq!(lines[99].as_text(), Some("line 99\n"));
}

// =============================================================================
// Termination
// =============================================================================

#[tokio::test]
async fn test_end_of_data_before_exit_keeps_stream_open() {
    let flag = ExitFlag::new();
    let mut stream = Multiplexer::default()
        .multiplex(EMPTY, EMPTY, flag.clone())
        .unwrap();

    let pending = tokio::time::timeout(Duration::from_millis(50), stream.next_line()).await;
    assert!(pending.is_err(), "stream ended before the process exited");

    flag.set();
    assert!(stream.next_line().await.is_none());
    assert!(stream.is_terminated());
}

#[tokio::test]
async fn test_polling_oracle_ends_stream() {
    let oracle = PolledFlag::default();
    let options = MuxOptions::builder()
        .with_exit_poll_interval(Duration::from_millis(2))
        .build();
    let stream = Multiplexer::new(options)
        .multiplex(EMPTY, EMPTY, oracle.clone())
        .unwrap();

    let exit = oracle.0.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        exit.store(true, Ordering::Release);
    });

    let lines = tokio::time::timeout(Duration::from_secs(5), stream.collect_lines())
        .await
        .expect("stream should end after the flag is set")
        .unwrap();
    assert!(lines.is_empty());
}

#[tokio::test]
async fn test_output_arriving_while_consuming() {
    let (mut tx, rx) = tokio::io::duplex(64);
    let flag = ExitFlag::new();
    let mut stream = Multiplexer::default()
        .multiplex(rx, EMPTY, flag.clone())
        .unwrap();

    tx.write_all(b"early\n").await.unwrap();
    let first = stream.next_line().await.unwrap().unwrap();
    assert_eq!(first.as_text(), Some("early\n"));

    tx.write_all(b"late\n").await.unwrap();
    drop(tx);
    flag.set();

    let rest = stream.collect_lines().await.unwrap();
    assert_eq!(texts(&rest, LineSource::Stdout), ["late\n"]);
}

// =============================================================================
// Faults
// =============================================================================

#[tokio::test]
async fn test_fail_fast_fault_comes_last() {
    let stdout: &[u8] = b"ok\n\xff\nafter\n";
    let stderr: &[u8] = b"e1\ne2\n";
    let stream = Multiplexer::default()
        .multiplex(stdout, stderr, ExitFlag::already_exited())
        .unwrap();
    let (lines, fault) = drain(stream).await;

    assert_eq!(texts(&lines, LineSource::Stdout), ["ok\n"]);
    // The decode fault stops the stderr drainer wherever it happens to be.
    let stderr_lines = texts(&lines, LineSource::Stderr);
    assert!(["e1\n", "e2\n"].starts_with(&stderr_lines), "{stderr_lines:?}");
    match fault {
        Some(MuxError::Decode {
            stream, line, bytes, ..
        }) => {
            assert_eq!(stream, LineSource::Stdout);
            assert_eq!(line, 2);
            assert_eq!(bytes, b"\xff\n");
        }
        other => panic!("expected decode fault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_decode_fault_does_not_wait_for_open_sibling() {
    let stdout: &[u8] = b"ok\n\xff\xfe\n";
    let (mut tx, rx) = tokio::io::duplex(64);
    let flag = ExitFlag::new();
    let mut stream = Multiplexer::default()
        .multiplex(stdout, rx, flag.clone())
        .unwrap();
    tx.write_all(b"warming up\n").await.unwrap();

    let (lines, fault) = tokio::time::timeout(Duration::from_secs(5), async {
        let mut lines = Vec::new();
        loop {
            match stream.next_line().await {
                Some(Ok(line)) => lines.push(line),
                Some(Err(err)) => return (lines, Some(err)),
                None => return (lines, None),
            }
        }
    })
    .await
    .expect("decode fault held back by an open sibling channel");

    assert_eq!(texts(&lines, LineSource::Stdout), ["ok\n"]);
    assert!(matches!(
        fault,
        Some(MuxError::Decode {
            stream: LineSource::Stdout,
            line: 2,
            ..
        })
    ));
    assert!(stream.next_line().await.is_none());
    assert!(stream.is_terminated());
    assert!(!flag.has_exited());
    drop(tx);
}

#[tokio::test]
async fn test_read_fault_lets_sibling_finish() {
    let (mut tx, rx) = tokio::io::duplex(64);
    let flag = ExitFlag::new();
    let mut stream = Multiplexer::default()
        .multiplex(rx, FailingReader, flag.clone())
        .unwrap();

    tx.write_all(b"first\n").await.unwrap();
    let first = stream.next_line().await.unwrap().unwrap();
    assert_eq!(first.as_text(), Some("first\n"));

    tx.write_all(b"second\n").await.unwrap();
    drop(tx);
    flag.set();

    let (lines, fault) = drain(stream).await;
    assert_eq!(texts(&lines, LineSource::Stdout), ["second\n"]);
    assert!(matches!(fault, Some(MuxError::Read { .. })));
}

#[tokio::test]
async fn test_skip_policy_drops_bad_line() {
    let stdout: &[u8] = b"ok\n\xff\nafter\n";
    let stream = Multiplexer::new(options(Encoding::UTF8, DecodeFailurePolicy::Skip))
        .multiplex(stdout, EMPTY, ExitFlag::already_exited())
        .unwrap();
    let lines = stream.collect_lines().await.unwrap();
    assert_eq!(texts(&lines, LineSource::Stdout), ["ok\n", "after\n"]);
}

#[tokio::test]
async fn test_replace_policy_substitutes() {
    let stdout: &[u8] = b"ok\nbad \xff byte\n";
    let stream = Multiplexer::new(options(Encoding::UTF8, DecodeFailurePolicy::Replace))
        .multiplex(stdout, EMPTY, ExitFlag::already_exited())
        .unwrap();
    let lines = stream.collect_lines().await.unwrap();
    assert_eq!(texts(&lines, LineSource::Stdout), ["ok\n", "bad \u{FFFD} byte\n"]);
}

#[tokio::test]
async fn test_read_error_is_reported() {
    let stdout: &[u8] = b"fine\n";
    let stream = Multiplexer::default()
        .multiplex(stdout, FailingReader, ExitFlag::already_exited())
        .unwrap();
    let (lines, fault) = drain(stream).await;

    assert_eq!(texts(&lines, LineSource::Stdout), ["fine\n"]);
    let fault = fault.expect("read error should surface");
    insta::assert_snapshot!(fault.to_string(), @"failed to read STDERR: pipe exploded");
}

#[tokio::test]
async fn test_drainer_panic_is_reported() {
    let stderr: &[u8] = b"still here\n";
    let stream = Multiplexer::default()
        .multiplex(PanickingReader, stderr, ExitFlag::already_exited())
        .unwrap();
    let (lines, fault) = drain(stream).await;

    assert_eq!(texts(&lines, LineSource::Stderr), ["still here\n"]);
    match fault {
        Some(MuxError::DrainerPanicked { stream, message }) => {
            assert_eq!(stream, LineSource::Stdout);
            assert_eq!(message, "reader blew up");
        }
        other => panic!("expected panic fault, got {other:?}"),
    }
}

// =============================================================================
// Preflight
// =============================================================================

#[test]
fn test_requires_runtime() {
    let result = Multiplexer::default().multiplex(EMPTY, EMPTY, ExitFlag::new());
    assert!(matches!(result, Err(MuxError::NoRuntime)));
}

#[tokio::test]
async fn test_probe_failure_aborts_start() {
    let err = Multiplexer::default()
        .multiplex(EMPTY, EMPTY, Unreachable)
        .unwrap_err();
    insta::assert_snapshot!(
        err.to_string(),
        @"termination oracle unavailable: process handle already released"
    );
}

#[tokio::test]
async fn test_missing_stream_takes_nothing() {
    let mut process = FakeProcess::new(b"out\n", b"err\n");
    process.stderr = None;

    let err = Multiplexer::default()
        .multiplex_process(&mut process)
        .unwrap_err();
    assert!(matches!(
        err,
        MuxError::MissingStream {
            stream: LineSource::Stderr
        }
    ));
    assert!(process.stdout.is_some(), "stdout must not be taken on failure");
}

#[tokio::test]
async fn test_multiplex_process_helper() {
    let mut process = FakeProcess::new(b"out\n", b"err\n");
    let stream = multiplex(&mut process, Encoding::UTF8).unwrap();
    assert!(!process.has_stream(LineSource::Stdout));
    assert!(!process.has_stream(LineSource::Stderr));

    let lines = stream.collect_lines().await.unwrap();
    assert_eq!(texts(&lines, LineSource::Stdout), ["out\n"]);
    assert_eq!(texts(&lines, LineSource::Stderr), ["err\n"]);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_ends_stream() {
    let (_tx, rx) = tokio::io::duplex(64);
    let mut stream = Multiplexer::default()
        .multiplex(rx, EMPTY, ExitFlag::new())
        .unwrap();

    stream.cancel();
    assert!(stream.is_cancelled());
    assert!(stream.next_line().await.is_none());
}

#[tokio::test]
async fn test_parent_token_cancels_stream() {
    let token = CancellationToken::new();
    let (_tx, rx) = tokio::io::duplex(64);
    let mut stream = Multiplexer::default()
        .with_cancellation(token.clone())
        .multiplex(rx, EMPTY, ExitFlag::new())
        .unwrap();

    token.cancel();
    let end = tokio::time::timeout(Duration::from_secs(5), stream.next_line()).await;
    assert!(matches!(end, Ok(None)));
}

#[tokio::test]
async fn test_dropping_stream_releases_channels() {
    let (mut tx, rx) = tokio::io::duplex(64);
    let stream = Multiplexer::default()
        .multiplex(rx, EMPTY, ExitFlag::new())
        .unwrap();
    drop(stream);

    // The drainer drops its read half once cancelled, breaking the pipe.
    let broke = tokio::time::timeout(Duration::from_secs(5), async {
        while tx.write_all(b"x\n").await.is_ok() {
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(broke.is_ok());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_multiplexers() {
    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..100 {
        tasks.spawn(async move {
            let stdout: &'static [u8] = Box::leak(format!("out {i}\n").into_bytes().into_boxed_slice());
            let stderr: &'static [u8] = Box::leak(format!("err {i}\n").into_bytes().into_boxed_slice());
            let lines = Multiplexer::default()
                .multiplex(stdout, stderr, ExitFlag::already_exited())
                .unwrap()
                .collect_lines()
                .await
                .unwrap();
            (i, lines)
        });
    }

    let mut finished = 0;
    while let Some(joined) = tasks.join_next().await {
        let (i, lines) = joined.unwrap();
        assert_eq!(texts(&lines, LineSource::Stdout), [format!("out {i}\n")]);
        assert_eq!(texts(&lines, LineSource::Stderr), [format!("err {i}\n")]);
        finished += 1;
    }
    assert_eq!(finished, 100);
}

// =============================================================================
// Options
// =============================================================================

#[test]
fn test_exit_poll_interval_is_clamped() {
    let slow = MuxOptions::builder()
        .with_exit_poll_interval(Duration::from_secs(5))
        .build();
    assert_eq!(slow.exit_poll_interval(), MAX_EXIT_POLL);

    let zero = MuxOptions::builder()
        .with_exit_poll_interval(Duration::ZERO)
        .build();
    assert_eq!(zero.exit_poll_interval(), Duration::from_millis(1));

    assert_eq!(MuxOptions::default().exit_poll_interval(), DEFAULT_EXIT_POLL);
}

#[test]
fn test_decode_failure_policy_parse() {
    assert_eq!("fail".parse::<DecodeFailurePolicy>().unwrap(), DecodeFailurePolicy::FailFast);
    assert_eq!("SKIP".parse::<DecodeFailurePolicy>().unwrap(), DecodeFailurePolicy::Skip);
    assert_eq!("replace".parse::<DecodeFailurePolicy>().unwrap(), DecodeFailurePolicy::Replace);
    assert_eq!(DecodeFailurePolicy::FailFast.to_string(), "fail-fast");

    let err = "ignore".parse::<DecodeFailurePolicy>().unwrap_err();
    insta::assert_snapshot!(
        err.to_string(),
        @"unknown decode failure policy 'ignore' (expected fail-fast, skip or replace)"
    );
}

#[test]
fn test_line_source_tags() {
    assert_eq!(LineSource::Stdout.to_string(), "STDOUT");
    assert_eq!("stderr".parse::<LineSource>().unwrap(), LineSource::Stderr);
    assert!("stdlog".parse::<LineSource>().is_err());
}

#[test]
fn test_categorized_line_json() {
    let line = CategorizedLine::new("hello", LineSource::Stderr);
    let json = serde_json::to_string(&line).unwrap();
    insta::assert_snapshot!(json, @r#"{"source":"STDERR","content":"hello"}"#);
}
