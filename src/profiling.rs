//! Chrome Tracing collector for job spans.
//!
//! Events are recorded into thread-local buffers without contention. Each
//! scheduler thread hands its buffer to the global list when it exits, and
//! [`export_to_file`] writes everything as JSON for chrome://tracing or
//! ui.perfetto.dev.

use parking_lot::Mutex;
use serde::Serialize;
use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A single trace event in Chrome Tracing format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub name: &'static str,
    pub tid: usize,
    pub start_us: u64,
    pub duration_us: u64,
}

thread_local! {
    static TRACE_BUFFER: RefCell<Vec<TraceEvent>> = RefCell::new(Vec::with_capacity(1024));
}

lazy_static::lazy_static! {
    static ref GLOBAL_START: Instant = Instant::now();
    static ref EPOCH_START_US: u64 = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    static ref ALL_BUFFERS: Mutex<Vec<Vec<TraceEvent>>> = Mutex::new(Vec::new());
}

/// Records a span of work on scheduler thread `tid`.
///
/// Never inlined: the caller may be a fiber that changed threads since its
/// last thread-local access.
#[inline(never)]
pub fn record_event(name: &'static str, tid: usize, start: Instant, duration: Duration) {
    let start_us = start.saturating_duration_since(*GLOBAL_START).as_micros() as u64 + *EPOCH_START_US;
    let event = TraceEvent {
        name,
        tid,
        start_us,
        duration_us: duration.as_micros() as u64,
    };
    TRACE_BUFFER.with(|buf| buf.borrow_mut().push(event));
}

/// Moves the calling thread's buffer into the global list.
#[inline(never)]
pub fn collect_local_trace() {
    TRACE_BUFFER.with(|buf| {
        let mut local = buf.borrow_mut();
        if !local.is_empty() {
            ALL_BUFFERS.lock().push(std::mem::take(&mut *local));
        }
    });
}

/// Number of events collected so far from all threads.
pub fn collected_event_count() -> usize {
    ALL_BUFFERS.lock().iter().map(Vec::len).sum()
}

/// Wire form of a [`TraceEvent`]. `ph` "X" is a complete event and needs `dur`.
#[derive(Serialize)]
struct ChromeEvent<'a> {
    name: &'a str,
    ph: &'static str,
    ts: u64,
    dur: u64,
    pid: u32,
    tid: usize,
}

impl<'a> From<&'a TraceEvent> for ChromeEvent<'a> {
    fn from(event: &'a TraceEvent) -> Self {
        ChromeEvent {
            name: event.name,
            ph: "X",
            ts: event.start_us,
            dur: event.duration_us,
            pid: 1,
            tid: event.tid,
        }
    }
}

/// Writes all collected events to `path` as a Chrome trace JSON array.
pub fn export_to_file(path: impl AsRef<Path>) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    let buffers = ALL_BUFFERS.lock();
    let events: Vec<ChromeEvent<'_>> = buffers.iter().flatten().map(ChromeEvent::from).collect();

    serde_json::to_writer(&mut writer, &events)?;
    writer.flush()
}

/// Records a span from creation until drop.
pub struct TraceGuard {
    name: &'static str,
    tid: usize,
    start: Instant,
}

impl TraceGuard {
    pub fn new(name: &'static str, tid: usize) -> Self {
        Self {
            name,
            tid,
            start: Instant::now(),
        }
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        record_event(self.name, self.tid, self.start, self.start.elapsed());
    }
}
