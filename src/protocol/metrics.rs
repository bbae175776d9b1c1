use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::Error;

/// Track link metrics without external dependencies.
pub(crate) struct Metrics;

static REQUESTS_SENT: AtomicU64 = AtomicU64::new(0);
static REPLIES_DECODED: AtomicU64 = AtomicU64::new(0);
static FRAMES_IGNORED: AtomicU64 = AtomicU64::new(0);
static ROUND_TRIP_TOTAL_NS: AtomicU64 = AtomicU64::new(0);
static ROUND_TRIP_MAX_NS: AtomicU64 = AtomicU64::new(0);

const NANOSECONDS_PER_MICROSECOND: u128 = 1_000;

struct FailureCounters {
    timeout: AtomicU64,
    checksum: AtomicU64,
    malformed: AtomicU64,
    unsupported_length: AtomicU64,
    unknown_opcode: AtomicU64,
    reassembly: AtomicU64,
    truncated: AtomicU64,
    link: AtomicU64,
}

static FAILURES: FailureCounters = FailureCounters::new();

impl FailureCounters {
    const fn new() -> Self {
        Self {
            timeout: AtomicU64::new(0),
            checksum: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            unsupported_length: AtomicU64::new(0),
            unknown_opcode: AtomicU64::new(0),
            reassembly: AtomicU64::new(0),
            truncated: AtomicU64::new(0),
            link: AtomicU64::new(0),
        }
    }

    fn increment(&self, error: &Error) {
        let counter = match error {
            Error::Timeout { .. } => &self.timeout,
            Error::ChecksumMismatch { .. } => &self.checksum,
            Error::MalformedFrame { .. } => &self.malformed,
            Error::UnsupportedLength { .. } => &self.unsupported_length,
            Error::UnknownOpcode { .. } => &self.unknown_opcode,
            Error::ReassemblyOverflow { .. } | Error::SessionMismatch { .. } => &self.reassembly,
            Error::Truncated { .. } => &self.truncated,
            Error::Config(_) | Error::Link(_) => &self.link,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Metrics {
    #[inline]
    pub(crate) fn record_request() {
        REQUESTS_SENT.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_reply(round_trip: Duration) {
        REPLIES_DECODED.fetch_add(1, Ordering::Relaxed);
        let nanos = round_trip
            .as_nanos()
            .min(u64::MAX as u128)
            .try_into()
            .unwrap_or(u64::MAX);
        ROUND_TRIP_TOTAL_NS.fetch_add(nanos, Ordering::Relaxed);
        update_max(&ROUND_TRIP_MAX_NS, nanos);
    }

    #[inline]
    pub(crate) fn record_error(error: &Error) {
        FAILURES.increment(error);
    }

    /// A CAN frame addressed to another node, or of a kind this host ignores.
    #[inline]
    pub(crate) fn record_ignored_frame() {
        FRAMES_IGNORED.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn totals() -> MetricsSnapshot {
        MetricsSnapshot {
            requests_sent: REQUESTS_SENT.load(Ordering::Relaxed),
            replies_decoded: REPLIES_DECODED.load(Ordering::Relaxed),
            frames_ignored: FRAMES_IGNORED.load(Ordering::Relaxed),
            timeouts: FAILURES.timeout.load(Ordering::Relaxed),
            checksum_failures: FAILURES.checksum.load(Ordering::Relaxed),
            malformed_frames: FAILURES.malformed.load(Ordering::Relaxed),
            unsupported_lengths: FAILURES.unsupported_length.load(Ordering::Relaxed),
            unknown_opcodes: FAILURES.unknown_opcode.load(Ordering::Relaxed),
            reassembly_failures: FAILURES.reassembly.load(Ordering::Relaxed),
            truncated_replies: FAILURES.truncated.load(Ordering::Relaxed),
            link_errors: FAILURES.link.load(Ordering::Relaxed),
            round_trip_total_ns: ROUND_TRIP_TOTAL_NS.load(Ordering::Relaxed),
            round_trip_max_ns: ROUND_TRIP_MAX_NS.load(Ordering::Relaxed),
        }
    }
}

fn update_max(target: &AtomicU64, candidate: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while candidate > current {
        match target.compare_exchange_weak(
            current,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(old) => current = old,
        }
    }
}

/// Process-wide counters since start-up.
#[allow(missing_docs)]
#[derive(Default, Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub requests_sent: u64,
    pub replies_decoded: u64,
    pub frames_ignored: u64,
    pub timeouts: u64,
    pub checksum_failures: u64,
    pub malformed_frames: u64,
    pub unsupported_lengths: u64,
    pub unknown_opcodes: u64,
    pub reassembly_failures: u64,
    pub truncated_replies: u64,
    pub link_errors: u64,
    pub round_trip_total_ns: u64,
    pub round_trip_max_ns: u64,
}

impl MetricsSnapshot {
    /// Average request-to-decoded-reply time in microseconds.
    #[must_use]
    pub fn avg_round_trip_us(&self) -> Option<u64> {
        average_microseconds(self.round_trip_total_ns, self.replies_decoded)
    }

    /// Sum of every failure counter.
    #[must_use]
    pub fn total_failures(&self) -> u64 {
        self.timeouts
            + self.checksum_failures
            + self.malformed_frames
            + self.unsupported_lengths
            + self.unknown_opcodes
            + self.reassembly_failures
            + self.truncated_replies
            + self.link_errors
    }
}

/// Read the current counters.
#[must_use]
pub fn snapshot() -> MetricsSnapshot {
    Metrics::totals()
}

fn average_microseconds(total_ns: u64, count: u64) -> Option<u64> {
    if count == 0 {
        return None;
    }

    let total_ns_u128 = u128::from(total_ns);
    Some((total_ns_u128 / (u128::from(count) * NANOSECONDS_PER_MICROSECOND)) as u64)
}
