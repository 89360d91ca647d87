// Traffic counters and packet tracing.
//
// `TrafficStats` counts bytes and packets per direction in one-second
// windows: `current` accumulates, and when a second has elapsed it becomes
// `last_second` and a fresh window starts. Rolling happens lazily on the
// next record or query, so an idle session does no work.
//
// Every message crossing the session boundary is also traced under the
// `netplay::packets` target, enabled with e.g.
// `RUST_LOG=netplay::packets=trace`.

use std::time::{Duration, Instant};

use serde::Serialize;
use skirmish_protocol::Message;
use tracing::trace;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PacketDirection {
    Sent,
    Received,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrafficCounters {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
}

#[derive(Clone, Debug)]
pub struct TrafficStats {
    current: TrafficCounters,
    last_second: TrafficCounters,
    total: TrafficCounters,
    window_start: Instant,
}

impl Default for TrafficStats {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficStats {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(now: Instant) -> Self {
        Self {
            current: TrafficCounters::default(),
            last_second: TrafficCounters::default(),
            total: TrafficCounters::default(),
            window_start: now,
        }
    }

    pub fn record(&mut self, direction: PacketDirection, bytes: usize) {
        self.record_at(Instant::now(), direction, bytes);
    }

    fn record_at(&mut self, now: Instant, direction: PacketDirection, bytes: usize) {
        self.roll(now);
        let bytes = bytes as u64;
        for counters in [&mut self.current, &mut self.total] {
            match direction {
                PacketDirection::Sent => {
                    counters.bytes_sent += bytes;
                    counters.packets_sent += 1;
                }
                PacketDirection::Received => {
                    counters.bytes_received += bytes;
                    counters.packets_received += 1;
                }
            }
        }
    }

    /// Counters for the most recently completed one-second window.
    pub fn last_second(&mut self) -> TrafficCounters {
        self.roll(Instant::now());
        self.last_second
    }

    /// Counters since the session started.
    pub fn total(&self) -> TrafficCounters {
        self.total
    }

    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < WINDOW {
            return;
        }
        // A gap of more than one window means the last full second was idle.
        self.last_second = if elapsed < WINDOW * 2 {
            self.current
        } else {
            TrafficCounters::default()
        };
        self.current = TrafficCounters::default();
        self.window_start = now;
    }
}

/// Trace one message under the packet target.
pub fn log_packet(direction: PacketDirection, message: &Message) {
    trace!(
        target: "netplay::packets",
        ?direction,
        kind = ?message.kind(),
        size = message.payload().len(),
        destination = message.destination_byte(),
        source = message.source(),
        "packet"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_within_window() {
        let t0 = Instant::now();
        let mut stats = TrafficStats::starting_at(t0);
        stats.record_at(t0, PacketDirection::Sent, 100);
        stats.record_at(t0 + Duration::from_millis(500), PacketDirection::Received, 40);
        assert_eq!(stats.current.bytes_sent, 100);
        assert_eq!(stats.current.packets_received, 1);
        assert_eq!(stats.last_second, TrafficCounters::default());
    }

    #[test]
    fn window_rolls_after_one_second() {
        let t0 = Instant::now();
        let mut stats = TrafficStats::starting_at(t0);
        stats.record_at(t0, PacketDirection::Sent, 10);
        stats.record_at(t0, PacketDirection::Sent, 20);
        stats.record_at(t0 + Duration::from_millis(1100), PacketDirection::Received, 5);

        assert_eq!(stats.last_second.bytes_sent, 30);
        assert_eq!(stats.last_second.packets_sent, 2);
        assert_eq!(stats.current.bytes_received, 5);
        assert_eq!(stats.total().bytes_sent, 30);
        assert_eq!(stats.total().bytes_received, 5);
    }

    #[test]
    fn idle_gap_clears_last_second() {
        let t0 = Instant::now();
        let mut stats = TrafficStats::starting_at(t0);
        stats.record_at(t0, PacketDirection::Sent, 10);
        stats.roll(t0 + Duration::from_secs(5));
        assert_eq!(stats.last_second, TrafficCounters::default());
        assert_eq!(stats.total().packets_sent, 1);
    }
}
