//! Panel event history.
//!
//! Transitions, bypass changes, interrupt dispatches, sequence failures and
//! monitor outcomes are stored in a fixed-size ring so the platform can dump recent history after a
//! field failure without any allocation.

use core::time::Duration;

use heapless::HistoryBuf;

use crate::bypass::BypassReason;
use crate::error::PanelError;
use crate::monitor::MonitorKind;
use crate::pins::PinId;
use crate::state::{ActiveState, Connection};

/// Unique identifier assigned to each telemetry record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Event kinds captured by the recorder.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PanelEvent {
    StateChanged {
        from: ActiveState,
        to: ActiveState,
    },
    BypassSet(BypassReason),
    BypassCleared,
    ConnectorChanged(Connection),
    IrqDispatched(PinId),
    SleepOutRetry {
        attempt: u8,
        budget: u8,
    },
    FrameTimingIgnored,
    SequenceFailed {
        sequence: &'static str,
        error: PanelError,
    },
    MonitorFinished {
        monitor: MonitorKind,
        result: Result<(), PanelError>,
    },
}

/// Record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp: Duration,
    pub event: PanelEvent,
    /// Time since the previous state change, for state-change records.
    pub elapsed_since_previous: Option<Duration>,
}

/// Records panel events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord, CAPACITY>,
    last_transition_at: Option<Duration>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_transition_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Number of retained records whose event satisfies `predicate`.
    pub fn count(&self, predicate: impl Fn(&PanelEvent) -> bool) -> usize {
        self.ring
            .oldest_ordered()
            .filter(|record| predicate(&record.event))
            .count()
    }

    /// Records a state change and the time spent in the previous state.
    pub fn record_transition(
        &mut self,
        from: ActiveState,
        to: ActiveState,
        timestamp: Duration,
    ) -> EventId {
        let elapsed = self
            .last_transition_at
            .map(|previous| timestamp.saturating_sub(previous));
        self.last_transition_at = Some(timestamp);
        self.push(PanelEvent::StateChanged { from, to }, timestamp, elapsed)
    }

    /// Records an arbitrary event.
    pub fn record(&mut self, event: PanelEvent, timestamp: Duration) -> EventId {
        self.push(event, timestamp, None)
    }

    fn push(
        &mut self,
        event: PanelEvent,
        timestamp: Duration,
        elapsed_since_previous: Option<Duration>,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            elapsed_since_previous,
        });

        id
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
