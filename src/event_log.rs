//! Event log
//!
//! Fixed-capacity ring of timestamped events held in RAM. Recording never
//! blocks and never fails: once the ring is full the oldest entry is
//! overwritten. The communications layer reads the slots directly.

/// Two-word free-running timestamp from the platform clock.
///
/// Treated as an opaque stamp, the log never does arithmetic on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timestamp {
    pub high: u32,
    pub low: u32,
}

impl Timestamp {
    pub const ZERO: Self = Self { high: 0, low: 0 };

    pub const fn new(high: u32, low: u32) -> Self {
        Self { high, low }
    }

    /// Split a 64-bit tick counter into high and low words
    pub const fn from_ticks(ticks: u64) -> Self {
        Self {
            high: (ticks >> 32) as u32,
            low: ticks as u32,
        }
    }
}

/// Source of timestamps for event records
pub trait TimeSource {
    fn now(&self) -> Timestamp;
}

/// Event codes, values are part of the bus protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventCode {
    /// Start command
    Start = 1,
    /// Stop command
    Stop = 2,
    /// Reset faults
    Reset = 3,
    /// Forced fault command
    ForceFault = 4,
    /// Machine state changed
    StateChange = 5,
    /// Parameter written
    ParameterSet = 6,
    /// Fault latched
    Fault = 7,
    /// Data log trigger changed
    DatalogTrigger = 8,
    /// Speed setpoint changed
    Setpoint = 9,
    /// Parameters loaded, saved or defaulted
    ParameterPersist = 10,
    /// Bus error
    BusError = 11,
}

impl EventCode {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Start),
            2 => Some(Self::Stop),
            3 => Some(Self::Reset),
            4 => Some(Self::ForceFault),
            5 => Some(Self::StateChange),
            6 => Some(Self::ParameterSet),
            7 => Some(Self::Fault),
            8 => Some(Self::DatalogTrigger),
            9 => Some(Self::Setpoint),
            10 => Some(Self::ParameterPersist),
            11 => Some(Self::BusError),
            _ => None,
        }
    }
}

/// One slot of the event log
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventRecord {
    pub time: Timestamp,
    /// `None` for a cleared slot
    pub code: Option<EventCode>,
    pub arg1: i32,
    pub arg2: f32,
}

impl EventRecord {
    pub const EMPTY: Self = Self {
        time: Timestamp::ZERO,
        code: None,
        arg1: 0,
        arg2: 0.0,
    };

    /// Code as sent on the bus, 0 for a cleared slot
    pub fn raw_code(&self) -> u8 {
        self.code.map_or(0, |code| code as u8)
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_none()
    }
}

/// Circular event log with `N` slots
pub struct EventLog<const N: usize> {
    records: [EventRecord; N],
    index: usize,
}

impl<const N: usize> EventLog<N> {
    pub const fn new() -> Self {
        Self {
            records: [EventRecord::EMPTY; N],
            index: 0,
        }
    }

    /// Clear every slot and rewind the write index
    pub fn init(&mut self) {
        self.records = [EventRecord::EMPTY; N];
        self.index = 0;
    }

    /// Append an event stamped with the current time
    pub fn record<T: TimeSource>(&mut self, clock: &T, code: EventCode, arg1: i32, arg2: f32) {
        self.record_at(clock.now(), code, arg1, arg2);
    }

    /// Append an event with an explicit timestamp
    pub fn record_at(&mut self, time: Timestamp, code: EventCode, arg1: i32, arg2: f32) {
        self.records[self.index] = EventRecord {
            time,
            code: Some(code),
            arg1,
            arg2,
        };
        self.index += 1;
        if self.index == N {
            self.index = 0;
        }
    }

    /// Slot that the next event will be written to
    pub fn index(&self) -> usize {
        self.index
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Raw slots in storage order
    pub fn records(&self) -> &[EventRecord; N] {
        &self.records
    }

    pub fn get(&self, slot: usize) -> Option<&EventRecord> {
        self.records.get(slot)
    }

    /// Most recently written record
    pub fn latest(&self) -> Option<&EventRecord> {
        let slot = if self.index == 0 { N - 1 } else { self.index - 1 };
        self.records.get(slot).filter(|r| !r.is_empty())
    }

    /// Recorded events from oldest to newest, cleared slots skipped
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &EventRecord> + '_ {
        let (newer, older) = self.records.split_at(self.index);
        older.iter().chain(newer.iter()).filter(|r| !r.is_empty())
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.records.iter().filter(|r| !r.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const N: usize> Default for EventLog<N> {
    fn default() -> Self {
        Self::new()
    }
}
