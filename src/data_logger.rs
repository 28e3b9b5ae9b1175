//! Real-time data logger
//!
//! Splits one fixed block of RAM into 1 to 8 channels. Each channel is bound
//! to a signal that is sampled once per serviced control tick.
//!
//! Trigger semantics:
//! - `0`: idle
//! - `> 0`: recording
//! - `< 0`: recording, incremented after every sample until it reaches zero
//!
//! `single` stops recording when the buffer fills, otherwise the buffer is
//! circular. `skip` records one sample every `skip + 1` ticks.
//!
//! Channel layout changes are deferred to the next [`DataLogger::update`] so
//! the buffer is never re-partitioned in the middle of a sample set. Applying
//! a layout stops recording; the trigger has to be set again afterwards.

use crate::event_log::{EventCode, EventLog, TimeSource};

/// Maximum number of channels
pub const MAX_CHANNELS: usize = 8;

/// Resolves channel handles to live signal values
pub trait SignalSource {
    type Signal: Copy;

    fn read(&self, signal: Self::Signal) -> f32;
}

/// Data logger configuration error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataLogError {
    /// At least one channel is required
    NoChannels,
    /// More channels than [`MAX_CHANNELS`] or than buffer elements
    TooManyChannels(usize),
    /// Reserved tail leaves no room for a full channel set
    ReservedTailTooLarge(usize),
}

/// Complete logger setup, applied as one reconfiguration
#[derive(Debug, Clone, Copy)]
pub struct DataLogConfig<'a, S> {
    pub channels: &'a [S],
    /// Stop when the buffer is full instead of wrapping
    pub single: bool,
    /// Ticks skipped between samples
    pub skip: u32,
    /// Freeze the record when a fault is asserted
    pub auto_freeze: bool,
}

/// Multi-channel triggered sampler over a buffer of `CAP` floats
pub struct DataLogger<S, const CAP: usize> {
    buffer: [f32; CAP],
    /// Elements at the end of the buffer that are never written
    reserved_tail: usize,

    /// Active layout
    signals: [Option<S>; MAX_CHANNELS],
    bases: [usize; MAX_CHANNELS],
    channel_count: usize,
    record_length: usize,

    /// Layout applied on the next tick
    requested: [Option<S>; MAX_CHANNELS],
    requested_count: usize,
    pending_reconfig: bool,

    trigger: i32,
    old_trigger: i32,
    single: bool,
    skip: u32,
    skip_counter: u32,
    write_index: usize,
    auto_freeze: bool,
}

impl<S: Copy, const CAP: usize> DataLogger<S, CAP> {
    /// Idle logger with one unbound channel spanning the whole buffer
    pub const fn new() -> Self {
        Self {
            buffer: [0.0; CAP],
            reserved_tail: 0,
            signals: [None; MAX_CHANNELS],
            bases: [0; MAX_CHANNELS],
            channel_count: 1,
            record_length: CAP,
            requested: [None; MAX_CHANNELS],
            requested_count: 1,
            pending_reconfig: false,
            trigger: 0,
            old_trigger: 0,
            single: false,
            skip: 0,
            skip_counter: 0,
            write_index: 0,
            auto_freeze: false,
        }
    }

    /// Logger that never touches the last `tail` elements of its buffer
    ///
    /// For targets where accesses at the very end of a memory block are
    /// unsafe.
    pub fn with_reserved_tail(tail: usize) -> Result<Self, DataLogError> {
        if tail > CAP || CAP - tail < MAX_CHANNELS {
            return Err(DataLogError::ReservedTailTooLarge(tail));
        }
        let mut logger = Self::new();
        logger.reserved_tail = tail;
        logger.record_length = CAP - tail;
        Ok(logger)
    }

    /// Buffer elements available to the channels
    pub fn capacity(&self) -> usize {
        CAP - self.reserved_tail
    }

    /// Apply a complete configuration
    ///
    /// The channel layout takes effect on the next tick, the other settings
    /// immediately.
    pub fn configure(&mut self, config: &DataLogConfig<'_, S>) -> Result<(), DataLogError> {
        self.set_channels(config.channels)?;
        self.single = config.single;
        self.skip = config.skip;
        self.auto_freeze = config.auto_freeze;
        Ok(())
    }

    /// Bind channels to signals, applied on the next tick
    pub fn set_channels(&mut self, channels: &[S]) -> Result<(), DataLogError> {
        if channels.is_empty() {
            return Err(DataLogError::NoChannels);
        }
        if channels.len() > MAX_CHANNELS || channels.len() > self.capacity() {
            return Err(DataLogError::TooManyChannels(channels.len()));
        }

        self.requested = [None; MAX_CHANNELS];
        for (slot, &signal) in self.requested.iter_mut().zip(channels) {
            *slot = Some(signal);
        }
        self.requested_count = channels.len();
        self.pending_reconfig = true;
        Ok(())
    }

    /// Re-partition the buffer on the next tick without changing bindings
    ///
    /// A layout already queued by [`DataLogger::set_channels`] is kept.
    pub fn request_reconfigure(&mut self) {
        if !self.pending_reconfig {
            self.requested = self.signals;
            self.requested_count = self.channel_count;
        }
        self.pending_reconfig = true;
    }

    /// Service one control tick
    ///
    /// Logs trigger changes, applies a pending layout, then records one
    /// sample set if triggered.
    pub fn update<T, const N: usize>(
        &mut self,
        signals: &impl SignalSource<Signal = S>,
        events: &mut EventLog<N>,
        clock: &T,
    ) where
        T: TimeSource,
    {
        if self.trigger != self.old_trigger {
            events.record(clock, EventCode::DatalogTrigger, self.trigger, self.skip as f32);
        }
        self.old_trigger = self.trigger;

        if self.pending_reconfig {
            self.apply_layout();
        }

        if self.trigger == 0 {
            return;
        }

        if self.skip_counter < self.skip {
            self.skip_counter += 1;
            return;
        }
        self.skip_counter = 0;

        for ch in 0..self.channel_count {
            if let Some(signal) = self.signals[ch] {
                self.buffer[self.bases[ch] + self.write_index] = signals.read(signal);
            }
        }

        self.write_index += 1;
        if self.write_index >= self.record_length {
            if self.single {
                self.trigger = 0;
            }
            self.write_index = 0;
        }

        if self.trigger < 0 {
            self.trigger += 1;
        }
    }

    fn apply_layout(&mut self) {
        self.signals = self.requested;
        self.channel_count = self.requested_count;
        self.record_length = self.capacity() / self.channel_count;
        for (ch, base) in self.bases.iter_mut().enumerate() {
            *base = if ch < self.channel_count {
                ch * self.record_length
            } else {
                0
            };
        }
        self.write_index = 0;
        self.skip_counter = 0;
        self.trigger = 0;
        self.pending_reconfig = false;

        debug!(
            "Datalog layout: {} channels x {} samples",
            self.channel_count, self.record_length
        );
    }

    pub fn set_trigger(&mut self, trigger: i32) {
        self.trigger = trigger;
    }

    /// Stop recording, keeping the current record
    pub fn freeze(&mut self) {
        self.trigger = 0;
    }

    pub fn set_single(&mut self, single: bool) {
        self.single = single;
    }

    pub fn set_skip(&mut self, skip: u32) {
        self.skip = skip;
    }

    pub fn set_auto_freeze(&mut self, enabled: bool) {
        self.auto_freeze = enabled;
    }

    pub fn trigger(&self) -> i32 {
        self.trigger
    }

    pub fn is_recording(&self) -> bool {
        self.trigger != 0
    }

    pub fn is_single(&self) -> bool {
        self.single
    }

    pub fn skip(&self) -> u32 {
        self.skip
    }

    pub fn auto_freeze(&self) -> bool {
        self.auto_freeze
    }

    pub fn is_reconfigure_pending(&self) -> bool {
        self.pending_reconfig
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Samples per channel in the active layout
    pub fn record_length(&self) -> usize {
        self.record_length
    }

    /// Next sample position within each channel record
    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Signal bound to a channel in the active layout
    pub fn signal(&self, ch: usize) -> Option<S> {
        self.signals.get(ch).copied().flatten()
    }

    /// Record of one channel in storage order
    ///
    /// When the buffer is circular the oldest sample is at [`Self::write_index`].
    pub fn channel(&self, ch: usize) -> Option<&[f32]> {
        if ch >= self.channel_count {
            return None;
        }
        let base = self.bases[ch];
        Some(&self.buffer[base..base + self.record_length])
    }
}

impl<S: Copy, const CAP: usize> Default for DataLogger<S, CAP> {
    fn default() -> Self {
        Self::new()
    }
}
