//! Fault latch and machine state
//!
//! Every fault kind owns one bit of the fault word. Bits accumulate until
//! the faults are reset. Entering the fault state is idempotent.

use bitflags::bitflags;

use crate::config::FAULT_RESET_PULSE_TICKS;

/// Fault codes, values are part of the bus protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultCode {
    /// Invalid state
    State = 0,
    Overcurrent = 1,
    Overspeed = 2,
    Overtemperature = 3,
    /// DC bus over voltage
    Overvoltage = 4,
    /// Parameter checksum mismatch
    Checksum = 5,
    Watchdog = 6,
    GroundFault = 7,
    Encoder = 8,
    Resolver = 9,
    /// DC bus under voltage
    Undervoltage = 10,
    /// Gate driver under voltage lockout
    Uvlo = 11,
    /// Bus timeout
    CanBus = 12,
    /// DC bus voltage balance
    VoltageBalance = 13,
    /// Control loop overrun
    Overrun = 14,
    /// Speed error
    Speed = 15,
    /// Stall protection
    Stall = 16,
}

impl FaultCode {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::State,
            1 => Self::Overcurrent,
            2 => Self::Overspeed,
            3 => Self::Overtemperature,
            4 => Self::Overvoltage,
            5 => Self::Checksum,
            6 => Self::Watchdog,
            7 => Self::GroundFault,
            8 => Self::Encoder,
            9 => Self::Resolver,
            10 => Self::Undervoltage,
            11 => Self::Uvlo,
            12 => Self::CanBus,
            13 => Self::VoltageBalance,
            14 => Self::Overrun,
            15 => Self::Speed,
            16 => Self::Stall,
            _ => return None,
        })
    }

    /// Bit owned by this fault in the fault word
    pub const fn bit(self) -> FaultWord {
        FaultWord::from_bits_retain(1 << self as u32)
    }
}

bitflags! {
    /// Latched faults since the last reset
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultWord: u32 {
        const STATE = 1 << 0;
        const OVERCURRENT = 1 << 1;
        const OVERSPEED = 1 << 2;
        const OVERTEMPERATURE = 1 << 3;
        const OVERVOLTAGE = 1 << 4;
        const CHECKSUM = 1 << 5;
        const WATCHDOG = 1 << 6;
        const GROUND_FAULT = 1 << 7;
        const ENCODER = 1 << 8;
        const RESOLVER = 1 << 9;
        const UNDERVOLTAGE = 1 << 10;
        const UVLO = 1 << 11;
        const CAN_BUS = 1 << 12;
        const VOLTAGE_BALANCE = 1 << 13;
        const OVERRUN = 1 << 14;
        const SPEED = 1 << 15;
        const STALL = 1 << 16;
    }
}

/// Drive machine state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MachineState {
    /// Outputs off, ready to start
    #[default]
    Ready = 0,
    /// Modulating
    Running = 1,
    /// Outputs off until the faults are reset
    Fault = 2,
}

impl MachineState {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Ready),
            1 => Some(Self::Running),
            2 => Some(Self::Fault),
            _ => None,
        }
    }
}

/// PWM output stage as seen by the fault handling
pub trait PwmOutput {
    /// Turn all gate outputs off
    fn disable(&mut self);
}

/// Outcome of latching one fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latched {
    /// The bit was clear before this assertion
    pub first_occurrence: bool,
    /// The machine was not in the fault state before this assertion
    pub entered_fault: bool,
}

/// Fault word and machine state
#[derive(Debug, Clone, Copy)]
pub struct FaultManager {
    word: FaultWord,
    state: MachineState,
}

impl FaultManager {
    pub const fn new() -> Self {
        Self {
            word: FaultWord::empty(),
            state: MachineState::Ready,
        }
    }

    /// Set the bit for `code` and enter the fault state
    pub fn latch(&mut self, code: FaultCode) -> Latched {
        let first_occurrence = !self.word.contains(code.bit());
        self.word |= code.bit();

        let entered_fault = self.state != MachineState::Fault;
        self.state = MachineState::Fault;

        Latched {
            first_occurrence,
            entered_fault,
        }
    }

    /// Clear all bits, returns true when the machine left the fault state
    pub fn clear(&mut self) -> bool {
        self.word = FaultWord::empty();
        if self.state == MachineState::Fault {
            self.state = MachineState::Ready;
            true
        } else {
            false
        }
    }

    /// Ready → Running
    pub fn start(&mut self) -> bool {
        if self.state == MachineState::Ready {
            self.state = MachineState::Running;
            true
        } else {
            false
        }
    }

    /// Running → Ready
    pub fn stop(&mut self) -> bool {
        if self.state == MachineState::Running {
            self.state = MachineState::Ready;
            true
        } else {
            false
        }
    }

    pub fn word(&self) -> FaultWord {
        self.word
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn is_faulted(&self) -> bool {
        self.state == MachineState::Fault
    }

    pub fn is_latched(&self, code: FaultCode) -> bool {
        self.word.contains(code.bit())
    }
}

impl Default for FaultManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware fault-reset pulse, counted down by the control loop
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResetPulse {
    remaining: u16,
}

impl ResetPulse {
    pub const fn new(ticks: u16) -> Self {
        Self { remaining: ticks }
    }

    /// Pulse of the standard fault-reset length
    pub const fn fault_reset() -> Self {
        Self::new(FAULT_RESET_PULSE_TICKS)
    }

    pub const fn idle() -> Self {
        Self::new(0)
    }

    pub fn is_active(&self) -> bool {
        self.remaining > 0
    }

    pub fn remaining(&self) -> u16 {
        self.remaining
    }

    /// Advance one control tick
    ///
    /// Returns whether the reset line is held during this tick.
    pub fn tick(&mut self) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
            true
        } else {
            false
        }
    }
}
