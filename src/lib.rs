//! SVM modulator and diagnostics core for motor drives
//!
//! Hardware independent part of the drive firmware. Everything here runs
//! inside the fixed-period control task and uses only fixed, pre-allocated
//! memory.
//!
//! - [`svm`] - space vector modulation
//! - [`event_log`] - timestamped event ring
//! - [`data_logger`] - triggered multi-channel sampler
//! - [`fault`] - fault latch and machine state
//! - [`controller`] - owned context tying the above together
//! - [`can_protocol`] - wire codes and frame encodings

#![cfg_attr(not(test), no_std)]

// Must stay first so the logging macros are in scope for every module
mod fmt;

pub mod can_protocol;
pub mod config;
pub mod controller;
pub mod data_logger;
pub mod event_log;
pub mod fault;
pub mod svm;

pub use controller::{DriveController, Parameter, PersistAction};
pub use data_logger::{DataLogConfig, DataLogError, DataLogger, SignalSource};
pub use event_log::{EventCode, EventLog, EventRecord, TimeSource, Timestamp};
pub use fault::{FaultCode, FaultWord, MachineState, PwmOutput, ResetPulse};
pub use svm::{ModulationResult, PhaseCurrents, SvmConfig, SvmMethod, SvmModulator, VoltageReference};
