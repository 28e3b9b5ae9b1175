//! Drive controller context
//!
//! Owns all diagnostic state of one drive: the event log, the data logger,
//! the fault latch and the modulator configuration. The outer loop calls
//! [`DriveController::modulate`] and [`DriveController::update_diagnostics`]
//! once per control period. Commands and fault assertions may arrive at any
//! point of the period.

use libm::truncf;

use crate::can_protocol::Command;
use crate::config;
use crate::data_logger::{DataLogger, SignalSource};
use crate::event_log::{EventCode, EventLog, TimeSource};
use crate::fault::{FaultCode, FaultManager, FaultWord, MachineState, PwmOutput, ResetPulse};
use crate::svm::{
    ModulationResult, PhaseCurrents, SvmConfig, SvmMethod, SvmModulator, VoltageReference,
};

/// Runtime parameters that can be written through [`DriveController::set_parameter`]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parameter {
    /// Modulation method id (1, 2 or 3)
    SvmMethod = 1,
    /// Deadtime compensation in counts, zero or less disables it
    DeadtimeCompensation = 2,
    DatalogSkip = 3,
    /// Non-zero for single shot
    DatalogSingle = 4,
    /// Non-zero to freeze the record on fault
    DatalogAutoFreeze = 5,
}

impl Parameter {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::SvmMethod),
            2 => Some(Self::DeadtimeCompensation),
            3 => Some(Self::DatalogSkip),
            4 => Some(Self::DatalogSingle),
            5 => Some(Self::DatalogAutoFreeze),
            _ => None,
        }
    }
}

/// Parameter storage action, logged as the first event argument
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PersistAction {
    Load = 0,
    Save = 1,
    Default = 2,
}

/// Diagnostic context of one drive
///
/// * `S` - signal handle type of the data logger channels
/// * `E` - event log slots
/// * `L` - data log buffer size in floats
pub struct DriveController<S, T, P, const E: usize, const L: usize> {
    events: EventLog<E>,
    datalog: DataLogger<S, L>,
    faults: FaultManager,
    svm: SvmModulator,
    clock: T,
    pwm: P,
    speed_reference: f32,
}

impl<S, T, P, const E: usize, const L: usize> DriveController<S, T, P, E, L>
where
    S: Copy,
    T: TimeSource,
    P: PwmOutput,
{
    pub fn new(clock: T, pwm: P) -> Self {
        Self::with_datalog(clock, pwm, DataLogger::new())
    }

    /// Controller with a pre-built data logger (e.g. with a reserved tail)
    pub fn with_datalog(clock: T, pwm: P, datalog: DataLogger<S, L>) -> Self {
        let mut datalog = datalog;
        datalog.set_skip(config::datalog::DEFAULT_SKIP);
        datalog.set_single(config::datalog::DEFAULT_SINGLE);
        datalog.set_auto_freeze(config::datalog::DEFAULT_AUTO_FREEZE);

        Self {
            events: EventLog::new(),
            datalog,
            faults: FaultManager::new(),
            svm: SvmModulator::new(config::default_svm_config()),
            clock,
            pwm,
            speed_reference: 0.0,
        }
    }

    /// One modulation step with the configured strategy
    pub fn modulate(
        &self,
        reference: VoltageReference,
        period: f32,
        currents: PhaseCurrents,
    ) -> ModulationResult {
        self.svm.update(reference, period, currents)
    }

    /// Data logger tick, call once per control period after modulation
    pub fn update_diagnostics(&mut self, signals: &impl SignalSource<Signal = S>) {
        self.datalog.update(signals, &mut self.events, &self.clock);
    }

    /// Latch a fault and shut the outputs down
    ///
    /// The PWM is disabled before anything else, on every call.
    pub fn assert_fault(&mut self, code: FaultCode, aux: f32) {
        self.pwm.disable();

        let latched = self.faults.latch(code);
        if latched.first_occurrence {
            self.record(EventCode::Fault, code as i32, aux);
            warn!("Fault asserted: {:?} ({})", code, aux);
        }
        if latched.entered_fault {
            self.record(EventCode::StateChange, MachineState::Fault as i32, 0.0);
        }

        if self.datalog.auto_freeze() {
            self.datalog.freeze();
        }
        self.speed_reference = 0.0;
    }

    /// Assert a fault on command
    pub fn force_fault(&mut self, code: FaultCode, aux: f32) {
        self.record(EventCode::ForceFault, code as i32, aux);
        self.assert_fault(code, aux);
    }

    /// Clear all faults
    ///
    /// Returns the hardware reset pulse the outer loop has to drive.
    pub fn reset_faults(&mut self) -> ResetPulse {
        self.record(EventCode::Reset, 0, 0.0);
        if self.faults.clear() {
            self.record(EventCode::StateChange, MachineState::Ready as i32, 0.0);
        }
        info!("Faults reset");
        ResetPulse::fault_reset()
    }

    /// Ready → Running, refused while faulted
    pub fn start(&mut self) -> bool {
        if !self.faults.start() {
            return false;
        }
        self.record(EventCode::Start, 0, 0.0);
        self.record(EventCode::StateChange, MachineState::Running as i32, 0.0);
        info!("Drive started");
        true
    }

    /// Running → Ready
    pub fn stop(&mut self) -> bool {
        if !self.faults.stop() {
            return false;
        }
        self.pwm.disable();
        self.speed_reference = 0.0;
        self.record(EventCode::Stop, 0, 0.0);
        self.record(EventCode::StateChange, MachineState::Ready as i32, 0.0);
        info!("Drive stopped");
        true
    }

    /// Change the speed reference, logged only when the value changes
    pub fn set_speed_reference(&mut self, value: f32) {
        if value != self.speed_reference {
            self.speed_reference = value;
            self.record(EventCode::Setpoint, 0, value);
        }
    }

    /// Write a runtime parameter
    ///
    /// Returns false and logs nothing when the value is out of range.
    pub fn set_parameter(&mut self, parameter: Parameter, value: f32) -> bool {
        match parameter {
            Parameter::SvmMethod => {
                let Some(method) = svm_method_from_value(value) else {
                    error!("Unknown SVM method {}", value);
                    return false;
                };
                self.svm.set_method(method);
            }
            Parameter::DeadtimeCompensation => {
                self.svm
                    .set_deadtime_compensation((value > 0.0).then_some(value));
            }
            Parameter::DatalogSkip => {
                if !(value >= 0.0) {
                    return false;
                }
                self.datalog.set_skip(value as u32);
            }
            Parameter::DatalogSingle => self.datalog.set_single(value != 0.0),
            Parameter::DatalogAutoFreeze => self.datalog.set_auto_freeze(value != 0.0),
        }
        self.record(EventCode::ParameterSet, parameter as i32, value);
        true
    }

    /// Record a parameter storage action performed by the platform
    pub fn log_persist(&mut self, action: PersistAction, checksum_ok: bool) {
        self.record(
            EventCode::ParameterPersist,
            action as i32,
            if checksum_ok { 1.0 } else { 0.0 },
        );
    }

    pub fn report_bus_error(&mut self, error_count: u32) {
        self.record(EventCode::BusError, error_count as i32, 0.0);
    }

    /// Dispatch a command received over the bus
    ///
    /// Returns the reset pulse when the command reset the faults.
    pub fn handle_command(&mut self, command: Command) -> Option<ResetPulse> {
        match command {
            Command::Start => {
                if !self.start() {
                    warn!("Start refused in state {:?}", self.faults.state());
                }
            }
            Command::Stop => {
                self.stop();
            }
            Command::ResetFaults => return Some(self.reset_faults()),
            Command::ForceFault { code, aux } => self.force_fault(code, aux),
            Command::SetSpeed(speed) => self.set_speed_reference(speed),
            Command::SetDatalogTrigger { trigger, skip } => {
                self.datalog.set_skip(skip);
                self.datalog.set_trigger(trigger);
            }
            Command::SetDatalogMode {
                single,
                auto_freeze,
            } => {
                self.set_parameter(Parameter::DatalogSingle, single as u8 as f32);
                self.set_parameter(Parameter::DatalogAutoFreeze, auto_freeze as u8 as f32);
            }
            Command::SetSvm {
                method,
                deadtime_compensation,
            } => {
                self.set_parameter(Parameter::SvmMethod, method.id() as f32);
                self.set_parameter(
                    Parameter::DeadtimeCompensation,
                    deadtime_compensation.unwrap_or(0.0),
                );
            }
            // Served by the communications layer
            Command::DumpEvents => {}
        }
        None
    }

    fn record(&mut self, code: EventCode, arg1: i32, arg2: f32) {
        self.events.record(&self.clock, code, arg1, arg2);
    }

    pub fn events(&self) -> &EventLog<E> {
        &self.events
    }

    pub fn datalog(&self) -> &DataLogger<S, L> {
        &self.datalog
    }

    /// Data logger access for configuration
    pub fn datalog_mut(&mut self) -> &mut DataLogger<S, L> {
        &mut self.datalog
    }

    pub fn svm_config(&self) -> SvmConfig {
        self.svm.config()
    }

    pub fn fault_word(&self) -> FaultWord {
        self.faults.word()
    }

    pub fn state(&self) -> MachineState {
        self.faults.state()
    }

    pub fn is_running(&self) -> bool {
        self.faults.state() == MachineState::Running
    }

    pub fn speed_reference(&self) -> f32 {
        self.speed_reference
    }

    pub fn clock(&self) -> &T {
        &self.clock
    }

    pub fn pwm(&self) -> &P {
        &self.pwm
    }

    pub fn pwm_mut(&mut self) -> &mut P {
        &mut self.pwm
    }
}

fn svm_method_from_value(value: f32) -> Option<SvmMethod> {
    if !(1.0..=3.0).contains(&value) || value != truncf(value) {
        return None;
    }
    SvmMethod::from_id(value as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::{EventRecord, Timestamp};
    use core::cell::Cell;

    struct TickClock(Cell<u64>);

    impl TimeSource for TickClock {
        fn now(&self) -> Timestamp {
            let t = self.0.get();
            self.0.set(t + 1);
            Timestamp::from_ticks(t)
        }
    }

    #[derive(Default)]
    struct MockPwm {
        disable_calls: usize,
    }

    impl PwmOutput for MockPwm {
        fn disable(&mut self) {
            self.disable_calls += 1;
        }
    }

    struct Signals;

    impl SignalSource for Signals {
        type Signal = u8;

        fn read(&self, signal: u8) -> f32 {
            signal as f32
        }
    }

    type TestController = DriveController<u8, TickClock, MockPwm, 32, 64>;

    fn controller() -> TestController {
        DriveController::new(TickClock(Cell::new(0)), MockPwm::default())
    }

    fn codes(ctrl: &TestController) -> Vec<EventCode> {
        ctrl.events().iter().filter_map(|r| r.code).collect()
    }

    fn count(ctrl: &TestController, code: EventCode) -> usize {
        ctrl.events().iter().filter(|r| r.code == Some(code)).count()
    }

    #[test]
    fn test_defaults() {
        let ctrl = controller();
        assert_eq!(ctrl.state(), MachineState::Ready);
        assert_eq!(ctrl.fault_word(), FaultWord::empty());
        assert_eq!(ctrl.svm_config(), config::default_svm_config());
        assert_eq!(ctrl.datalog().skip(), config::datalog::DEFAULT_SKIP);
        assert!(ctrl.datalog().auto_freeze());
        assert!(ctrl.events().is_empty());
    }

    #[test]
    fn test_with_datalog_keeps_reserved_tail() {
        let datalog = DataLogger::<u8, 64>::with_reserved_tail(4).unwrap();
        let mut ctrl: TestController =
            DriveController::with_datalog(TickClock(Cell::new(0)), MockPwm::default(), datalog);
        assert_eq!(ctrl.datalog().capacity(), 60);
        assert_eq!(ctrl.datalog().skip(), config::datalog::DEFAULT_SKIP);
        assert_eq!(ctrl.datalog().auto_freeze(), config::datalog::DEFAULT_AUTO_FREEZE);
        assert_eq!(ctrl.state(), MachineState::Ready);

        ctrl.datalog_mut().set_channels(&[1, 2]).unwrap();
        ctrl.update_diagnostics(&Signals);
        assert_eq!(ctrl.datalog().record_length(), 30);
        assert_eq!(ctrl.datalog().channel(1).unwrap().len(), 30);
    }

    #[test]
    fn test_assert_fault_sequence() {
        let mut ctrl = controller();
        ctrl.start();
        ctrl.set_speed_reference(1200.0);
        ctrl.datalog_mut().set_trigger(1);

        ctrl.assert_fault(FaultCode::Overcurrent, 35.0);

        assert_eq!(ctrl.pwm().disable_calls, 1);
        assert_eq!(ctrl.state(), MachineState::Fault);
        assert_eq!(ctrl.fault_word(), FaultWord::OVERCURRENT);
        assert_eq!(ctrl.speed_reference(), 0.0);
        assert_eq!(ctrl.datalog().trigger(), 0);

        let tail: Vec<EventRecord> = ctrl.events().iter().rev().take(2).copied().collect();
        assert_eq!(tail[1].code, Some(EventCode::Fault));
        assert_eq!(tail[1].arg1, FaultCode::Overcurrent as i32);
        assert_eq!(tail[1].arg2, 35.0);
        assert_eq!(tail[0].code, Some(EventCode::StateChange));
        assert_eq!(tail[0].arg1, MachineState::Fault as i32);
    }

    #[test]
    fn test_fault_deduplication() {
        let mut ctrl = controller();
        ctrl.assert_fault(FaultCode::Overvoltage, 820.0);
        ctrl.assert_fault(FaultCode::Overvoltage, 830.0);

        assert_eq!(ctrl.pwm().disable_calls, 2);
        assert_eq!(count(&ctrl, EventCode::Fault), 1);
        assert_eq!(count(&ctrl, EventCode::StateChange), 1);

        ctrl.assert_fault(FaultCode::Stall, 0.0);
        assert_eq!(count(&ctrl, EventCode::Fault), 2);
        assert_eq!(count(&ctrl, EventCode::StateChange), 1);
        assert_eq!(ctrl.fault_word(), FaultWord::OVERVOLTAGE | FaultWord::STALL);
    }

    #[test]
    fn test_auto_freeze_disabled_keeps_recording() {
        let mut ctrl = controller();
        ctrl.datalog_mut().set_auto_freeze(false);
        ctrl.datalog_mut().set_trigger(1);
        ctrl.assert_fault(FaultCode::Overtemperature, 95.0);
        assert_eq!(ctrl.datalog().trigger(), 1);
    }

    #[test]
    fn test_reset_faults() {
        let mut ctrl = controller();
        ctrl.assert_fault(FaultCode::Watchdog, 0.0);
        let before = ctrl.events().len();

        let pulse = ctrl.reset_faults();
        assert_eq!(pulse.remaining(), config::FAULT_RESET_PULSE_TICKS);
        assert_eq!(ctrl.fault_word(), FaultWord::empty());
        assert_eq!(ctrl.state(), MachineState::Ready);

        let events = codes(&ctrl);
        assert_eq!(events.len(), before + 2);
        assert_eq!(
            events[before..],
            [EventCode::Reset, EventCode::StateChange]
        );
        assert_eq!(ctrl.events().latest().unwrap().arg1, MachineState::Ready as i32);
    }

    #[test]
    fn test_reset_without_fault_logs_only_reset() {
        let mut ctrl = controller();
        let pulse = ctrl.reset_faults();
        assert!(pulse.is_active());
        assert_eq!(codes(&ctrl), vec![EventCode::Reset]);
        assert_eq!(ctrl.state(), MachineState::Ready);
    }

    #[test]
    fn test_start_refused_while_faulted() {
        let mut ctrl = controller();
        ctrl.assert_fault(FaultCode::GroundFault, 0.0);
        let before = ctrl.events().len();
        assert!(!ctrl.start());
        assert_eq!(ctrl.events().len(), before);
        assert_eq!(ctrl.state(), MachineState::Fault);
    }

    #[test]
    fn test_start_stop() {
        let mut ctrl = controller();
        assert!(ctrl.start());
        assert!(ctrl.is_running());
        ctrl.set_speed_reference(500.0);
        assert!(ctrl.stop());
        assert_eq!(ctrl.speed_reference(), 0.0);
        assert_eq!(ctrl.pwm().disable_calls, 1);
        assert!(!ctrl.stop());
        assert_eq!(
            codes(&ctrl),
            vec![
                EventCode::Start,
                EventCode::StateChange,
                EventCode::Setpoint,
                EventCode::Stop,
                EventCode::StateChange,
            ]
        );
    }

    #[test]
    fn test_setpoint_logged_on_change_only() {
        let mut ctrl = controller();
        ctrl.set_speed_reference(1000.0);
        ctrl.set_speed_reference(1000.0);
        ctrl.set_speed_reference(0.0);
        assert_eq!(count(&ctrl, EventCode::Setpoint), 2);
        assert_eq!(ctrl.events().latest().unwrap().arg2, 0.0);
    }

    #[test]
    fn test_force_fault_logs_command_first() {
        let mut ctrl = controller();
        ctrl.force_fault(FaultCode::Speed, 12.5);
        assert_eq!(
            codes(&ctrl),
            vec![EventCode::ForceFault, EventCode::Fault, EventCode::StateChange]
        );
        assert!(ctrl.fault_word().contains(FaultWord::SPEED));
    }

    #[test]
    fn test_set_parameter() {
        let mut ctrl = controller();
        assert!(ctrl.set_parameter(Parameter::SvmMethod, 3.0));
        assert_eq!(ctrl.svm_config().method, SvmMethod::BusClampEven);
        assert!(ctrl.set_parameter(Parameter::DeadtimeCompensation, 8.0));
        assert_eq!(ctrl.svm_config().deadtime_compensation, Some(8.0));
        assert!(ctrl.set_parameter(Parameter::DeadtimeCompensation, 0.0));
        assert_eq!(ctrl.svm_config().deadtime_compensation, None);
        assert_eq!(count(&ctrl, EventCode::ParameterSet), 3);

        assert!(!ctrl.set_parameter(Parameter::SvmMethod, 7.0));
        assert!(!ctrl.set_parameter(Parameter::SvmMethod, 1.5));
        assert!(!ctrl.set_parameter(Parameter::SvmMethod, f32::NAN));
        assert!(!ctrl.set_parameter(Parameter::DatalogSkip, -1.0));
        assert_eq!(ctrl.svm_config().method, SvmMethod::BusClampEven);
        assert_eq!(count(&ctrl, EventCode::ParameterSet), 3);
    }

    #[test]
    fn test_persist_and_bus_error_events() {
        let mut ctrl = controller();
        ctrl.log_persist(PersistAction::Save, true);
        ctrl.report_bus_error(3);
        let records: Vec<&EventRecord> = ctrl.events().iter().collect();
        assert_eq!(records[0].code, Some(EventCode::ParameterPersist));
        assert_eq!(records[0].arg1, PersistAction::Save as i32);
        assert_eq!(records[0].arg2, 1.0);
        assert_eq!(records[1].code, Some(EventCode::BusError));
        assert_eq!(records[1].arg1, 3);
    }

    #[test]
    fn test_handle_command() {
        let mut ctrl = controller();
        assert_eq!(ctrl.handle_command(Command::Start), None);
        assert!(ctrl.is_running());

        ctrl.handle_command(Command::SetDatalogTrigger {
            trigger: -4,
            skip: 0,
        });
        assert_eq!(ctrl.datalog().trigger(), -4);
        assert_eq!(ctrl.datalog().skip(), 0);

        ctrl.handle_command(Command::ForceFault {
            code: FaultCode::Encoder,
            aux: 0.0,
        });
        assert_eq!(ctrl.state(), MachineState::Fault);

        let pulse = ctrl.handle_command(Command::ResetFaults);
        assert!(pulse.is_some_and(|p| p.is_active()));
        assert_eq!(ctrl.state(), MachineState::Ready);

        ctrl.handle_command(Command::SetSvm {
            method: SvmMethod::BusClampOdd,
            deadtime_compensation: Some(4.0),
        });
        assert_eq!(
            ctrl.svm_config(),
            SvmConfig {
                method: SvmMethod::BusClampOdd,
                deadtime_compensation: Some(4.0),
            }
        );
    }

    #[test]
    fn test_update_diagnostics_records_trigger_event() {
        let mut ctrl = controller();
        ctrl.datalog_mut().set_channels(&[1, 2]).unwrap();
        ctrl.datalog_mut().set_skip(0);
        // Layout tick, the trigger is armed afterwards
        ctrl.update_diagnostics(&Signals);
        ctrl.datalog_mut().set_trigger(1);
        ctrl.update_diagnostics(&Signals);
        ctrl.update_diagnostics(&Signals);

        assert_eq!(count(&ctrl, EventCode::DatalogTrigger), 1);
        assert_eq!(ctrl.datalog().write_index(), 2);
        assert_eq!(ctrl.datalog().channel(1).unwrap()[..2], [2.0, 2.0]);
    }

    #[test]
    fn test_modulate_uses_configured_method() {
        let mut ctrl = controller();
        let reference = VoltageReference::new(0.5, 0.0);
        let currents = PhaseCurrents::default();
        let symmetric = ctrl.modulate(reference, 1000.0, currents);
        assert_eq!(symmetric.on_a, 750.0);

        ctrl.set_parameter(Parameter::SvmMethod, 2.0);
        let clamped = ctrl.modulate(reference, 1000.0, currents);
        assert_eq!(clamped.on_a, 1000.0);
    }
}
