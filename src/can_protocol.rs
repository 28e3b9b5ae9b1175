// CAN protocol definitions for drive diagnostics

use embedded_can::Id;

use crate::event_log::{EventCode, EventRecord, Timestamp};
use crate::fault::{FaultCode, FaultWord, MachineState};
use crate::svm::SvmMethod;

/// CAN message IDs
pub mod can_ids {
    /// Speed command (f32 RPM, 4 bytes)
    pub const SPEED_CMD: u32 = 0x100;

    /// Start command (no data)
    pub const START_CMD: u32 = 0x180;

    /// Stop command (no data)
    pub const STOP_CMD: u32 = 0x181;

    /// Reset faults command (no data)
    pub const RESET_FAULTS: u32 = 0x182;

    /// Force fault (code: u8, aux: f32, 5 bytes)
    pub const FORCE_FAULT: u32 = 0x183;

    /// Datalog trigger (trigger: i32, skip: u32, 8 bytes)
    pub const DATALOG_TRIGGER: u32 = 0x190;

    /// Datalog mode (single: u8, auto_freeze: u8, 2 bytes)
    pub const DATALOG_MODE: u32 = 0x191;

    /// SVM strategy (method: u8, optional deadtime compensation f32, 1 or 5 bytes)
    pub const SVM_CONFIG: u32 = 0x192;

    /// Request a dump of the event log (no data)
    pub const EVENT_DUMP: u32 = 0x1A0;

    /// Event record, first half (time high: u32, time low: u32, 8 bytes)
    pub const EVENT_TIME: u32 = 0x280;

    /// Event record, second half (code: u8, slot: u8, arg1: i16, arg2: f32, 8 bytes)
    pub const EVENT_DATA: u32 = 0x281;

    /// Fault status feedback (fault word: u32, machine state: u8, 5 bytes)
    pub const FAULT_STATUS: u32 = 0x282;

    /// Emergency stop (any data length)
    pub const EMERGENCY_STOP: u32 = 0x000;
}

/// Command received over the bus
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Start,
    Stop,
    ResetFaults,
    ForceFault { code: FaultCode, aux: f32 },
    SetSpeed(f32),
    SetDatalogTrigger { trigger: i32, skip: u32 },
    SetDatalogMode { single: bool, auto_freeze: bool },
    SetSvm { method: SvmMethod, deadtime_compensation: Option<f32> },
    DumpEvents,
}

/// Parse a command frame
///
/// # Arguments
/// * `id` - Raw CAN identifier
/// * `data` - CAN frame data
///
/// # Returns
/// * `Some(Command)` for a known id with a valid payload
/// * `None` otherwise
pub fn parse_command(id: u32, data: &[u8]) -> Option<Command> {
    match id {
        can_ids::START_CMD => Some(Command::Start),
        can_ids::STOP_CMD => Some(Command::Stop),
        can_ids::RESET_FAULTS => Some(Command::ResetFaults),
        can_ids::EMERGENCY_STOP => Some(Command::ForceFault {
            code: FaultCode::State,
            aux: 0.0,
        }),
        can_ids::FORCE_FAULT => parse_force_fault(data),
        can_ids::SPEED_CMD => parse_speed_command(data).map(Command::SetSpeed),
        can_ids::DATALOG_TRIGGER => parse_datalog_trigger(data),
        can_ids::DATALOG_MODE => parse_datalog_mode(data),
        can_ids::SVM_CONFIG => parse_svm_config(data),
        can_ids::EVENT_DUMP => Some(Command::DumpEvents),
        _ => None,
    }
}

/// Parse a received frame by its identifier
///
/// Commands use standard ids only. Extended frames are ignored, otherwise
/// extended id 0 would read as an emergency stop.
pub fn parse_frame(id: Id, data: &[u8]) -> Option<Command> {
    match id {
        Id::Standard(std_id) => parse_command(std_id.as_raw() as u32, data),
        Id::Extended(_) => None,
    }
}

/// Parse speed command from CAN data
///
/// # Arguments
/// * `data` - CAN frame data (should be 4 bytes)
///
/// # Returns
/// * `Some(speed_rpm)` if parsing successful
/// * `None` if data length is incorrect
pub fn parse_speed_command(data: &[u8]) -> Option<f32> {
    if data.len() < 4 {
        error!("Speed command: invalid data length {}", data.len());
        return None;
    }

    let speed_rpm = f32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    info!("Speed command received: {} RPM", speed_rpm);
    Some(speed_rpm)
}

fn parse_force_fault(data: &[u8]) -> Option<Command> {
    if data.len() < 5 {
        error!("Force fault: invalid data length {}", data.len());
        return None;
    }

    let Some(code) = FaultCode::from_raw(data[0]) else {
        error!("Force fault: unknown fault code {}", data[0]);
        return None;
    };
    let aux = f32::from_le_bytes([data[1], data[2], data[3], data[4]]);
    Some(Command::ForceFault { code, aux })
}

fn parse_datalog_trigger(data: &[u8]) -> Option<Command> {
    if data.len() < 8 {
        error!("Datalog trigger: invalid data length {}", data.len());
        return None;
    }

    let trigger = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let skip = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    Some(Command::SetDatalogTrigger { trigger, skip })
}

fn parse_datalog_mode(data: &[u8]) -> Option<Command> {
    if data.len() < 2 {
        error!("Datalog mode: invalid data length {}", data.len());
        return None;
    }

    Some(Command::SetDatalogMode {
        single: data[0] != 0,
        auto_freeze: data[1] != 0,
    })
}

fn parse_svm_config(data: &[u8]) -> Option<Command> {
    if data.is_empty() {
        error!("SVM config: no data");
        return None;
    }

    let Some(method) = SvmMethod::from_id(data[0]) else {
        error!("SVM config: unknown method {}", data[0]);
        return None;
    };

    // 省略時または0以下はデッドタイム補償なし
    let deadtime_compensation = if data.len() >= 5 {
        let dtc = f32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        (dtc > 0.0).then_some(dtc)
    } else {
        None
    };

    Some(Command::SetSvm {
        method,
        deadtime_compensation,
    })
}

/// Encode one event log slot into two CAN frames
///
/// # Arguments
/// * `slot` - Slot index in the event log
/// * `record` - Event record
///
/// # Returns
/// `(time_frame, data_frame)` for `EVENT_TIME` and `EVENT_DATA`
pub fn encode_event_record(slot: u8, record: &EventRecord) -> ([u8; 8], [u8; 8]) {
    let mut time = [0u8; 8];
    time[0..4].copy_from_slice(&record.time.high.to_le_bytes());
    time[4..8].copy_from_slice(&record.time.low.to_le_bytes());

    // arg1 is a 16-bit integer on the wire
    let arg1 = record.arg1.clamp(i16::MIN as i32, i16::MAX as i32) as i16;

    let mut data = [0u8; 8];
    data[0] = record.raw_code();
    data[1] = slot;
    data[2..4].copy_from_slice(&arg1.to_le_bytes());
    data[4..8].copy_from_slice(&record.arg2.to_le_bytes());

    (time, data)
}

/// Decode an event record from its two CAN frames
///
/// # Returns
/// * `Some((slot, record))` if both frames are complete
/// * `None` if data length is incorrect or the code is unknown
pub fn decode_event_record(time: &[u8], data: &[u8]) -> Option<(u8, EventRecord)> {
    if time.len() < 8 || data.len() < 8 {
        return None;
    }

    let high = u32::from_le_bytes([time[0], time[1], time[2], time[3]]);
    let low = u32::from_le_bytes([time[4], time[5], time[6], time[7]]);

    let code = match data[0] {
        0 => None,
        raw => Some(EventCode::from_raw(raw)?),
    };
    let arg1 = i16::from_le_bytes([data[2], data[3]]) as i32;
    let arg2 = f32::from_le_bytes([data[4], data[5], data[6], data[7]]);

    Some((
        data[1],
        EventRecord {
            time: Timestamp::new(high, low),
            code,
            arg1,
            arg2,
        },
    ))
}

/// Encode fault status into CAN data
///
/// # Returns
/// 5-byte array: fault word (u32 LE), machine state (u8)
pub fn encode_fault_status(word: FaultWord, state: MachineState) -> [u8; 5] {
    let mut data = [0u8; 5];
    data[0..4].copy_from_slice(&word.bits().to_le_bytes());
    data[4] = state as u8;
    data
}

/// Decode fault status from CAN data
///
/// # Returns
/// * `Some((word, state))` if parsing successful
/// * `None` if data length is incorrect or the state is unknown
pub fn decode_fault_status(data: &[u8]) -> Option<(FaultWord, MachineState)> {
    if data.len() < 5 {
        return None;
    }

    let word = FaultWord::from_bits_retain(u32::from_le_bytes([data[0], data[1], data[2], data[3]]));
    let state = MachineState::from_raw(data[4])?;
    Some((word, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_speed_command() {
        let speed = 1234.5f32;
        let data = speed.to_le_bytes();
        assert_eq!(
            parse_command(can_ids::SPEED_CMD, &data),
            Some(Command::SetSpeed(speed))
        );
        assert_eq!(parse_command(can_ids::SPEED_CMD, &data[..3]), None);
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command(can_ids::START_CMD, &[]), Some(Command::Start));
        assert_eq!(parse_command(can_ids::STOP_CMD, &[]), Some(Command::Stop));
        assert_eq!(
            parse_command(can_ids::RESET_FAULTS, &[]),
            Some(Command::ResetFaults)
        );
        assert_eq!(parse_command(can_ids::EVENT_DUMP, &[]), Some(Command::DumpEvents));
        assert_eq!(parse_command(0x7FF, &[1, 2, 3]), None);
    }

    #[test]
    fn test_parse_frame_ignores_extended_ids() {
        use embedded_can::{ExtendedId, StandardId};

        let std_stop = Id::Standard(StandardId::new(can_ids::EMERGENCY_STOP as u16).unwrap());
        assert_eq!(
            parse_frame(std_stop, &[]),
            Some(Command::ForceFault {
                code: FaultCode::State,
                aux: 0.0
            })
        );

        let speed = 1500.0f32.to_le_bytes();
        let std_speed = Id::Standard(StandardId::new(can_ids::SPEED_CMD as u16).unwrap());
        assert_eq!(parse_frame(std_speed, &speed), Some(Command::SetSpeed(1500.0)));

        for raw in [can_ids::EMERGENCY_STOP, can_ids::SPEED_CMD, can_ids::START_CMD] {
            let ext = Id::Extended(ExtendedId::new(raw).unwrap());
            assert_eq!(parse_frame(ext, &speed), None);
        }
    }

    #[test]
    fn test_parse_force_fault() {
        let mut data = [0u8; 5];
        data[0] = FaultCode::Overtemperature as u8;
        data[1..5].copy_from_slice(&85.5f32.to_le_bytes());
        assert_eq!(
            parse_command(can_ids::FORCE_FAULT, &data),
            Some(Command::ForceFault {
                code: FaultCode::Overtemperature,
                aux: 85.5
            })
        );

        data[0] = 17;
        assert_eq!(parse_command(can_ids::FORCE_FAULT, &data), None);
    }

    #[test]
    fn test_parse_datalog_commands() {
        let mut data = [0u8; 8];
        data[0..4].copy_from_slice(&(-500i32).to_le_bytes());
        data[4..8].copy_from_slice(&4u32.to_le_bytes());
        assert_eq!(
            parse_command(can_ids::DATALOG_TRIGGER, &data),
            Some(Command::SetDatalogTrigger {
                trigger: -500,
                skip: 4
            })
        );

        assert_eq!(
            parse_command(can_ids::DATALOG_MODE, &[1, 0]),
            Some(Command::SetDatalogMode {
                single: true,
                auto_freeze: false
            })
        );
        assert_eq!(parse_command(can_ids::DATALOG_MODE, &[1]), None);
    }

    #[test]
    fn test_parse_svm_config() {
        assert_eq!(
            parse_command(can_ids::SVM_CONFIG, &[2]),
            Some(Command::SetSvm {
                method: SvmMethod::BusClampOdd,
                deadtime_compensation: None
            })
        );

        let mut data = [0u8; 5];
        data[0] = 1;
        data[1..5].copy_from_slice(&12.0f32.to_le_bytes());
        assert_eq!(
            parse_command(can_ids::SVM_CONFIG, &data),
            Some(Command::SetSvm {
                method: SvmMethod::Symmetric,
                deadtime_compensation: Some(12.0)
            })
        );

        assert_eq!(parse_command(can_ids::SVM_CONFIG, &[9]), None);
        assert_eq!(parse_command(can_ids::SVM_CONFIG, &[]), None);
    }

    #[test]
    fn test_encode_decode_event_record() {
        let record = EventRecord {
            time: Timestamp::new(0x0102_0304, 0xA0B0_C0D0),
            code: Some(EventCode::Fault),
            arg1: FaultCode::Overcurrent as i32,
            arg2: 42.25,
        };

        let (time, data) = encode_event_record(5, &record);
        assert_eq!(time[0..4], [0x04, 0x03, 0x02, 0x01]);
        assert_eq!(data[0], EventCode::Fault as u8);
        assert_eq!(data[1], 5);

        let (slot, decoded) = decode_event_record(&time, &data).unwrap();
        assert_eq!(slot, 5);
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_encode_event_record_saturates_arg1() {
        let record = EventRecord {
            arg1: 100_000,
            code: Some(EventCode::ParameterSet),
            ..EventRecord::EMPTY
        };
        let (_, data) = encode_event_record(0, &record);
        assert_eq!(i16::from_le_bytes([data[2], data[3]]), i16::MAX);
    }

    #[test]
    fn test_empty_slot_round_trips_as_code_zero() {
        let (time, data) = encode_event_record(3, &EventRecord::EMPTY);
        assert_eq!(data[0], 0);
        let (_, decoded) = decode_event_record(&time, &data).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_encode_decode_fault_status() {
        let word = FaultWord::OVERCURRENT | FaultWord::STALL;
        let data = encode_fault_status(word, MachineState::Fault);
        assert_eq!(data[4], 2);
        assert_eq!(
            decode_fault_status(&data),
            Some((word, MachineState::Fault))
        );
        assert_eq!(decode_fault_status(&data[..4]), None);
    }
}
