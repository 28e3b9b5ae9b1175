//! データログ用の信号テーブル
//!
//! 制御タスクが毎周期更新する値を型付きハンドル [`Signal`] で参照します。

use svm_diag::{DataLogConfig, SignalSource};

/// データログのチャネルに割り当て可能な信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Signal {
    /// 速度指令 [RPM]
    SpeedReference,
    /// 加速度制限後の速度 [RPM]
    SpeedRamped,
    /// 電気角 [rad]
    ElectricalAngle,
    /// d軸電圧指令（変調率）
    VoltageD,
    /// q軸電圧指令（変調率）
    VoltageQ,
    VoltageAlpha,
    VoltageBeta,
    /// U相オン時間 [count]
    OnTimeA,
    OnTimeB,
    OnTimeC,
    /// SVMのセクタ（1〜6）
    Sector,
    ClipCoefficient,
    /// DCバス電圧 [V]
    BusVoltage,
}

/// 1制御周期分の信号値
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlSignals {
    pub speed_reference: f32,
    pub speed_ramped: f32,
    pub electrical_angle: f32,
    pub vd: f32,
    pub vq: f32,
    pub v_alpha: f32,
    pub v_beta: f32,
    pub on_a: f32,
    pub on_b: f32,
    pub on_c: f32,
    pub sector: u8,
    pub clip_coefficient: f32,
    pub bus_voltage: f32,
}

impl SignalSource for ControlSignals {
    type Signal = Signal;

    fn read(&self, signal: Signal) -> f32 {
        match signal {
            Signal::SpeedReference => self.speed_reference,
            Signal::SpeedRamped => self.speed_ramped,
            Signal::ElectricalAngle => self.electrical_angle,
            Signal::VoltageD => self.vd,
            Signal::VoltageQ => self.vq,
            Signal::VoltageAlpha => self.v_alpha,
            Signal::VoltageBeta => self.v_beta,
            Signal::OnTimeA => self.on_a,
            Signal::OnTimeB => self.on_b,
            Signal::OnTimeC => self.on_c,
            Signal::Sector => self.sector as f32,
            Signal::ClipCoefficient => self.clip_coefficient,
            Signal::BusVoltage => self.bus_voltage,
        }
    }
}

/// 起動時のログ構成（速度と電圧指令、SVM出力）
pub const DEFAULT_CHANNELS: [Signal; 8] = [
    Signal::SpeedReference,
    Signal::SpeedRamped,
    Signal::VoltageD,
    Signal::VoltageQ,
    Signal::VoltageAlpha,
    Signal::VoltageBeta,
    Signal::OnTimeA,
    Signal::BusVoltage,
];

/// デフォルトのデータログ設定（循環バッファ、フォルトで凍結）
pub fn default_log() -> DataLogConfig<'static, Signal> {
    DataLogConfig {
        channels: &DEFAULT_CHANNELS,
        single: svm_diag::config::datalog::DEFAULT_SINGLE,
        skip: svm_diag::config::datalog::DEFAULT_SKIP,
        auto_freeze: svm_diag::config::datalog::DEFAULT_AUTO_FREEZE,
    }
}
