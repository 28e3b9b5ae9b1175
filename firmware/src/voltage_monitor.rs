//! DCバス電圧監視
//!
//! M1_BUS_VOLTAGE (PC1ピン) の分圧値からDCバス電圧を求め、
//! 過電圧/低電圧をフォルトコードとして報告します。

use svm_diag::FaultCode;

/// 電圧監視パラメータ
pub struct VoltageMonitorConfig {
    /// 分圧抵抗の上側 [Ω]
    pub r_upper: f32,
    /// 分圧抵抗の下側 [Ω]
    pub r_lower: f32,
    /// ADC分解能（12ビット = 4096）
    pub adc_max: u16,
    /// ADC基準電圧 [V]
    pub vref: f32,
    /// ローパスフィルタ係数（0.0-1.0、大きいほど応答速度が速い）
    pub filter_alpha: f32,
    /// 過電圧しきい値 [V]
    pub overvoltage_threshold: f32,
    /// 低電圧しきい値 [V]
    pub undervoltage_threshold: f32,
}

impl Default for VoltageMonitorConfig {
    fn default() -> Self {
        // 分圧回路: 33.3kΩ + 3.3kΩ（V_bus = V_adc * 11.09、最大入力 ≈ 36.6V）
        Self {
            r_upper: 33_300.0,
            r_lower: 3_300.0,
            adc_max: 4096,
            vref: 3.3,
            filter_alpha: 0.1,
            overvoltage_threshold: crate::config::voltage::OVERVOLTAGE,
            undervoltage_threshold: crate::config::voltage::UNDERVOLTAGE,
        }
    }
}

/// 電圧監視コントローラ
pub struct VoltageMonitor {
    config: VoltageMonitorConfig,
    /// フィルタ済み電圧 [V]
    voltage: f32,
    /// 前回の判定結果（エッジ検出用）
    last_fault: Option<FaultCode>,
}

impl VoltageMonitor {
    pub fn new(config: VoltageMonitorConfig) -> Self {
        Self {
            config,
            voltage: 0.0,
            last_fault: None,
        }
    }

    /// ADC生値から実電圧を計算
    fn adc_to_voltage(&self, adc_raw: u16) -> f32 {
        let v_adc = (adc_raw as f32 / self.config.adc_max as f32) * self.config.vref;
        let divider_ratio = (self.config.r_upper + self.config.r_lower) / self.config.r_lower;
        v_adc * divider_ratio
    }

    /// フィルタを初期電圧で初期化（起動時の誤検出防止用）
    pub fn initialize_with_adc(&mut self, adc_raw: u16) {
        self.voltage = self.adc_to_voltage(adc_raw);
    }

    /// 電圧を更新して判定
    ///
    /// # 戻り値
    /// しきい値外の間は対応するフォルトコード
    pub fn update(&mut self, adc_raw: u16) -> Option<FaultCode> {
        let voltage_raw = self.adc_to_voltage(adc_raw);
        self.voltage = self.config.filter_alpha * voltage_raw
            + (1.0 - self.config.filter_alpha) * self.voltage;

        let fault = if self.voltage > self.config.overvoltage_threshold {
            Some(FaultCode::Overvoltage)
        } else if self.voltage < self.config.undervoltage_threshold {
            Some(FaultCode::Undervoltage)
        } else {
            None
        };

        // 状態が変わったときだけログ
        if fault != self.last_fault {
            match fault {
                Some(code) => error!("Bus voltage out of range: {}V ({:?})", self.voltage, code),
                None => info!("Bus voltage back in range: {}V", self.voltage),
            }
            self.last_fault = fault;
        }

        fault
    }

    /// 現在の電圧を取得 [V]
    pub fn voltage(&self) -> f32 {
        self.voltage
    }
}
