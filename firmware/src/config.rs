//! ハードウェアと制御ループの設定パラメータ
//!
//! 診断コアのデフォルト値は `svm_diag::config` を参照。

/// 制御周期 [μs]（2.5kHz = 400μs）
pub const CONTROL_PERIOD_US: u64 = 400;

/// モーターの極対数（ポール数12 / 2 = 6）
pub const POLE_PAIRS: u8 = 6;

/// V/f運転パラメータ（オープンループ）
pub mod vf {
    /// 定格回転数 [RPM]（この回転数で最大変調率）
    pub const RATED_SPEED_RPM: f32 = 3000.0;

    /// 最大変調率（六角形の内接円 = √3/2 以下で線形領域）
    pub const MAX_MODULATION: f32 = 0.85;

    /// 低速時のブースト変調率（静止摩擦を克服するため）
    pub const BOOST_MODULATION: f32 = 0.05;

    /// 速度指令の最大加速度 [RPM/s]
    pub const MAX_ACCELERATION_RPM_PER_S: f32 = 200.0;
}

/// PWM設定
pub mod pwm {
    use embassy_stm32::time::Hertz;

    /// PWM周波数（20kHz、センターアラインドで実効キャリア）
    pub const FREQUENCY: Hertz = Hertz(20_000);

    /// デッドタイム [タイマカウント]
    pub const DEAD_TIME: u16 = 85;
}

/// CAN設定
pub mod can {
    /// CANビットレート（250kbps）
    pub const BITRATE: u32 = 250_000;

    /// フォルトステータス送信周期 [ms]
    pub const STATUS_PERIOD_MS: u64 = 100;

    /// イベントダンプ時のフレーム間隔 [μs]（受信側のバッファ溢れ防止）
    pub const DUMP_FRAME_GAP_US: u64 = 500;

    /// ステータス周期ごとに送るイベントダンプのスロット数（64スロットで800ms）
    pub const DUMP_SLOTS_PER_TICK: usize = 8;
}

/// DCバス電圧監視設定
pub mod voltage {
    /// 過電圧しきい値 [V]
    pub const OVERVOLTAGE: f32 = 30.0;

    /// 低電圧しきい値 [V]
    pub const UNDERVOLTAGE: f32 = 10.0;

    /// 監視周期 [ms]
    pub const PERIOD_MS: u64 = 100;
}
