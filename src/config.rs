//! 診断コアの設定パラメータ（デフォルト値）

use crate::svm::{SvmConfig, SvmMethod};

/// イベントログのスロット数
pub const EVENT_LOG_SIZE: usize = 64;

/// データログのバッファサイズ [float]（全チャネル共有）
pub const DATALOG_SIZE: usize = 2048;

/// フォルトリセット出力パルス幅 [制御周期]
pub const FAULT_RESET_PULSE_TICKS: u16 = 20;

/// SVM設定
pub mod svm {
    use super::SvmMethod;

    /// 変調方式（デフォルト: 対称SVM）
    pub const DEFAULT_METHOD: SvmMethod = SvmMethod::Symmetric;

    /// デッドタイム補償 [count]（デフォルト: 無効）
    pub const DEFAULT_DEADTIME_COMPENSATION: Option<f32> = None;
}

/// データログ設定
pub mod datalog {
    /// サンプル間引き数（21周期に1回記録）
    pub const DEFAULT_SKIP: u32 = 20;

    /// シングルショット（falseで循環バッファ）
    pub const DEFAULT_SINGLE: bool = false;

    /// フォルト発生時に記録を停止してフォルト前のデータを保持
    pub const DEFAULT_AUTO_FREEZE: bool = true;

    /// バッファ末尾の未使用領域 [float]
    /// ブロック末尾へのアクセスに問題があるターゲットでのみ0以外を設定
    pub const DEFAULT_RESERVED_TAIL: usize = 0;
}

/// デフォルトのSVM設定
pub const fn default_svm_config() -> SvmConfig {
    SvmConfig {
        method: svm::DEFAULT_METHOD,
        deadtime_compensation: svm::DEFAULT_DEADTIME_COMPENSATION,
    }
}
