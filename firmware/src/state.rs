//! グローバル共有状態管理
//!
//! タスク間で共有される状態をMutexで保護して管理します。
//! ロックは1回の操作の間だけ保持すること（制御周期を塞がないため）。

use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::mutex::Mutex;
use svm_diag::config::{DATALOG_SIZE, EVENT_LOG_SIZE};
use svm_diag::{DriveController, ResetPulse};

use crate::clock::TickClock;
use crate::motor_driver::MotorDriver;
use crate::signals::Signal;

/// 診断コンテキスト（イベントログ、データログ、フォルト、SVM設定）
pub type Controller = DriveController<Signal, TickClock, MotorDriver, EVENT_LOG_SIZE, DATALOG_SIZE>;

/// 起動時にPWM初期化後に設定される
pub static CONTROLLER: Mutex<ThreadModeRawMutex, Option<Controller>> = Mutex::new(None);

/// フォルトリセットパルス要求（CANタスク → 制御タスク）
pub static RESET_REQUEST: embassy_sync::signal::Signal<ThreadModeRawMutex, ResetPulse> =
    embassy_sync::signal::Signal::new();

/// DCバス電圧 [V]（電圧監視タスクが更新、データログ用）
pub static BUS_VOLTAGE: Mutex<ThreadModeRawMutex, f32> = Mutex::new(0.0);
