//! イベントログ用タイムスタンプ

use embassy_time::Instant;
use svm_diag::{TimeSource, Timestamp};

/// embassy-timeのティックカウンタ（64bit）を上位/下位ワードに分割して返す
#[derive(Clone, Copy, Default)]
pub struct TickClock;

impl TimeSource for TickClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_ticks(Instant::now().as_ticks())
    }
}
