//! LED表示タスク
//!
//! マシン状態を3つのLEDで表示します。
//! LED1: Ready（点滅）、LED2: Running（点灯）、LED3: Fault（高速点滅）

use embassy_stm32::gpio::Output;
use embassy_time::{Duration, Timer};
use svm_diag::MachineState;

use crate::state::CONTROLLER;

/// LED表示タスク（100ms周期）
#[embassy_executor::task]
pub async fn led_task(
    mut led1: Output<'static>,
    mut led2: Output<'static>,
    mut led3: Output<'static>,
) {
    info!("LED task started");

    let mut tick: u32 = 0;

    loop {
        let state = CONTROLLER
            .lock()
            .await
            .as_ref()
            .map_or(MachineState::Ready, |ctrl| ctrl.state());

        // LEDはアクティブLow
        let slow = (tick / 5) % 2 == 0;
        let fast = tick % 2 == 0;
        led1.set_level((!(state == MachineState::Ready && slow)).into());
        led2.set_level((state != MachineState::Running).into());
        led3.set_level((!(state == MachineState::Fault && fast)).into());

        tick = tick.wrapping_add(1);
        Timer::after(Duration::from_millis(100)).await;
    }
}
