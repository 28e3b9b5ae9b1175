//! 制御タスク
//!
//! 2.5kHzの固定周期で V/f 電圧指令 → SVM → PWM出力 → 診断更新 を実行します。
//! フォルトリセットパルスのカウントダウンもこのタスクが持ちます。

use embassy_stm32::gpio::Output;
use embassy_time::{Duration, Instant, Ticker};
use svm_diag::{FaultCode, PhaseCurrents, ResetPulse, VoltageReference};

use crate::config::{vf, CONTROL_PERIOD_US};
use crate::signals::ControlSignals;
use crate::state::{BUS_VOLTAGE, CONTROLLER, RESET_REQUEST};
use crate::vf::{advance_angle, inverse_clarke, inverse_park, modulation_index, ramp};

/// 制御タスク（2.5kHz）
///
/// # 引数
/// * `reset_line` - ゲートドライバのフォルトリセット出力（アクティブHigh）
#[embassy_executor::task]
pub async fn control_task(mut reset_line: Output<'static>) {
    info!("Control task started ({}us period)", CONTROL_PERIOD_US);

    let period = Duration::from_micros(CONTROL_PERIOD_US);
    let dt = CONTROL_PERIOD_US as f32 / 1_000_000.0;
    let max_delta_speed = vf::MAX_ACCELERATION_RPM_PER_S * dt;

    let mut ticker = Ticker::every(period);
    let mut pulse = ResetPulse::idle();
    let mut signals = ControlSignals::default();

    loop {
        ticker.next().await;
        let started = Instant::now();

        // 1. フォルトリセットパルス
        if let Some(request) = RESET_REQUEST.try_take() {
            pulse = request;
        }
        if pulse.tick() {
            reset_line.set_high();
        } else {
            reset_line.set_low();
        }

        signals.bus_voltage = *BUS_VOLTAGE.lock().await;

        let mut guard = CONTROLLER.lock().await;
        let Some(ctrl) = guard.as_mut() else {
            continue;
        };

        // 2. 電圧指令とSVM
        if ctrl.is_running() {
            signals.speed_reference = ctrl.speed_reference();
            signals.speed_ramped = ramp(signals.speed_ramped, signals.speed_reference, max_delta_speed);
            signals.electrical_angle = advance_angle(signals.electrical_angle, signals.speed_ramped, dt);
            signals.vd = 0.0;
            signals.vq = modulation_index(signals.speed_ramped);

            let (v_alpha, v_beta) = inverse_park(signals.vd, signals.vq, signals.electrical_angle);
            signals.v_alpha = v_alpha;
            signals.v_beta = v_beta;

            // 電流センサ未接続のため、デッドタイム補償の極性は相電圧指令の符号で代用
            let (a, b, c) = inverse_clarke(v_alpha, v_beta);
            let polarity = PhaseCurrents { a, b, c };

            let max_duty = ctrl.pwm().max_duty() as f32;
            let result = ctrl.modulate(VoltageReference::new(v_alpha, v_beta), max_duty, polarity);

            if !ctrl.pwm().is_enabled() {
                info!("PWM outputs enabled");
                ctrl.pwm_mut().enable();
            }
            ctrl.pwm_mut().apply(&result);

            signals.on_a = result.on_a;
            signals.on_b = result.on_b;
            signals.on_c = result.on_c;
            signals.sector = result.sector;
            signals.clip_coefficient = result.clip_coefficient;
        } else {
            let bus_voltage = signals.bus_voltage;
            signals = ControlSignals {
                bus_voltage,
                ..ControlSignals::default()
            };
        }

        // 3. 診断（トリガイベント、データログ）
        ctrl.update_diagnostics(&signals);

        // 4. 周期超過チェック
        let elapsed = started.elapsed();
        if elapsed > period {
            ctrl.assert_fault(FaultCode::Overrun, elapsed.as_micros() as f32);
        }
    }
}
