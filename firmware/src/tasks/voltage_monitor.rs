//! 電圧監視タスク
//!
//! DCバス電圧を監視し、過電圧/低電圧でフォルトをラッチします。

use embassy_stm32::{adc::Adc, peripherals};
use embassy_time::{Duration, Ticker};

use crate::config;
use crate::state::{BUS_VOLTAGE, CONTROLLER};
use crate::voltage_monitor::{VoltageMonitor, VoltageMonitorConfig};

/// 電圧監視タスク
///
/// しきい値外の間は毎周期フォルトを通知する（ラッチは冪等なのでイベントは1回のみ）。
#[embassy_executor::task]
pub async fn voltage_monitor_task(
    mut adc: Adc<'static, peripherals::ADC2>,
    mut voltage_pin: embassy_stm32::adc::AnyAdcChannel<peripherals::ADC2>,
) {
    info!("Voltage monitor task started");

    let mut monitor = VoltageMonitor::new(VoltageMonitorConfig::default());

    // 初回ADC読み取りでフィルタを初期化
    let initial_adc = adc.blocking_read(&mut voltage_pin);
    monitor.initialize_with_adc(initial_adc);
    info!(
        "Initial voltage: {}V (ADC raw: {}), OV={}V, UV={}V",
        monitor.voltage(),
        initial_adc,
        config::voltage::OVERVOLTAGE,
        config::voltage::UNDERVOLTAGE
    );

    let mut ticker = Ticker::every(Duration::from_millis(config::voltage::PERIOD_MS));

    loop {
        ticker.next().await;

        let adc_raw = adc.blocking_read(&mut voltage_pin);
        let fault = monitor.update(adc_raw);
        let voltage = monitor.voltage();

        *BUS_VOLTAGE.lock().await = voltage;

        if let Some(code) = fault {
            if let Some(ctrl) = CONTROLLER.lock().await.as_mut() {
                ctrl.assert_fault(code, voltage);
            }
        }
    }
}
