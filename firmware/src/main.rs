#![no_std]
#![no_main]

// ログマクロを以降のモジュールで使うため最初に宣言
mod fmt;

mod clock;
mod config;
mod hardware;
mod motor_driver;
mod signals;
mod state;
mod tasks;
mod vf;
mod voltage_monitor;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use embassy_executor::Spawner;
use embassy_stm32::{
    adc::{Adc, AdcChannel, SampleTime},
    can,
    gpio::{Level, Output, OutputType, Speed},
    timer::{
        complementary_pwm::{ComplementaryPwm, ComplementaryPwmPin},
        low_level::CountingMode,
        simple_pwm::PwmPin,
    },
};
use embassy_time::{Duration, Timer};
use svm_diag::PersistAction;

use clock::TickClock;
use hardware::Irqs;
use motor_driver::MotorDriver;
use tasks::{can_task, control_task, led_task, voltage_monitor_task};

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // ハードウェア初期化
    let config = hardware::create_clock_config();
    let p = embassy_stm32::init(config);

    info!("═══════════════════════════════════════════════════════");
    info!("  SVM drive diagnostics • STM32G431VB @ 170MHz");
    info!("═══════════════════════════════════════════════════════");

    // PWM初期化（TIM1、3相相補PWM、センターアラインド）
    let mut uvw_pwm = ComplementaryPwm::new(
        p.TIM1,
        Some(PwmPin::new(p.PE9, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PE8, OutputType::PushPull)),
        Some(PwmPin::new(p.PE11, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PE10, OutputType::PushPull)),
        Some(PwmPin::new(p.PE13, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PE12, OutputType::PushPull)),
        None,
        None,
        config::pwm::FREQUENCY,
        CountingMode::CenterAlignedBothInterrupts,
    );
    uvw_pwm.set_dead_time(config::pwm::DEAD_TIME);
    let driver = MotorDriver::new(uvw_pwm);
    info!("PWM initialized: max duty={}", driver.max_duty());

    // 診断コンテキスト初期化（出力は停止状態、Readyで起動）
    {
        let mut controller = state::Controller::new(TickClock, driver);
        if let Err(e) = controller.datalog_mut().configure(&signals::default_log()) {
            error!("Default datalog configuration rejected: {:?}", e);
        }
        // パラメータ保存領域を持たないため、起動時は常にデフォルト値
        controller.log_persist(PersistAction::Default, true);

        let svm = controller.svm_config();
        info!(
            "SVM method={}, datalog {} channels",
            svm.method.id(),
            signals::DEFAULT_CHANNELS.len()
        );
        *state::CONTROLLER.lock().await = Some(controller);
    }

    // フォルトリセット出力（PB12、アクティブHigh）
    let reset_line = Output::new(p.PB12, Level::Low, Speed::Low);
    spawner.spawn(control_task(reset_line)).unwrap();

    // LED初期化＆タスク起動
    let led1 = Output::new(p.PC13, Level::High, Speed::Low);
    let led2 = Output::new(p.PC14, Level::High, Speed::Low);
    let led3 = Output::new(p.PC15, Level::High, Speed::Low);
    spawner.spawn(led_task(led1, led2, led3)).unwrap();

    // CAN初期化＆タスク起動
    let mut can_configurator = can::CanConfigurator::new(p.FDCAN1, p.PA11, p.PA12, Irqs);
    can_configurator.properties().set_standard_filter(
        can::filter::StandardFilterSlot::_0,
        can::filter::StandardFilter::accept_all_into_fifo0(),
    );
    can_configurator.set_bitrate(config::can::BITRATE);
    let can = can_configurator.start(can::OperatingMode::NormalOperationMode);
    spawner.spawn(can_task(can)).unwrap();

    // 電圧監視タスク起動（PC1 = ADC2_IN7）
    let mut adc2 = Adc::new(p.ADC2);
    adc2.set_sample_time(SampleTime::CYCLES640_5);
    let voltage_pin = p.PC1.degrade_adc();
    spawner
        .spawn(voltage_monitor_task(adc2, voltage_pin))
        .unwrap();
    info!("Voltage monitoring started on PC1 (ADC2_IN7)");

    loop {
        Timer::after(Duration::from_millis(1000)).await;
    }
}
