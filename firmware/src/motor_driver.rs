//! モータードライバー抽象化レイヤー
//!
//! TIM1の相補PWMを隠蔽し、SVMのオン時間をそのまま出力できる
//! インターフェースを提供します。フォルト処理からの出力停止は
//! [`PwmOutput`] 経由で行われます。

use embassy_stm32::{
    peripherals,
    timer::{complementary_pwm::ComplementaryPwm, Channel},
};
use svm_diag::{ModulationResult, PwmOutput};

/// 3相インバータ出力
pub struct MotorDriver {
    pwm: ComplementaryPwm<'static, peripherals::TIM1>,
    max_duty: u16,
    enabled: bool,
}

impl MotorDriver {
    /// 新しいモータードライバーを作成（出力は無効状態）
    ///
    /// # 引数
    /// * `pwm` - PWMペリフェラル（TIM1）
    pub fn new(pwm: ComplementaryPwm<'static, peripherals::TIM1>) -> Self {
        let max_duty = pwm.get_max_duty() as u16;
        let mut driver = Self {
            pwm,
            max_duty,
            enabled: true,
        };
        driver.stop();
        driver
    }

    /// PWMの最大Duty値（SVMの周期 [count]）
    pub fn max_duty(&self) -> u16 {
        self.max_duty
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 3相全てのDuty値を設定
    pub fn set_duty_uvw(&mut self, duty_u: u16, duty_v: u16, duty_w: u16) {
        self.pwm.set_duty(Channel::Ch1, duty_u.into());
        self.pwm.set_duty(Channel::Ch2, duty_v.into());
        self.pwm.set_duty(Channel::Ch3, duty_w.into());
    }

    /// SVMの結果を出力
    ///
    /// 無効状態では何もしない（フォルト後の再有効化は [`Self::enable`] のみ）。
    pub fn apply(&mut self, result: &ModulationResult) {
        if !self.enabled {
            return;
        }
        let (u, v, w) = result.duties(self.max_duty);
        self.set_duty_uvw(u, v, w);
    }

    /// 全チャネルを有効化
    pub fn enable(&mut self) {
        if self.enabled {
            return;
        }
        self.pwm.enable(Channel::Ch1);
        self.pwm.enable(Channel::Ch2);
        self.pwm.enable(Channel::Ch3);
        self.enabled = true;
    }

    /// 全チャネルのDuty値を0にして停止
    pub fn stop(&mut self) {
        self.set_duty_uvw(0, 0, 0);
        self.pwm.disable(Channel::Ch1);
        self.pwm.disable(Channel::Ch2);
        self.pwm.disable(Channel::Ch3);
        self.enabled = false;
    }
}

impl PwmOutput for MotorDriver {
    fn disable(&mut self) {
        self.stop();
    }
}
