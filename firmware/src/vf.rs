// Open-loop V/f reference generation
// Produces the alpha-beta voltage reference fed to the SVM modulator

use core::f32::consts::{PI, TAU};

use crate::config::{vf, POLE_PAIRS};

/// Inverse Park transformation (dq → αβ)
///
/// Uses idsp::cossin() for fast trigonometric calculation (~40 cycles on Cortex-M).
///
/// # Arguments
/// * `vd` - d-axis voltage
/// * `vq` - q-axis voltage
/// * `theta` - Electrical angle in radians, [0, 2π)
pub fn inverse_park(vd: f32, vq: f32, theta: f32) -> (f32, f32) {
    // idsp phase: i32 full scale maps to [-π, π)
    let normalized_theta = if theta > PI { theta - TAU } else { theta };
    const SCALE: f32 = 2147483648.0 / PI;
    let phase: i32 = (normalized_theta * SCALE) as i32;

    let (cos_i32, sin_i32) = idsp::cossin(phase);

    const I32_TO_F32: f32 = 1.0 / 2147483648.0;
    let cos_theta = cos_i32 as f32 * I32_TO_F32;
    let sin_theta = sin_i32 as f32 * I32_TO_F32;

    (
        vd * cos_theta - vq * sin_theta,
        vd * sin_theta + vq * cos_theta,
    )
}

/// Inverse Clarke transformation (αβ → abc)
pub fn inverse_clarke(v_alpha: f32, v_beta: f32) -> (f32, f32, f32) {
    const SQRT3_2: f32 = 0.866_025_4;
    let a = v_alpha;
    let b = -0.5 * v_alpha + SQRT3_2 * v_beta;
    let c = -0.5 * v_alpha - SQRT3_2 * v_beta;
    (a, b, c)
}

/// Move `current` toward `target` by at most `max_delta`
pub fn ramp(current: f32, target: f32, max_delta: f32) -> f32 {
    let error = target - current;
    if error > max_delta {
        current + max_delta
    } else if error < -max_delta {
        current - max_delta
    } else {
        target
    }
}

/// Advance the electrical angle by one control period, wrapped to [0, 2π)
pub fn advance_angle(theta: f32, speed_rpm: f32, dt: f32) -> f32 {
    let omega = speed_rpm * POLE_PAIRS as f32 * TAU / 60.0;
    let next = theta + omega * dt;
    if next >= TAU {
        next - TAU
    } else if next < 0.0 {
        next + TAU
    } else {
        next
    }
}

/// q-axis modulation index for a speed, linear V/f with low speed boost
pub fn modulation_index(speed_rpm: f32) -> f32 {
    let ratio = libm::fabsf(speed_rpm) / vf::RATED_SPEED_RPM;
    let index = vf::BOOST_MODULATION + ratio * (vf::MAX_MODULATION - vf::BOOST_MODULATION);
    let index = index.min(vf::MAX_MODULATION);
    if speed_rpm < 0.0 {
        -index
    } else {
        index
    }
}
