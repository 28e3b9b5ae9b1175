// Space Vector Modulation (SVM)
//
// Converts a normalized alpha-beta voltage reference into three PWM on-times
// per switching period. Sector detection compares |alpha| against |beta|/sqrt(3)
// directly, so no trigonometric functions are needed inside the control ISR.

use libm::{fabsf, roundf};

/// 1/sqrt(3)
const RECIP_SQRT3: f32 = 0.577_350_26;

/// Normalized output voltage reference in the stationary alpha-beta frame.
///
/// A magnitude of 1.0 or less along any sector edge stays in the linear
/// region; anything beyond that is clipped by [`modulate`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoltageReference {
    pub alpha: f32,
    pub beta: f32,
}

impl VoltageReference {
    pub const ZERO: Self = Self::new(0.0, 0.0);

    pub const fn new(alpha: f32, beta: f32) -> Self {
        Self { alpha, beta }
    }
}

/// Zero-vector placement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SvmMethod {
    /// Center-aligned, zero time split evenly between both zero vectors
    #[default]
    Symmetric,
    /// 60° bus-clamped, odd sectors clamp high and even sectors clamp low
    BusClampOdd,
    /// 60° bus-clamped, even sectors clamp high and odd sectors clamp low
    BusClampEven,
}

impl SvmMethod {
    /// Parameter id used on the bus (1, 2, 3)
    pub const fn id(self) -> u8 {
        match self {
            SvmMethod::Symmetric => 1,
            SvmMethod::BusClampOdd => 2,
            SvmMethod::BusClampEven => 3,
        }
    }

    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(SvmMethod::Symmetric),
            2 => Some(SvmMethod::BusClampOdd),
            3 => Some(SvmMethod::BusClampEven),
            _ => None,
        }
    }
}

/// Instantaneous phase currents, only their signs are used.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseCurrents {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

/// Modulator configuration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SvmConfig {
    pub method: SvmMethod,
    /// Deadtime compensation in counts, `None` disables it
    pub deadtime_compensation: Option<f32>,
}

/// Output of one modulation step.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModulationResult {
    /// Sector 1..=6
    pub sector: u8,
    pub on_a: f32,
    pub on_b: f32,
    pub on_c: f32,
    /// The reference was outside the hexagon and has been rescaled
    pub clipped: bool,
    /// Scale applied to the active vector times, 1.0 when not clipped
    pub clip_coefficient: f32,
}

impl ModulationResult {
    /// On-times rounded to timer compare counts
    ///
    /// # Arguments
    /// * `max_duty` - Timer count for a full period
    pub fn duties(&self, max_duty: u16) -> (u16, u16, u16) {
        let max = max_duty as f32;
        (
            roundf(self.on_a).clamp(0.0, max) as u16,
            roundf(self.on_b).clamp(0.0, max) as u16,
            roundf(self.on_c).clamp(0.0, max) as u16,
        )
    }
}

/// Select the sector for a reference.
///
/// Ties at |alpha| == |beta|/sqrt(3) resolve to the middle sector (2 or 5),
/// including the zero vector. With [`SvmMethod::Symmetric`] the on-times are
/// identical on either side of a tie. The bus-clamp placements pin a
/// different phase in each sector, so a tie takes the middle sector's pattern.
pub fn sector(alpha: f32, beta: f32) -> u8 {
    let beta_proj = fabsf(beta * RECIP_SQRT3);
    let middle = fabsf(alpha) <= beta_proj;

    if beta >= 0.0 {
        if middle {
            2
        } else if alpha >= 0.0 {
            1
        } else {
            3
        }
    } else if middle {
        5
    } else if alpha >= 0.0 {
        6
    } else {
        4
    }
}

/// Calculate the on-times for one PWM period.
///
/// # Arguments
/// * `reference` - Normalized alpha-beta voltage
/// * `period` - Counts in one PWM period
/// * `method` - Zero-vector placement
///
/// # Algorithm
/// 1. Pick the sector from |alpha| vs |beta|/sqrt(3) and the signs
/// 2. Compute active vector times Tx, Ty as fractions of the period
/// 3. T0 = 1 - Tx - Ty, rescale Tx/Ty when T0 would be negative
/// 4. Distribute Tx, Ty, T0 to the phases with the per-sector table
///
/// Inputs are not validated, NaN propagates into the on-times.
pub fn modulate(reference: VoltageReference, period: f32, method: SvmMethod) -> ModulationResult {
    let VoltageReference { alpha, beta } = reference;
    let beta_proj = fabsf(beta * RECIP_SQRT3);
    let sector = sector(alpha, beta);

    let (mut tx, mut ty) = match sector {
        2 | 5 => (alpha + beta_proj, -alpha + beta_proj),
        _ => (fabsf(alpha) - beta_proj, 2.0 * beta_proj),
    };

    let mut t0 = 1.0 - tx - ty;
    let (clipped, clip_coefficient) = if t0 < 0.0 {
        let k = 1.0 / (tx + ty);
        tx *= k;
        ty *= k;
        t0 = 0.0;
        (true, k)
    } else {
        (false, 1.0)
    };

    let (a, b, c) = match method {
        SvmMethod::Symmetric => place_symmetric(sector, tx, ty, t0),
        SvmMethod::BusClampOdd => place_bus_clamp_odd(sector, tx, ty, t0),
        SvmMethod::BusClampEven => place_bus_clamp_even(sector, tx, ty, t0),
    };

    ModulationResult {
        sector,
        on_a: period * a,
        on_b: period * b,
        on_c: period * c,
        clipped,
        clip_coefficient,
    }
}

/// Center-aligned placement, each phase switches at most twice per period
fn place_symmetric(sector: u8, tx: f32, ty: f32, t0: f32) -> (f32, f32, f32) {
    let h = t0 * 0.5;
    match sector {
        1 => (tx + ty + h, ty + h, h),
        2 => (tx + h, tx + ty + h, h),
        3 => (h, tx + ty + h, tx + h),
        4 => (h, tx + h, tx + ty + h),
        5 => (tx + h, h, tx + ty + h),
        6 => (tx + ty + h, h, ty + h),
        _ => (0.0, 0.0, 0.0),
    }
}

fn place_bus_clamp_odd(sector: u8, tx: f32, ty: f32, t0: f32) -> (f32, f32, f32) {
    match sector {
        1 => (1.0, ty + t0, t0),
        2 => (tx, tx + ty, 0.0),
        3 => (t0, 1.0, tx + t0),
        4 => (0.0, tx, tx + ty),
        5 => (tx + t0, t0, 1.0),
        6 => (tx + ty, 0.0, ty),
        _ => (0.0, 0.0, 0.0),
    }
}

fn place_bus_clamp_even(sector: u8, tx: f32, ty: f32, t0: f32) -> (f32, f32, f32) {
    match sector {
        1 => (tx + ty, ty, 0.0),
        2 => (tx + t0, 1.0, t0),
        3 => (0.0, tx + ty, tx),
        4 => (t0, tx + t0, 1.0),
        5 => (tx, 0.0, tx + ty),
        6 => (1.0, t0, ty + t0),
        _ => (0.0, 0.0, 0.0),
    }
}

/// Deadtime compensation
///
/// Extends the on-time of a phase sourcing positive current and shortens it
/// otherwise, clamped to `[0, period]`.
pub fn compensate_deadtime(
    result: ModulationResult,
    currents: PhaseCurrents,
    compensation: f32,
    period: f32,
) -> ModulationResult {
    let adjust = |on: f32, current: f32| {
        if current > 0.0 {
            (on + compensation).min(period)
        } else {
            (on - compensation).max(0.0)
        }
    };

    ModulationResult {
        on_a: adjust(result.on_a, currents.a),
        on_b: adjust(result.on_b, currents.b),
        on_c: adjust(result.on_c, currents.c),
        ..result
    }
}

/// Configured modulator
///
/// Holds only the strategy selection, every call is a pure function of its
/// inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvmModulator {
    config: SvmConfig,
}

impl SvmModulator {
    pub const fn new(config: SvmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SvmConfig {
        self.config
    }

    pub fn set_method(&mut self, method: SvmMethod) {
        self.config.method = method;
    }

    pub fn set_deadtime_compensation(&mut self, compensation: Option<f32>) {
        self.config.deadtime_compensation = compensation;
    }

    /// Modulate with the configured strategy
    ///
    /// `currents` is only consulted when deadtime compensation is enabled.
    pub fn update(
        &self,
        reference: VoltageReference,
        period: f32,
        currents: PhaseCurrents,
    ) -> ModulationResult {
        let result = modulate(reference, period, self.config.method);
        match self.config.deadtime_compensation {
            Some(dtc) => compensate_deadtime(result, currents, dtc, period),
            None => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f32 = 1e-3;

    fn approx(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    /// Points on a circle plus the axes and the sector edges
    fn sweep() -> impl Iterator<Item = VoltageReference> {
        let radii = [0.0f32, 0.1, 0.5, 0.8, 0.866, 1.0, 1.2, 2.0];
        radii.into_iter().flat_map(|r| {
            (0..360).map(move |deg| {
                let th = (deg as f32).to_radians();
                VoltageReference::new(r * th.cos(), r * th.sin())
            })
        })
    }

    #[test]
    fn test_scenario_linear_sector1() {
        let out = modulate(VoltageReference::new(0.5, 0.0), 1000.0, SvmMethod::Symmetric);
        assert_eq!(out.sector, 1);
        assert!(!out.clipped);
        assert_eq!(out.clip_coefficient, 1.0);
        assert!(approx(out.on_a, 750.0, TOL));
        assert!(approx(out.on_b, 250.0, TOL));
        assert!(approx(out.on_c, 250.0, TOL));
    }

    #[test]
    fn test_scenario_overmodulated_sector2() {
        let out = modulate(VoltageReference::new(0.0, 1.0), 1000.0, SvmMethod::Symmetric);
        assert_eq!(out.sector, 2);
        assert!(out.clipped);
        assert!(approx(out.clip_coefficient, 0.866, 1e-3));
        assert!(approx(out.on_a, 500.0, 0.1));
        assert!(approx(out.on_b, 1000.0, 0.1));
        assert!(approx(out.on_c, 0.0, 0.1));
    }

    #[test]
    fn test_sector_partition() {
        for v in sweep() {
            let s = sector(v.alpha, v.beta);
            assert!((1..=6).contains(&s), "alpha={} beta={} sector={}", v.alpha, v.beta, s);
        }
        assert_eq!(sector(1.0, 0.1), 1);
        assert_eq!(sector(0.0, 1.0), 2);
        assert_eq!(sector(-1.0, 0.1), 3);
        assert_eq!(sector(-1.0, -0.1), 4);
        assert_eq!(sector(0.0, -1.0), 5);
        assert_eq!(sector(1.0, -0.1), 6);
    }

    #[test]
    fn test_sector_boundary_prefers_middle() {
        // Exact tie built from the same arithmetic the modulator uses
        let beta = 0.6f32;
        let alpha = fabsf(beta * RECIP_SQRT3);
        assert_eq!(sector(alpha, beta), 2);
        assert_eq!(sector(-alpha, beta), 2);
        assert_eq!(sector(alpha, -beta), 5);
        assert_eq!(sector(-alpha, -beta), 5);
        assert_eq!(sector(alpha + 1e-4, beta), 1);
        assert_eq!(sector(-alpha - 1e-4, -beta), 4);
        assert_eq!(sector(0.0, 0.0), 2);
    }

    #[test]
    fn test_sector_boundary_on_times_match() {
        let beta = 0.6f32;
        let alpha = fabsf(beta * RECIP_SQRT3);
        let tie = modulate(VoltageReference::new(alpha, beta), 1000.0, SvmMethod::Symmetric);
        let near = modulate(VoltageReference::new(alpha + 1e-6, beta), 1000.0, SvmMethod::Symmetric);
        assert!(approx(tie.on_a, near.on_a, 0.01));
        assert!(approx(tie.on_b, near.on_b, 0.01));
        assert!(approx(tie.on_c, near.on_c, 0.01));
    }

    #[test]
    fn test_bus_clamp_boundary_uses_middle_sector_pattern() {
        let beta = 0.6f32;
        let alpha = fabsf(beta * RECIP_SQRT3);
        let tie = modulate(VoltageReference::new(alpha, beta), 1000.0, SvmMethod::BusClampOdd);
        let near = modulate(
            VoltageReference::new(alpha + 1e-6, beta),
            1000.0,
            SvmMethod::BusClampOdd,
        );
        assert_eq!(tie.sector, 2);
        assert_eq!(near.sector, 1);
        // Different clamped phase on each side of the boundary
        assert!(approx(tie.on_c, 0.0, 0.01));
        assert!(approx(near.on_a, 1000.0, 0.01));
        assert!(!approx(tie.on_a, near.on_a, 1.0));
        // Line voltages are continuous across it
        assert!(approx(tie.on_a - tie.on_c, near.on_a - near.on_c, 0.05));
        assert!(approx(tie.on_b - tie.on_c, near.on_b - near.on_c, 0.05));
    }

    #[test]
    fn test_clamp_correctness() {
        for v in sweep() {
            let out = modulate(v, 1.0, SvmMethod::Symmetric);
            let beta_proj = (v.beta * RECIP_SQRT3).abs();
            let (tx, ty) = match out.sector {
                2 | 5 => (v.alpha + beta_proj, -v.alpha + beta_proj),
                _ => (v.alpha.abs() - beta_proj, 2.0 * beta_proj),
            };
            if 1.0 - tx - ty < 0.0 {
                assert!(out.clipped);
                assert!(out.clip_coefficient <= 1.0);
                assert!(approx((tx + ty) * out.clip_coefficient, 1.0, 1e-5));
                // T0 == 0: the smallest on-time is zero and the largest is a full period
                let min = out.on_a.min(out.on_b).min(out.on_c);
                let max = out.on_a.max(out.on_b).max(out.on_c);
                assert!(approx(min, 0.0, 1e-5));
                assert!(approx(max, 1.0, 1e-5));
            } else {
                assert!(!out.clipped);
                assert_eq!(out.clip_coefficient, 1.0);
            }
        }
    }

    #[test]
    fn test_duty_bounds_all_methods() {
        let period = 4250.0;
        for method in [SvmMethod::Symmetric, SvmMethod::BusClampOdd, SvmMethod::BusClampEven] {
            for v in sweep() {
                let out = modulate(v, period, method);
                for on in [out.on_a, out.on_b, out.on_c] {
                    assert!(on >= -TOL && on <= period + TOL, "{:?} {:?} -> {}", method, v, on);
                }
            }
        }
    }

    #[test]
    fn test_zero_reference_centers_duties() {
        let out = modulate(VoltageReference::ZERO, 100.0, SvmMethod::Symmetric);
        assert!(!out.clipped);
        assert!(approx(out.on_a, 50.0, TOL));
        assert!(approx(out.on_b, 50.0, TOL));
        assert!(approx(out.on_c, 50.0, TOL));
    }

    #[test]
    fn test_bus_clamp_pins_one_phase() {
        let period = 1000.0;
        for method in [SvmMethod::BusClampOdd, SvmMethod::BusClampEven] {
            for v in sweep().filter(|v| v.alpha != 0.0 || v.beta != 0.0) {
                let out = modulate(v, period, method);
                let pinned = [out.on_a, out.on_b, out.on_c]
                    .iter()
                    .any(|&on| approx(on, 0.0, TOL) || approx(on, period, TOL));
                assert!(pinned, "{:?} {:?} {:?}", method, v, out);
            }
        }
    }

    #[test]
    fn test_bus_clamp_keeps_line_voltages() {
        // Clamping only shifts the common mode, phase differences match symmetric SVM
        let period = 1000.0;
        for v in sweep() {
            let sym = modulate(v, period, SvmMethod::Symmetric);
            for method in [SvmMethod::BusClampOdd, SvmMethod::BusClampEven] {
                let bc = modulate(v, period, method);
                assert_eq!(bc.sector, sym.sector);
                assert!(approx(bc.on_a - bc.on_b, sym.on_a - sym.on_b, 0.05));
                assert!(approx(bc.on_b - bc.on_c, sym.on_b - sym.on_c, 0.05));
            }
        }
    }

    #[test]
    fn test_deadtime_compensation_clamped() {
        let period = 1000.0;
        let base = modulate(VoltageReference::new(0.0, 1.0), period, SvmMethod::Symmetric);
        let currents = PhaseCurrents { a: 1.0, b: 2.0, c: -1.0 };
        let out = compensate_deadtime(base, currents, 20.0, period);
        assert!(approx(out.on_a, base.on_a + 20.0, TOL));
        assert!(approx(out.on_b, period, TOL));
        assert!(approx(out.on_c, 0.0, TOL));
        assert_eq!(out.sector, base.sector);
        assert_eq!(out.clipped, base.clipped);
    }

    #[test]
    fn test_deadtime_zero_current_subtracts() {
        let base = modulate(VoltageReference::new(0.5, 0.0), 1000.0, SvmMethod::Symmetric);
        let out = compensate_deadtime(base, PhaseCurrents::default(), 10.0, 1000.0);
        assert!(approx(out.on_a, 740.0, TOL));
        assert!(approx(out.on_b, 240.0, TOL));
        assert!(approx(out.on_c, 240.0, TOL));
    }

    #[test]
    fn test_modulator_default_is_symmetric_without_compensation() {
        let svm = SvmModulator::default();
        assert_eq!(svm.config().method, SvmMethod::Symmetric);
        assert_eq!(svm.config().deadtime_compensation, None);
        let v = VoltageReference::new(0.3, -0.2);
        let currents = PhaseCurrents { a: 5.0, b: -5.0, c: 5.0 };
        assert_eq!(svm.update(v, 1000.0, currents), modulate(v, 1000.0, SvmMethod::Symmetric));
    }

    #[test]
    fn test_method_ids() {
        for method in [SvmMethod::Symmetric, SvmMethod::BusClampOdd, SvmMethod::BusClampEven] {
            assert_eq!(SvmMethod::from_id(method.id()), Some(method));
        }
        assert_eq!(SvmMethod::from_id(0), None);
        assert_eq!(SvmMethod::from_id(4), None);
    }

    #[test]
    fn test_duties_rounding() {
        let out = modulate(VoltageReference::new(0.5, 0.0), 99.0, SvmMethod::Symmetric);
        assert_eq!(out.duties(99), (74, 25, 25));
    }

    #[test]
    fn test_nan_propagates() {
        let out = modulate(VoltageReference::new(f32::NAN, 0.0), 1000.0, SvmMethod::Symmetric);
        assert!((1..=6).contains(&out.sector));
        assert!(out.on_a.is_nan() || out.on_b.is_nan() || out.on_c.is_nan());
    }
}
