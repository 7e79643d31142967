//! Fixed-point decimal helpers for coefficients and weights.
//!
//! A coefficient is an integer count of millionths. A weight is an integer
//! count of `10^-precision` units. Every weight is produced by one exact
//! integer product followed by a single half-up rounding step, so repeated
//! computations never drift the way binary floats do.

use core::cmp::Ordering;
use core::fmt;

/// Decimal places carried by a coefficient.
pub const COEFFICIENT_DECIMALS: u8 = 6;
const COEFFICIENT_SCALE: u32 = 1_000_000;

/// Upper bound on weight precision; keeps every intermediate inside `u64`.
pub const MAX_PRECISION: u8 = 9;

#[inline]
fn pow10(exp: u8) -> u64 {
    10u64.pow(u32::from(exp))
}

/// Device scale factor in millionths (`"000123"` is 0.000123).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coefficient {
    micros: u32,
}

impl Coefficient {
    #[inline]
    pub fn from_micros(micros: u32) -> Self {
        Self { micros }
    }

    #[inline]
    pub fn micros(self) -> u32 {
        self.micros
    }

    pub fn is_zero(self) -> bool {
        self.micros == 0
    }
}

impl fmt::Display for Coefficient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:06}",
            self.micros / COEFFICIENT_SCALE,
            self.micros % COEFFICIENT_SCALE
        )
    }
}

/// Non-negative decimal weight: `units / 10^precision`.
#[derive(Debug, Clone, Copy, Hash)]
pub struct Weight {
    units: u64,
    precision: u8,
}

impl Weight {
    pub fn from_units(units: u64, precision: u8) -> Self {
        Self {
            units,
            precision: precision.min(MAX_PRECISION),
        }
    }

    pub fn zero(precision: u8) -> Self {
        Self::from_units(0, precision)
    }

    #[inline]
    pub fn units(self) -> u64 {
        self.units
    }

    #[inline]
    pub fn precision(self) -> u8 {
        self.precision
    }

    /// Nearest `f64`, for the JSON boundary only.
    ///
    /// Both operands are exact in `f64` (units stay far below 2^53), so the
    /// division is correctly rounded and `0.06` prints as `0.06`.
    pub fn to_f64(self) -> f64 {
        self.units as f64 / pow10(self.precision) as f64
    }

    fn scaled_to(self, precision: u8) -> u128 {
        u128::from(self.units) * u128::from(pow10(precision.saturating_sub(self.precision)))
    }
}

impl PartialEq for Weight {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Weight {}

impl PartialOrd for Weight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Weight {
    fn cmp(&self, other: &Self) -> Ordering {
        let p = self.precision.max(other.precision);
        self.scaled_to(p).cmp(&other.scaled_to(p))
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.precision == 0 {
            return write!(f, "{}", self.units);
        }
        let scale = pow10(self.precision);
        write!(
            f,
            "{}.{:0width$}",
            self.units / scale,
            self.units % scale,
            width = usize::from(self.precision)
        )
    }
}

/// Change the number of decimal places of an integer mantissa, rounding half up.
#[inline]
fn rescale_half_up(value: u64, from: u8, to: u8) -> u64 {
    match to.cmp(&from) {
        Ordering::Equal => value,
        Ordering::Greater => value.saturating_mul(pow10(to - from)),
        Ordering::Less => {
            let d = pow10(from - to);
            value / d + u64::from(value % d >= d - d / 2)
        }
    }
}

/// `round(|baseline - sample| * coefficient, precision)`, rounding half up.
pub fn compute_weight(baseline: u16, sample: u16, coefficient: Coefficient, precision: u8) -> Weight {
    let precision = precision.min(MAX_PRECISION);
    let diff = u64::from(baseline.abs_diff(sample));
    let micros = diff * u64::from(coefficient.micros());
    Weight::from_units(
        rescale_half_up(micros, COEFFICIENT_DECIMALS, precision),
        precision,
    )
}

/// Quantize a configured threshold to `precision` decimals, rounding to
/// nearest. Non-finite and negative values map to 0.
pub fn quantize(x: f64, precision: u8) -> Weight {
    let precision = precision.min(MAX_PRECISION);
    if !x.is_finite() || x <= 0.0 {
        return Weight::zero(precision);
    }
    let scaled = (x * pow10(precision) as f64).round();
    let units = if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    };
    Weight::from_units(units, precision)
}

/// Arithmetic mean rounded half up to `precision`. `None` for an empty slice.
pub fn mean(weights: &[Weight], precision: u8) -> Option<Weight> {
    if weights.is_empty() {
        return None;
    }
    let precision = precision.min(MAX_PRECISION);
    let n = weights.len() as u128;
    let sum: u128 = weights
        .iter()
        .map(|w| u128::from(rescale_half_up(w.units, w.precision, precision)))
        .sum();
    let avg = (2 * sum + n) / (2 * n);
    Some(Weight::from_units(
        u64::try_from(avg).unwrap_or(u64::MAX),
        precision,
    ))
}
