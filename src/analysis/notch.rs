//! Notch search over a frequency sweep.
//!
//! A resonator seen in reflection shows up as a dip ("notch") in the S11
//! magnitude. [`notch_search`] finds the dip, its 3 dB edges measured from the
//! curve maximum, and the maximum itself. The edges are the sweep points
//! closest to the threshold; there is no interpolation between points, so
//! edge accuracy is one sample spacing.
//!
//! # Example
//!
//! ```
//! use lab_monitor::analysis::{notch_search, SweepCurve};
//!
//! let curve = SweepCurve::new(
//!     vec![41.0e6, 41.5e6, 41.96e6, 42.5e6, 43.0e6],
//!     vec![-5.0, -8.0, -30.0, -8.0, -6.0],
//! )
//! .unwrap();
//! let notch = notch_search(&curve).unwrap();
//! assert_eq!(notch.center.frequency, 41.96e6);
//! assert_eq!(notch.reflection(), -25.0);
//! assert!((notch.quality_factor().unwrap() - 41.96).abs() < 1e-9);
//! ```

use crate::error::{MonitorError, MonitorResult};
use num_complex::Complex64;

/// Depth below the curve maximum that defines the band edges.
pub const EDGE_DEPTH_DB: f64 = 3.0;

/// Convert a complex reflection coefficient to dB: `20·log10(|z|)`.
pub fn magnitude_db(z: Complex64) -> f64 {
    20.0 * z.norm().log10()
}

/// A validated sweep: ascending frequencies (Hz) and magnitudes (dB).
#[derive(Debug, Clone, PartialEq)]
pub struct SweepCurve {
    frequency: Vec<f64>,
    magnitude: Vec<f64>,
}

impl SweepCurve {
    /// Build a curve from parallel arrays.
    ///
    /// # Errors
    ///
    /// [`MonitorError::Domain`] if the arrays are empty or of different
    /// lengths, if any value is not finite, or if frequency is not strictly
    /// ascending.
    pub fn new(frequency: Vec<f64>, magnitude: Vec<f64>) -> MonitorResult<Self> {
        if frequency.is_empty() {
            return Err(MonitorError::Domain("sweep curve is empty".into()));
        }
        if frequency.len() != magnitude.len() {
            return Err(MonitorError::Domain(format!(
                "sweep has {} frequencies but {} magnitudes",
                frequency.len(),
                magnitude.len()
            )));
        }
        if let Some(i) = frequency.iter().position(|f| !f.is_finite()) {
            return Err(MonitorError::Domain(format!(
                "frequency[{i}] is not finite"
            )));
        }
        if let Some(i) = magnitude.iter().position(|m| !m.is_finite()) {
            return Err(MonitorError::Domain(format!(
                "magnitude[{i}] is not finite"
            )));
        }
        if let Some(i) = frequency.windows(2).position(|w| w[1] <= w[0]) {
            return Err(MonitorError::Domain(format!(
                "frequency is not strictly ascending at index {}",
                i + 1
            )));
        }
        Ok(Self {
            frequency,
            magnitude,
        })
    }

    /// Build a curve from complex reflection data, converting to dB.
    pub fn from_complex(frequency: Vec<f64>, data: &[Complex64]) -> MonitorResult<Self> {
        let magnitude = data.iter().copied().map(magnitude_db).collect();
        Self::new(frequency, magnitude)
    }

    /// Frequencies in Hz.
    pub fn frequency(&self) -> &[f64] {
        &self.frequency
    }

    /// Magnitudes in dB.
    pub fn magnitude(&self) -> &[f64] {
        &self.magnitude
    }

    /// Number of sweep points (always at least one).
    pub fn len(&self) -> usize {
        self.frequency.len()
    }

    /// Always false; a curve has at least one point.
    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }

    fn point(&self, index: usize) -> CurvePoint {
        CurvePoint {
            index,
            frequency: self.frequency[index],
            magnitude: self.magnitude[index],
        }
    }
}

/// One point of a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    /// Index into the sweep arrays.
    pub index: usize,
    /// Frequency in Hz.
    pub frequency: f64,
    /// Magnitude in dB.
    pub magnitude: f64,
}

/// Geometry of the notch found in a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotchResult {
    /// Global minimum.
    pub center: CurvePoint,
    /// Point left of the center closest to the 3 dB threshold.
    pub left_3db: CurvePoint,
    /// Point at or right of the center closest to the 3 dB threshold.
    pub right_3db: CurvePoint,
    /// Global maximum.
    pub peak: CurvePoint,
}

impl NotchResult {
    /// Depth of the notch relative to the maximum, in dB (negative).
    pub fn reflection(&self) -> f64 {
        self.center.magnitude - self.peak.magnitude
    }

    /// Distance between the 3 dB edges in Hz.
    pub fn bandwidth(&self) -> f64 {
        self.right_3db.frequency - self.left_3db.frequency
    }

    /// Center frequency over 3 dB bandwidth.
    ///
    /// # Errors
    ///
    /// [`MonitorError::Domain`] if the bandwidth is zero (or otherwise not a
    /// usable positive number).
    pub fn quality_factor(&self) -> MonitorResult<f64> {
        let bandwidth = self.bandwidth();
        if !(bandwidth.is_finite() && bandwidth > 0.0) {
            return Err(MonitorError::Domain(format!(
                "3 dB bandwidth is {bandwidth} Hz, quality factor undefined"
            )));
        }
        Ok(self.center.frequency / bandwidth)
    }
}

/// Locate the notch in `curve`.
///
/// Ties resolve to the first occurrence everywhere: for the maximum, the
/// minimum and both edge searches.
///
/// # Errors
///
/// [`MonitorError::Domain`] if the minimum is the first point, which leaves
/// nothing to search for a left edge.
pub fn notch_search(curve: &SweepCurve) -> MonitorResult<NotchResult> {
    let mag = curve.magnitude();

    let peak_idx = first_extreme(mag, |candidate, best| candidate > best);
    let center_idx = first_extreme(mag, |candidate, best| candidate < best);
    let threshold = mag[peak_idx] - EDGE_DEPTH_DB;

    if center_idx == 0 {
        return Err(MonitorError::Domain(
            "notch minimum is at the first sweep point; no left 3 dB edge".into(),
        ));
    }
    let left_idx = closest_to(mag, 0..center_idx, threshold);
    let right_idx = closest_to(mag, center_idx..mag.len(), threshold);

    Ok(NotchResult {
        center: curve.point(center_idx),
        left_3db: curve.point(left_idx),
        right_3db: curve.point(right_idx),
        peak: curve.point(peak_idx),
    })
}

/// [`notch_search`] over raw slices.
pub fn notch_search_slices(frequency: &[f64], magnitude: &[f64]) -> MonitorResult<NotchResult> {
    let curve = SweepCurve::new(frequency.to_vec(), magnitude.to_vec())?;
    notch_search(&curve)
}

fn first_extreme(values: &[f64], better: impl Fn(f64, f64) -> bool) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if better(v, values[best]) {
            best = i;
        }
    }
    best
}

/// Caller guarantees `range` is non-empty.
fn closest_to(values: &[f64], range: std::ops::Range<usize>, target: f64) -> usize {
    let mut best = range.start;
    let mut best_dist = (values[best] - target).abs();
    for i in range.skip(1) {
        let dist = (values[i] - target).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}
