//! Numerical analysis of instrument data.

pub mod notch;

pub use notch::{magnitude_db, notch_search, notch_search_slices, CurvePoint, NotchResult, SweepCurve};
