//! Intensity unit conversion.
//!
//! The forecast service reports marginal emissions in lbs/MWh; everything
//! shown to callers or written to audit is g/kWh.
//!
//! 1 lb = 453.59237 g and 1 MWh = 1000 kWh, so lbs/MWh × 0.45359237 = g/kWh.

pub const LBS_PER_MWH_TO_G_PER_KWH: f64 = 0.45359237;

#[inline]
pub fn lbs_per_mwh_to_g_per_kwh(value: f64) -> f64 {
    value * LBS_PER_MWH_TO_G_PER_KWH
}
