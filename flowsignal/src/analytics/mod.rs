//! Stateless analytics over candle series and trade lists.

/// Cumulative volume delta and volume-at-price profile.
pub mod cvd;

/// Scalar candle features (trend, momentum, volatility).
pub mod features;

/// Streaming EMA and RSI calculators.
pub mod indicators;

pub use cvd::{CvdPoint, CvdTrend, OrderFlow, ProfileNode, build_cvd_and_profile, profile_bin_width};
pub use features::{Features, MIN_HISTORY, derive_features};
