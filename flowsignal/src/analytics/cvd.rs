use crate::model::{Side, Trade};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimum absolute volume profile bin width.
pub const MIN_PROFILE_BIN_WIDTH: f64 = 0.5;

/// Volume profile bin width as a fraction of the last price.
pub const PROFILE_BIN_FRACTION: f64 = 0.001;

/// One time bucket of the cumulative volume delta series.
#[derive(Clone, Copy, PartialEq, Debug, Deserialize, Serialize)]
pub struct CvdPoint {
    /// Bucket start, `floor(trade_time / bucket_width) * bucket_width`.
    pub time: DateTime<Utc>,
    /// Aggressive buy volume in base units.
    pub buy_volume: f64,
    /// Aggressive sell volume in base units.
    pub sell_volume: f64,
    /// Running sum of buy minus sell volume across all buckets up to and including this one.
    pub cumulative_delta: f64,
}

impl CvdPoint {
    pub fn delta(&self) -> f64 {
        self.buy_volume - self.sell_volume
    }
}

/// Traded volume accumulated at one price bin.
#[derive(Clone, Copy, PartialEq, Debug, Deserialize, Serialize)]
pub struct ProfileNode {
    /// Bin price, always an integer multiple of the bin width.
    pub price: f64,
    pub volume: f64,
}

/// Short-term direction of the CVD series.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub enum CvdTrend {
    Rising,
    Falling,
    Flat,
}

/// Cumulative volume delta series plus volume-at-price profile derived from one trade list.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct OrderFlow {
    /// Time ordered CVD buckets.
    pub cvd: Vec<CvdPoint>,
    /// Profile nodes ordered by price ascending.
    pub profile: Vec<ProfileNode>,
}

impl OrderFlow {
    /// Latest cumulative delta, zero when no trades were seen.
    pub fn cvd_now(&self) -> f64 {
        self.cvd.last().map(|point| point.cumulative_delta).unwrap_or(0.0)
    }

    /// Rising or Falling once at least three buckets exist and the last bucket moved the
    /// cumulative delta, otherwise Flat.
    pub fn cvd_trend(&self) -> CvdTrend {
        match self.cvd.as_slice() {
            [.., _, prev, last] => {
                if last.cumulative_delta > prev.cumulative_delta {
                    CvdTrend::Rising
                } else if last.cumulative_delta < prev.cumulative_delta {
                    CvdTrend::Falling
                } else {
                    CvdTrend::Flat
                }
            }
            _ => CvdTrend::Flat,
        }
    }

    /// Change of the cumulative delta across the last three buckets, if available.
    pub fn cvd_slope(&self) -> Option<f64> {
        match self.cvd.as_slice() {
            [.., first, _, last] => Some(last.cumulative_delta - first.cumulative_delta),
            _ => None,
        }
    }

    /// The `n` heaviest profile nodes, heaviest first.
    pub fn top_nodes(&self, n: usize) -> Vec<ProfileNode> {
        self.profile
            .iter()
            .copied()
            .sorted_by(|a, b| b.volume.total_cmp(&a.volume))
            .take(n)
            .collect()
    }

    /// Total traded volume across the profile.
    pub fn total_volume(&self) -> f64 {
        self.profile.iter().map(|node| node.volume).sum()
    }
}

/// Profile bin width adapted to the instrument price magnitude.
pub fn profile_bin_width(last_price: f64) -> f64 {
    (last_price * PROFILE_BIN_FRACTION).max(MIN_PROFILE_BIN_WIDTH)
}

#[derive(Default, Clone, Copy, Debug)]
struct BucketTotals {
    buy: f64,
    sell: f64,
}

/// Bucket trades into a CVD series keyed by `floor(time / bucket_width_ms) * bucket_width_ms`,
/// and into a volume profile keyed by `round(price / bin_width) * bin_width`.
///
/// An empty trade list yields an empty [`OrderFlow`].
pub fn build_cvd_and_profile(trades: &[Trade], bucket_width_ms: i64, bin_width: f64) -> OrderFlow {
    let bucket_width_ms = bucket_width_ms.max(1);
    let bin_width = if bin_width.is_finite() && bin_width > 0.0 {
        bin_width
    } else {
        MIN_PROFILE_BIN_WIDTH
    };

    let mut buckets = BTreeMap::<i64, BucketTotals>::new();
    let mut bins = BTreeMap::<i64, f64>::new();

    for trade in trades {
        let bucket = trade
            .time
            .timestamp_millis()
            .div_euclid(bucket_width_ms)
            * bucket_width_ms;

        let totals = buckets.entry(bucket).or_default();
        match trade.side {
            Side::Buy => totals.buy += trade.size,
            Side::Sell => totals.sell += trade.size,
        }

        let bin = (trade.price / bin_width).round() as i64;
        *bins.entry(bin).or_insert(0.0) += trade.size;
    }

    let mut cumulative_delta = 0.0;
    let cvd = buckets
        .into_iter()
        .filter_map(|(bucket, totals)| {
            cumulative_delta += totals.buy - totals.sell;
            Some(CvdPoint {
                time: DateTime::from_timestamp_millis(bucket)?,
                buy_volume: totals.buy,
                sell_volume: totals.sell,
                cumulative_delta,
            })
        })
        .collect();

    let profile = bins
        .into_iter()
        .map(|(bin, volume)| ProfileNode {
            price: bin as f64 * bin_width,
            volume,
        })
        .collect();

    OrderFlow { cvd, profile }
}
