//! Price band aggregation
//!
//! Raw observations become a `{min, avg, max}` band. The average is skewed
//! toward the low end because listings at the top of a range are mostly
//! outliers nobody buys at.

use crate::models::PriceBand;

/// Weight of the lowest observation in the blended average
pub const LOW_WEIGHT: f64 = 0.85;

/// Weight of the highest observation in the blended average
pub const HIGH_WEIGHT: f64 = 0.15;

/// Band over raw price observations
///
/// Non-finite observations are ignored. With no usable observation every
/// field is NaN (unknown); with a single one, all three fields equal it.
pub fn aggregate(observations: &[f64]) -> PriceBand {
    let mut usable = observations.iter().copied().filter(|v| v.is_finite());

    let Some(first) = usable.next() else {
        return PriceBand::UNKNOWN;
    };
    let (min, max) = usable.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));

    PriceBand {
        min,
        avg: blend(min, max),
        max,
    }
}

/// Low-weighted average of a range
pub fn blend(low: f64, high: f64) -> f64 {
    LOW_WEIGHT * low + HIGH_WEIGHT * high
}

/// Per-column mean of several bands, skipping unknown values
///
/// A column is NaN only when no band knows it.
pub fn mean_band<I>(bands: I) -> PriceBand
where
    I: IntoIterator<Item = PriceBand>,
{
    #[derive(Default)]
    struct Column {
        sum: f64,
        count: u32,
    }

    impl Column {
        fn add(&mut self, value: f64) {
            if !value.is_nan() {
                self.sum += value;
                self.count += 1;
            }
        }

        fn mean(&self) -> f64 {
            if self.count == 0 {
                f64::NAN
            } else {
                self.sum / f64::from(self.count)
            }
        }
    }

    let (mut min, mut avg, mut max) = (Column::default(), Column::default(), Column::default());
    for band in bands {
        min.add(band.min);
        avg.add(band.avg);
        max.add(band.max);
    }

    PriceBand {
        min: min.mean(),
        avg: avg.mean(),
        max: max.mean(),
    }
}
