//! Minute-bucketed rolling price buffer

use std::collections::VecDeque;

use crate::types::PricePoint;

/// Default buffer capacity: longest SMA window (100) plus a small margin
pub const DEFAULT_SERIES_CAPACITY: usize = 110;

/// Result of pushing a price into the series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// A new minute bucket was appended
    Appended {
        /// Minutes since the previous bucket (0 for the very first sample)
        gap_minutes: i64,
    },
    /// The latest bucket was overwritten in place
    Overwritten,
    /// Sample older than the latest bucket, dropped
    Stale,
}

impl PushOutcome {
    pub fn is_new_minute(&self) -> bool {
        matches!(self, PushOutcome::Appended { .. })
    }

    /// True when one or more minute buckets were skipped
    pub fn has_gap(&self) -> bool {
        matches!(self, PushOutcome::Appended { gap_minutes } if *gap_minutes > 1)
    }
}

/// Ordered (minute, price) samples with a capped length
///
/// Minutes are non-decreasing; a second sample inside the latest minute
/// replaces the stored price instead of appending.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    points: VecDeque<PricePoint>,
    capacity: usize,
}

impl Default for PriceSeries {
    fn default() -> Self {
        Self::new(DEFAULT_SERIES_CAPACITY)
    }
}

impl PriceSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity + 1),
            capacity: capacity.max(1),
        }
    }

    /// Floor an epoch-second timestamp to its epoch minute
    pub fn minute_of(epoch_secs: i64) -> i64 {
        epoch_secs.div_euclid(60)
    }

    /// Insert a price observed at `epoch_secs`
    pub fn push(&mut self, epoch_secs: i64, price: f64) -> PushOutcome {
        let minute = Self::minute_of(epoch_secs);

        let outcome = match self.points.back_mut() {
            Some(last) if last.minute == minute => {
                last.price = price;
                return PushOutcome::Overwritten;
            }
            Some(last) if minute < last.minute => return PushOutcome::Stale,
            Some(last) => PushOutcome::Appended {
                gap_minutes: minute - last.minute,
            },
            None => PushOutcome::Appended { gap_minutes: 0 },
        };

        self.points.push_back(PricePoint { minute, price });
        if self.points.len() > self.capacity {
            self.points.pop_front();
        }
        outcome
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.back()
    }

    pub fn last_minute(&self) -> Option<i64> {
        self.points.back().map(|p| p.minute)
    }

    pub fn points(&self) -> impl Iterator<Item = &PricePoint> {
        self.points.iter()
    }

    /// Prices in chronological order
    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }
}
