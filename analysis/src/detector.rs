//! Crossover and reversal detection
//!
//! Runs on every new minute bucket of a symbol. SMA crossovers are tracked
//! through tri-state flags so the first reliable observation only records a
//! baseline. RSI reversals are confirmed one reading after the extremum's
//! right neighbour, registered as significant levels, and scored against the
//! symbol's own validated history.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::store::{
    CrossState, RsiHistory, SignificantRsiPoint, SmaState, SymbolState, ValidationLedger,
    MAX_VALIDATED_RECORDS,
};
use crate::types::{
    CrossDirection, CrossoverEvent, DetectorEvent, MaPair, ReversalEvent, ReversalType,
    SuccessEstimate,
};

/// Minimum RSI swing, relative to the extremum, for a reversal
pub const MIN_REVERSAL_SWING: f64 = 0.03;

/// A new level is only registered if no level of the same type is this close
pub const REGISTRATION_DISTANCE: f64 = 2.0;

/// RSI distance counted as "at" a registered level
pub const PROXIMITY_BAND: f64 = 1.5;

/// Price move that confirms a reversal signal
pub const VALIDATION_MOVE: f64 = 0.005;

/// z-score of the Wilson lower bound (95%)
pub const WILSON_Z: f64 = 1.96;

/// Below this many samples the estimate is blended toward 0.5
pub const MIN_CONFIDENT_SAMPLES: usize = 5;

/// Minimum spacing between two alerts for the same level
pub fn revisit_throttle() -> Duration {
    Duration::hours(2)
}

/// Delay before a reversal signal is checked against the price
pub fn validation_delay() -> Duration {
    Duration::minutes(30)
}

/// Confirmed RSI extremum, not yet registered
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReversalCandidate {
    pub reversal_type: ReversalType,
    pub rsi: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Compare each SMA pair against its stored flag
///
/// A pair seen for the first time only records its baseline. Callers run
/// this on reliable state only.
pub fn detect_crossovers(sma: &mut SmaState, price: f64, now: DateTime<Utc>) -> Vec<CrossoverEvent> {
    let mut events = Vec::new();

    for pair in MaPair::ALL {
        let Some((fast, slow)) = sma.pair_values(pair) else {
            continue;
        };
        let current = CrossState::from_above(fast > slow);
        let previous = sma.flags.get(pair);

        match (previous, current) {
            (CrossState::Unknown, _) => {
                debug!(%pair, ?current, "Recording crossover baseline");
            }
            (prev, cur) if prev == cur => {}
            (_, cur) => {
                let direction = if cur == CrossState::Above {
                    CrossDirection::CrossAbove
                } else {
                    CrossDirection::CrossBelow
                };
                events.push(CrossoverEvent {
                    pair,
                    direction,
                    price,
                    timestamp: now,
                });
            }
        }
        sma.flags.set(pair, current);
    }

    events
}

/// Check whether the reading at `n - 3` is a confirmed reversal
///
/// Bottom: strict local minimum over its neighbours, the reading after the
/// right neighbour keeps rising, and the swing is at least 3% of the
/// minimum. Top is the mirror image.
pub fn detect_reversal(history: &RsiHistory) -> Option<ReversalCandidate> {
    let n = history.len();
    if n < 4 {
        return None;
    }

    let before = history.get(n - 4)?.rsi;
    let pivot = *history.get(n - 3)?;
    let after = history.get(n - 2)?.rsi;
    let confirm = history.get(n - 1)?.rsi;
    let base = pivot.rsi.abs().max(f64::EPSILON);

    let reversal_type = if pivot.rsi < before
        && pivot.rsi < after
        && confirm > after
        && (confirm - pivot.rsi) / base >= MIN_REVERSAL_SWING
    {
        ReversalType::BottomReversal
    } else if pivot.rsi > before
        && pivot.rsi > after
        && confirm < after
        && (pivot.rsi - confirm) / base >= MIN_REVERSAL_SWING
    {
        ReversalType::TopReversal
    } else {
        return None;
    };

    Some(ReversalCandidate {
        reversal_type,
        rsi: pivot.rsi,
        price: pivot.price,
        timestamp: pivot.timestamp,
    })
}

/// Register a candidate unless a level of the same type is within 2 RSI units
///
/// Registration opens a validation record and counts as the level's first
/// alert.
pub fn register_reversal(
    state: &mut SymbolState,
    candidate: ReversalCandidate,
    now: DateTime<Utc>,
) -> Option<ReversalEvent> {
    let duplicate = state.significant_points.iter().any(|p| {
        p.reversal_type == candidate.reversal_type
            && (p.value - candidate.rsi).abs() <= REGISTRATION_DISTANCE
    });
    if duplicate {
        return None;
    }

    let estimate = success_rate(&state.ledger, candidate.reversal_type, candidate.rsi);

    state.significant_points.push(SignificantRsiPoint {
        value: candidate.rsi,
        reversal_type: candidate.reversal_type,
        timestamp: candidate.timestamp,
        price: candidate.price,
        hit_count: 0,
        last_alerted: Some(now),
    });
    let record_id = state.ledger.open(
        candidate.timestamp,
        candidate.rsi,
        candidate.price,
        candidate.reversal_type,
    );

    info!(
        symbol = %state.symbol,
        reversal = %candidate.reversal_type,
        rsi = candidate.rsi,
        record_id,
        "Registered significant RSI level"
    );

    Some(ReversalEvent {
        reversal_type: candidate.reversal_type,
        level: candidate.rsi,
        rsi: candidate.rsi,
        price: candidate.price,
        timestamp: now,
        registered: true,
        hit_count: 0,
        estimate,
    })
}

/// Count re-entries of the live RSI into the band of registered levels
///
/// A re-entry needs the previous reading outside the band. Every re-entry
/// bumps the hit count; an event is produced at most once per level per
/// two hours.
pub fn check_revisits(state: &mut SymbolState) -> Vec<ReversalEvent> {
    let Some(current) = state.rsi_history.last().copied() else {
        return Vec::new();
    };
    let previous = state.rsi_history.previous().map(|p| p.rsi);

    let mut hits = Vec::new();
    for (index, point) in state.significant_points.iter_mut().enumerate() {
        let inside = (current.rsi - point.value).abs() <= PROXIMITY_BAND;
        let was_inside = previous
            .map(|prev| (prev - point.value).abs() <= PROXIMITY_BAND)
            .unwrap_or(false);
        if !inside || was_inside {
            continue;
        }

        point.hit_count += 1;
        let throttled = point
            .last_alerted
            .map(|at| current.timestamp - at < revisit_throttle())
            .unwrap_or(false);
        if throttled {
            debug!(symbol = %state.symbol, level = point.value, "Revisit alert throttled");
            continue;
        }
        point.last_alerted = Some(current.timestamp);
        hits.push(index);
    }

    hits.into_iter()
        .map(|index| {
            let point = &state.significant_points[index];
            ReversalEvent {
                reversal_type: point.reversal_type,
                level: point.value,
                rsi: current.rsi,
                price: current.price,
                timestamp: current.timestamp,
                registered: false,
                hit_count: point.hit_count,
                estimate: success_rate(&state.ledger, point.reversal_type, point.value),
            }
        })
        .collect()
}

/// Validate every record older than 30 minutes against `price`
///
/// Returns the number of records validated in this pass.
pub fn validate_signals(ledger: &mut ValidationLedger, price: f64, now: DateTime<Utc>) -> usize {
    let mut validated = 0;

    for record in ledger.records_mut().iter_mut() {
        if record.validated || now - record.timestamp < validation_delay() {
            continue;
        }
        if record.price <= 0.0 {
            continue;
        }

        let change = (price - record.price) / record.price;
        record.successful = match record.reversal_type {
            ReversalType::BottomReversal => change > VALIDATION_MOVE,
            ReversalType::TopReversal => change < -VALIDATION_MOVE,
        };
        record.price_change = Some(change);
        record.validated = true;
        validated += 1;
    }

    if validated > 0 {
        ledger.prune(MAX_VALIDATED_RECORDS);
    }
    validated
}

/// Lower bound of the Wilson score interval
pub fn wilson_lower_bound(successes: usize, samples: usize, z: f64) -> f64 {
    if samples == 0 {
        return 0.0;
    }
    let n = samples as f64;
    let p = successes as f64 / n;
    let z2 = z * z;

    let centre = p + z2 / (2.0 * n);
    let margin = z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt();
    ((centre - margin) / (1.0 + z2 / n)).clamp(0.0, 1.0)
}

/// Historical success of `reversal_type` signals near `level`
pub fn success_rate(ledger: &ValidationLedger, reversal_type: ReversalType, level: f64) -> SuccessEstimate {
    let (samples, successes) = ledger
        .validated()
        .filter(|r| r.reversal_type == reversal_type && (r.rsi_value - level).abs() <= PROXIMITY_BAND)
        .fold((0usize, 0usize), |(n, s), r| (n + 1, s + usize::from(r.successful)));

    estimate_from_counts(successes, samples)
}

/// Blend the Wilson bound toward 0.5 for small samples
pub fn estimate_from_counts(successes: usize, samples: usize) -> SuccessEstimate {
    if samples == 0 {
        return SuccessEstimate {
            samples: 0,
            raw_rate: 0.5,
            adjusted_rate: 0.5,
            confidence: 0.0,
        };
    }

    let n = samples as f64;
    let wilson = wilson_lower_bound(successes, samples, WILSON_Z);
    let adjusted_rate = if samples < MIN_CONFIDENT_SAMPLES {
        let min = MIN_CONFIDENT_SAMPLES as f64;
        (wilson * n + 0.5 * (min - n)) / min
    } else {
        wilson
    };

    SuccessEstimate {
        samples,
        raw_rate: successes as f64 / n,
        adjusted_rate,
        confidence: (n.sqrt() / 5.0).min(1.0),
    }
}

/// Full detector pass for a symbol that just opened a new minute bucket
pub fn process_new_minute(state: &mut SymbolState) -> Vec<DetectorEvent> {
    let Some(latest) = state.rsi_history.last().copied() else {
        return Vec::new();
    };
    let now = latest.timestamp;
    let mut events = Vec::new();

    validate_signals(&mut state.ledger, latest.price, now);

    if state.sma.is_reliable() {
        events.extend(
            detect_crossovers(&mut state.sma, latest.price, now)
                .into_iter()
                .map(DetectorEvent::Crossover),
        );
    }

    events.extend(check_revisits(state).into_iter().map(DetectorEvent::Reversal));

    if let Some(candidate) = detect_reversal(&state.rsi_history) {
        if let Some(event) = register_reversal(state, candidate, now) {
            events.push(DetectorEvent::Reversal(event));
        }
    }

    events
}
