// Trajectory reconstruction: sparse fixes to a dense one-sample-per-second track
//
// Gap filling runs as separate passes over one slot vector (interior,
// leading, trailing), followed by distance accumulation.

use crate::error::ReconstructError;
use crate::pipeline::geometry::{ground_step, project};
use crate::pipeline::types::{DenseSample, DenseTrajectory, SampleOrigin};
use crate::telemetry::{RawFix, SparseTrajectory};

/// Seconds of leading/trailing extrapolation allowed past the recorded fixes.
pub const EXTRAPOLATION_MARGIN: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct ReconstructOptions {
    /// Percent of expected seconds that must carry a fix
    pub min_coverage_pct: f64,
    pub min_points: usize,
}

/// Whole seconds spanned by a video, rounded up.
pub fn expected_seconds(frame_count: usize, fps: f64) -> usize {
    if !(fps.is_finite() && fps > 0.0) {
        return 0;
    }
    (frame_count as f64 / fps).ceil() as usize
}

/// Percent of `[0, expected)` indices that carry a fix.
pub fn coverage_pct(sparse: &SparseTrajectory, expected: usize) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    sparse.count_below(expected) as f64 / expected as f64 * 100.0
}

fn recorded(fix: &RawFix) -> DenseSample {
    let planar = project(fix.longitude, fix.latitude);
    DenseSample {
        index: fix.capture_index,
        timestamp: fix.timestamp,
        latitude: fix.latitude,
        longitude: fix.longitude,
        planar_x: planar.x,
        planar_y: planar.y,
        bearing: fix.bearing,
        speed: fix.speed,
        cumulative_distance: 0.0,
        origin: SampleOrigin::Recorded,
    }
}

/// Interpolates every hole between two present slots.
fn fill_interior(slots: &mut [Option<DenseSample>], start: usize) {
    let present: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.as_ref().map(|_| i))
        .collect();

    for pair in present.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if next - prev < 2 {
            continue;
        }
        let (Some(a), Some(b)) = (slots[prev], slots[next]) else {
            continue;
        };
        for i in prev + 1..next {
            let position = (i - prev) as f64 / (next - prev) as f64;
            let mut filled = a.lerp(&b, position);
            filled.index = start + i;
            slots[i] = Some(filled);
        }
    }
}

/// Extrapolates backwards from the first present slot to slot 0.
fn fill_leading(slots: &mut [Option<DenseSample>], start: usize) {
    let Some(first) = slots.iter().position(Option::is_some) else {
        return;
    };
    for i in (0..first).rev() {
        match (slots[i + 1], slots.get(i + 2).copied().flatten()) {
            (Some(near), Some(far)) => slots[i] = Some(near.extrapolate_from(&far, start + i)),
            _ => return,
        }
    }
}

/// Extrapolates forwards from the last present slot to the end.
fn fill_trailing(slots: &mut [Option<DenseSample>], start: usize) {
    let Some(last) = slots.iter().rposition(Option::is_some) else {
        return;
    };
    for i in last + 1..slots.len() {
        let far = i.checked_sub(2).and_then(|j| slots[j]);
        match (slots[i - 1], far) {
            (Some(near), Some(far)) => slots[i] = Some(near.extrapolate_from(&far, start + i)),
            _ => return,
        }
    }
}

/// Fills `cumulative_distance` in index order; non-decreasing by construction.
fn accumulate_distance(samples: &mut [DenseSample]) {
    let mut total = 0.0;
    let mut prev_point = None;
    for sample in samples.iter_mut() {
        let point = project(sample.longitude, sample.latitude);
        if let Some(prev) = prev_point {
            total += ground_step(prev, point, sample.latitude);
        }
        sample.cumulative_distance = total;
        prev_point = Some(point);
    }
}

/// Builds the dense trajectory, or reports why it would be unsafe to.
pub fn reconstruct(
    sparse: &SparseTrajectory,
    expected: usize,
    options: &ReconstructOptions,
) -> Result<DenseTrajectory, ReconstructError> {
    let (Some(first), Some(last)) = (sparse.first_index(), sparse.last_index()) else {
        return Err(ReconstructError::Empty);
    };
    if expected == 0 {
        return Err(ReconstructError::ZeroDuration);
    }

    let required = options.min_points.max(2);
    if sparse.len() < required {
        return Err(ReconstructError::TooFewFixes {
            found: sparse.len(),
            required,
        });
    }

    let coverage = coverage_pct(sparse, expected);
    if coverage < options.min_coverage_pct {
        return Err(ReconstructError::InsufficientCoverage {
            coverage_pct: coverage,
            required_pct: options.min_coverage_pct,
        });
    }

    let start = first.saturating_sub(EXTRAPOLATION_MARGIN);
    // Trailing extrapolation stops short of 110% of the expected duration.
    let trailing_limit = (expected * 11).div_ceil(10) - 1;
    let end = (last + EXTRAPOLATION_MARGIN).min(trailing_limit).max(last);

    let mut slots: Vec<Option<DenseSample>> = vec![None; end - start + 1];
    for (index, fix) in sparse.iter() {
        slots[index - start] = Some(recorded(fix));
    }

    fill_interior(&mut slots, start);
    fill_leading(&mut slots, start);
    fill_trailing(&mut slots, start);

    let mut samples: Vec<DenseSample> = slots.into_iter().flatten().collect();
    debug_assert_eq!(samples.len(), end - start + 1);
    accumulate_distance(&mut samples);

    tracing::debug!(
        "Reconstructed {} samples over [{}, {}] from {} fixes ({:.1}% coverage)",
        samples.len(),
        start,
        end,
        sparse.len(),
        coverage
    );

    Ok(DenseTrajectory { start, samples })
}

#[cfg(test)]
pub(crate) fn fix(index: usize, latitude: f64, longitude: f64) -> RawFix {
    RawFix {
        capture_index: index,
        timestamp: 1_600_000_000.0 + index as f64,
        latitude,
        longitude,
        speed: 5.0,
        bearing: 90.0,
        active: true,
    }
}
