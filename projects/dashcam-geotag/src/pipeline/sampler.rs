// Frame sampler: maps the video frame clock onto the dense trajectory
//
// The sampler is a lazy iterator over sampling points. A point either
// carries a geotag or marks a frame that was skipped by the speed filter.
// A frame that cannot be placed on the trajectory ends the sequence.

use crate::pipeline::geometry::{initial_bearing, normalize_bearing};
use crate::pipeline::types::{CadencePolicy, DenseSample, DenseTrajectory, Geotag};

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    pub cadence: CadencePolicy,
    pub fps: f64,
    pub frame_count: usize,
    /// Seconds added to the video clock before lookup
    pub time_shift: f64,
    pub timezone_hours: f64,
    pub bearing_modifier: f64,
    /// Use the heading between trajectory points instead of the decoded bearing
    pub recompute_bearing: bool,
    /// Meters per second; `None` disables the filter
    pub min_speed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplePoint {
    pub frame_index: usize,
    /// `None` when the speed filter dropped this point
    pub geotag: Option<Geotag>,
}

pub struct FrameSampler<'a> {
    dense: &'a DenseTrajectory,
    config: SamplerConfig,
    make: String,
    model: String,
    next_frame: usize,
    last_frame: Option<usize>,
    distance_target: Option<f64>,
    /// First sample worth checking for the next distance bracket
    search_from: usize,
    finished: bool,
    unresolved_at: Option<usize>,
}

impl<'a> FrameSampler<'a> {
    pub fn new(dense: &'a DenseTrajectory, config: SamplerConfig, make: &str, model: &str) -> Self {
        Self {
            dense,
            config,
            make: make.to_string(),
            model: model.to_string(),
            next_frame: 0,
            last_frame: None,
            distance_target: None,
            search_from: 0,
            finished: false,
            unresolved_at: None,
        }
    }

    /// Frame at which sampling gave up for lack of trajectory data.
    pub fn unresolved_at(&self) -> Option<usize> {
        self.unresolved_at
    }

    /// Interpolated trajectory state at a video frame.
    fn lookup(&self, frame: usize) -> Option<DenseSample> {
        let t = frame as f64 / self.config.fps + self.config.time_shift;
        if !t.is_finite() || t < 0.0 {
            return None;
        }
        let prev_index = t.floor() as usize;
        let position = t - prev_index as f64;

        let prev = self.dense.get(prev_index)?;
        let next = match self.dense.get(prev_index + 1) {
            Some(next) => next,
            None if position == 0.0 => prev,
            None => return None,
        };

        let mut state = prev.lerp(next, position);
        if self.config.recompute_bearing {
            let (from, to) = if next.index != prev.index {
                (prev, next)
            } else {
                (prev_index.checked_sub(1).and_then(|i| self.dense.get(i))?, prev)
            };
            state.bearing = initial_bearing((from.latitude, from.longitude), (to.latitude, to.longitude));
        }
        state.bearing = normalize_bearing(state.bearing + self.config.bearing_modifier);
        Some(state)
    }

    fn geotag(&self, state: &DenseSample) -> Geotag {
        Geotag {
            latitude: state.latitude,
            longitude: state.longitude,
            bearing: state.bearing,
            timestamp: state.timestamp + self.config.timezone_hours * 3600.0,
            speed: state.speed,
            make: self.make.clone(),
            model: self.model.clone(),
        }
    }

    fn give_up(&mut self, frame: usize) {
        tracing::warn!(
            "No trajectory data for frame {}; skipping it and all later frames",
            frame
        );
        self.unresolved_at = Some(frame);
        self.finished = true;
    }

    fn next_by_interval(&mut self, interval: f64) -> Option<SamplePoint> {
        let frame = self.next_frame;
        if frame >= self.config.frame_count {
            self.finished = true;
            return None;
        }
        let Some(state) = self.lookup(frame) else {
            self.give_up(frame);
            return None;
        };

        let step = (self.config.fps * interval).round().max(1.0) as usize;
        self.next_frame = frame + step;

        let below_min = self.config.min_speed.is_some_and(|min| state.speed < min);
        Some(SamplePoint {
            frame_index: frame,
            geotag: (!below_min).then(|| self.geotag(&state)),
        })
    }

    /// Fractional second at which the path reaches `target` meters.
    fn second_at_distance(&mut self, target: f64) -> Option<f64> {
        let samples = &self.dense.samples;
        for k in self.search_from..samples.len().saturating_sub(1) {
            let (a, b) = (&samples[k], &samples[k + 1]);
            if b.cumulative_distance > a.cumulative_distance
                && a.cumulative_distance <= target
                && target <= b.cumulative_distance
            {
                self.search_from = k;
                let fraction =
                    (target - a.cumulative_distance) / (b.cumulative_distance - a.cumulative_distance);
                return Some(a.index as f64 + fraction);
            }
        }
        None
    }

    /// Advances the distance target until it lands on a frame after the
    /// last emitted one. `None` once the path is exhausted.
    fn next_distance_frame(&mut self, meters: f64) -> Option<usize> {
        loop {
            let target = self.distance_target?;
            let second = self.second_at_distance(target)?;
            self.distance_target = Some(target + meters);
            let frame = ((second - self.config.time_shift) * self.config.fps).round();
            if frame < 0.0 || self.last_frame.is_some_and(|last| frame as usize <= last) {
                continue;
            }
            return Some(frame as usize);
        }
    }

    fn next_by_distance(&mut self, meters: f64) -> Option<SamplePoint> {
        let frame = if self.distance_target.is_none() {
            0
        } else {
            match self.next_distance_frame(meters) {
                Some(frame) => frame,
                None => {
                    self.finished = true;
                    return None;
                }
            }
        };

        if frame >= self.config.frame_count {
            self.finished = true;
            return None;
        }
        let Some(state) = self.lookup(frame) else {
            self.give_up(frame);
            return None;
        };
        if self.distance_target.is_none() {
            self.distance_target = Some(state.cumulative_distance + meters);
        }
        self.last_frame = Some(frame);

        Some(SamplePoint {
            frame_index: frame,
            geotag: Some(self.geotag(&state)),
        })
    }
}

impl Iterator for FrameSampler<'_> {
    type Item = SamplePoint;

    fn next(&mut self) -> Option<SamplePoint> {
        if self.finished {
            return None;
        }
        match self.config.cadence {
            CadencePolicy::Interval(seconds) => self.next_by_interval(seconds),
            CadencePolicy::Distance(meters) => self.next_by_distance(meters),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::sample;

    /// Straight eastward track, `step` meters per second.
    fn track(seconds: usize, step: f64, speed: f64) -> DenseTrajectory {
        DenseTrajectory {
            start: 0,
            samples: (0..seconds)
                .map(|i| DenseSample {
                    cumulative_distance: i as f64 * step,
                    speed,
                    bearing: 10.0,
                    ..sample(i, 0.0, i as f64 * 1e-4)
                })
                .collect(),
        }
    }

    fn config(cadence: CadencePolicy, frame_count: usize) -> SamplerConfig {
        SamplerConfig {
            cadence,
            fps: 30.0,
            frame_count,
            time_shift: 0.0,
            timezone_hours: 0.0,
            bearing_modifier: 0.0,
            recompute_bearing: false,
            min_speed: None,
        }
    }

    #[test]
    fn test_interval_cadence_walks_the_frame_clock() {
        let dense = track(11, 10.0, 10.0);
        let points: Vec<SamplePoint> =
            FrameSampler::new(&dense, config(CadencePolicy::Interval(1.0), 300), "Viofo", "A119 V3")
                .collect();

        let frames: Vec<usize> = points.iter().map(|p| p.frame_index).collect();
        assert_eq!(frames, (0..10).map(|i| i * 30).collect::<Vec<_>>());
        let tag = points[3].geotag.as_ref().unwrap();
        assert_eq!(tag.longitude, dense.get(3).unwrap().longitude);
        assert_eq!(tag.timestamp, 1_600_000_003.0);
        assert_eq!(tag.make, "Viofo");
        assert_eq!(tag.bearing, 10.0);
    }

    #[test]
    fn test_half_second_lookup_interpolates() {
        let dense = track(5, 10.0, 10.0);
        let mut sampler = FrameSampler::new(&dense, config(CadencePolicy::Interval(0.5), 60), "", "");
        sampler.next();
        let half = sampler.next().unwrap();
        assert_eq!(half.frame_index, 15);
        let tag = half.geotag.unwrap();
        assert!((tag.longitude - 0.5e-4).abs() < 1e-15);
        assert!((tag.timestamp - 1_600_000_000.5).abs() < 1e-6);
    }

    #[test]
    fn test_slow_samples_are_skipped_but_the_clock_advances() {
        let dense = track(6, 1.0, 1.0);
        let cfg = SamplerConfig {
            min_speed: Some(2.0),
            ..config(CadencePolicy::Interval(1.0), 150)
        };
        let points: Vec<SamplePoint> = FrameSampler::new(&dense, cfg, "", "").collect();
        assert_eq!(points.len(), 5);
        assert!(points.iter().all(|p| p.geotag.is_none()));
        assert_eq!(points[4].frame_index, 120);
    }

    #[test]
    fn test_distance_cadence_spaces_frames_by_meters() {
        let dense = track(11, 10.0, 10.0);
        let cfg = SamplerConfig {
            // The speed filter does not apply to distance spacing.
            min_speed: Some(50.0),
            ..config(CadencePolicy::Distance(20.0), 300)
        };
        let points: Vec<SamplePoint> = FrameSampler::new(&dense, cfg, "", "").collect();
        let frames: Vec<usize> = points.iter().map(|p| p.frame_index).collect();
        assert_eq!(frames, vec![0, 60, 120, 180, 240]);
        assert!(points.iter().all(|p| p.geotag.is_some()));
    }

    #[test]
    fn test_distance_cadence_stops_when_path_is_too_short() {
        // Eight meters in total against a ten meter spacing.
        let dense = track(5, 2.0, 2.0);
        let mut sampler = FrameSampler::new(&dense, config(CadencePolicy::Distance(10.0), 120), "", "");
        let first = sampler.next().unwrap();
        assert_eq!(first.frame_index, 0);
        assert!(sampler.next().is_none());
        assert!(sampler.next().is_none());
        assert_eq!(sampler.unresolved_at(), None);
    }

    #[test]
    fn test_missing_trajectory_stops_the_run() {
        let dense = track(4, 10.0, 10.0);
        let mut sampler = FrameSampler::new(&dense, config(CadencePolicy::Interval(1.0), 300), "", "");
        let frames: Vec<usize> = sampler.by_ref().map(|p| p.frame_index).collect();
        // Second 3 has no successor for a fractional lookup, but an exact
        // lookup on the last sample resolves.
        assert_eq!(frames, vec![0, 30, 60, 90]);
        assert_eq!(sampler.unresolved_at(), Some(120));
        assert!(sampler.next().is_none());
    }

    #[test]
    fn test_bearing_corrections_and_timezone() {
        let dense = track(5, 10.0, 10.0);
        let cfg = SamplerConfig {
            recompute_bearing: true,
            bearing_modifier: 180.0,
            timezone_hours: 2.0,
            time_shift: 1.0,
            ..config(CadencePolicy::Interval(1.0), 60)
        };
        let points: Vec<SamplePoint> = FrameSampler::new(&dense, cfg, "", "").collect();
        assert_eq!(points.len(), 2);
        let tag = points[0].geotag.as_ref().unwrap();
        // Heading east, flipped by the modifier.
        assert!((tag.bearing - 270.0).abs() < 1e-6);
        assert_eq!(tag.timestamp, 1_600_000_001.0 + 7200.0);

        let plain = FrameSampler::new(
            &dense,
            SamplerConfig {
                bearing_modifier: -20.0,
                ..config(CadencePolicy::Interval(1.0), 30)
            },
            "",
            "",
        )
        .next()
        .unwrap();
        assert_eq!(plain.geotag.unwrap().bearing, 350.0);
    }
}
