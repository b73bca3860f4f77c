use serde::Serialize;

/// How a dense sample came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOrigin {
    Recorded,
    Interpolated,
    Extrapolated,
}

/// One second of the reconstructed trajectory
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DenseSample {
    pub index: usize,
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Web-Mercator meters
    pub planar_x: f64,
    pub planar_y: f64,
    pub bearing: f64,
    pub speed: f64,
    /// Meters along the path from the first sample
    pub cumulative_distance: f64,
    pub origin: SampleOrigin,
}

impl DenseSample {
    /// Linear blend of every numeric field. `position` 0 returns `self`,
    /// 1 returns `other`, both exactly.
    pub fn lerp(&self, other: &DenseSample, position: f64) -> DenseSample {
        let mix = |a: f64, b: f64| a * (1.0 - position) + b * position;
        DenseSample {
            index: self.index,
            timestamp: mix(self.timestamp, other.timestamp),
            latitude: mix(self.latitude, other.latitude),
            longitude: mix(self.longitude, other.longitude),
            planar_x: mix(self.planar_x, other.planar_x),
            planar_y: mix(self.planar_y, other.planar_y),
            bearing: mix(self.bearing, other.bearing),
            speed: mix(self.speed, other.speed),
            cumulative_distance: mix(self.cumulative_distance, other.cumulative_distance),
            origin: SampleOrigin::Interpolated,
        }
    }

    /// Steps one sample further along the line from `far` through `self`.
    pub fn extrapolate_from(&self, far: &DenseSample, index: usize) -> DenseSample {
        let step = |near: f64, far: f64| near + (near - far);
        DenseSample {
            index,
            timestamp: step(self.timestamp, far.timestamp),
            latitude: step(self.latitude, far.latitude),
            longitude: step(self.longitude, far.longitude),
            planar_x: step(self.planar_x, far.planar_x),
            planar_y: step(self.planar_y, far.planar_y),
            bearing: step(self.bearing, far.bearing),
            speed: step(self.speed, far.speed).max(0.0),
            cumulative_distance: 0.0,
            origin: SampleOrigin::Extrapolated,
        }
    }
}

/// Contiguous second-indexed trajectory starting at `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseTrajectory {
    pub start: usize,
    pub samples: Vec<DenseSample>,
}

impl DenseTrajectory {
    pub fn get(&self, index: usize) -> Option<&DenseSample> {
        index
            .checked_sub(self.start)
            .and_then(|offset| self.samples.get(offset))
    }

    /// One past the last covered index.
    pub fn end(&self) -> usize {
        self.start + self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DenseSample> {
        self.samples.iter()
    }

    pub fn total_distance(&self) -> f64 {
        self.samples.last().map(|s| s.cumulative_distance).unwrap_or(0.0)
    }
}

/// Frame spacing rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum CadencePolicy {
    /// Seconds between frames
    Interval(f64),
    /// Meters between frames
    Distance(f64),
}

/// Per-frame payload handed to the image writer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Geotag {
    pub latitude: f64,
    pub longitude: f64,
    /// Degrees, [0, 360)
    pub bearing: f64,
    /// Epoch seconds, already offset by the configured timezone
    pub timestamp: f64,
    /// Meters per second
    pub speed: f64,
    pub make: String,
    pub model: String,
}

#[cfg(test)]
pub(crate) fn sample(index: usize, latitude: f64, longitude: f64) -> DenseSample {
    DenseSample {
        index,
        timestamp: 1_600_000_000.0 + index as f64,
        latitude,
        longitude,
        planar_x: 0.0,
        planar_y: 0.0,
        bearing: 0.0,
        speed: 0.0,
        cumulative_distance: 0.0,
        origin: SampleOrigin::Recorded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lerp_endpoints_are_exact() {
        let a = DenseSample {
            bearing: 350.0,
            speed: 3.3,
            planar_x: -12.75,
            cumulative_distance: 7.1,
            ..sample(3, 10.123_456_789, -73.987_654_321)
        };
        let b = DenseSample {
            bearing: 10.0,
            speed: 9.1,
            planar_x: 1e6 / 3.0,
            cumulative_distance: 21.9,
            ..sample(7, 10.2, -73.9)
        };
        let at0 = a.lerp(&b, 0.0);
        let at1 = a.lerp(&b, 1.0);
        for (got, want) in [(at0, a), (at1, b)] {
            assert_eq!(got.timestamp, want.timestamp);
            assert_eq!(got.latitude, want.latitude);
            assert_eq!(got.longitude, want.longitude);
            assert_eq!(got.planar_x, want.planar_x);
            assert_eq!(got.bearing, want.bearing);
            assert_eq!(got.speed, want.speed);
            assert_eq!(got.cumulative_distance, want.cumulative_distance);
        }
        // Bearing blends linearly, not along the short arc.
        assert_eq!(a.lerp(&b, 0.5).bearing, 180.0);
    }

    #[test]
    fn test_extrapolation_continues_the_line() {
        let far = sample(5, 10.0, 20.0);
        let near = sample(4, 10.5, 20.25);
        let next = near.extrapolate_from(&far, 3);
        assert_eq!(next.index, 3);
        assert_eq!(next.latitude, 11.0);
        assert_eq!(next.longitude, 20.5);
        assert_eq!(next.timestamp, far.timestamp - 2.0);
        assert_eq!(next.origin, SampleOrigin::Extrapolated);
    }

    #[test]
    fn test_dense_lookup_is_offset_by_start() {
        let dense = DenseTrajectory {
            start: 2,
            samples: vec![sample(2, 0.0, 0.0), sample(3, 1.0, 1.0)],
        };
        assert!(dense.get(1).is_none());
        assert_eq!(dense.get(3).map(|s| s.latitude), Some(1.0));
        assert!(dense.get(4).is_none());
        assert_eq!(dense.end(), 4);
    }
}
