use crate::pipeline::sampler::FrameSampler;
use crate::pipeline::types::Geotag;
use crate::video::VideoReader;
use anyhow::Result;
use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionStats {
    /// Sampling points produced by the sampler
    pub sampled_points: usize,
    pub frames_extracted: usize,
    /// Points dropped by the speed filter or a per-frame failure
    pub frames_skipped: usize,
    /// Frame at which sampling stopped for lack of trajectory data
    pub unresolved_at: Option<usize>,
    #[serde(skip)]
    pub duration: Duration,
}

/// A trait for handling geotagged frames. This separates the "what to do
/// with a frame" from the "which frames to read" logic.
pub trait FrameProcessor {
    fn process(&mut self, frame_index: usize, frame: RgbImage, geotag: &Geotag) -> Result<()>;
}

/// Blanket implementation so any closure with the right signature
/// automatically implements FrameProcessor.
impl<F> FrameProcessor for F
where
    F: FnMut(usize, RgbImage, &Geotag) -> Result<()>,
{
    fn process(&mut self, frame_index: usize, frame: RgbImage, geotag: &Geotag) -> Result<()> {
        self(frame_index, frame, geotag)
    }
}

pub struct VideoSession<'r> {
    pub reader: &'r mut dyn VideoReader,
    pub pb: ProgressBar,
    pub start_time: Instant,
}

impl<'r> VideoSession<'r> {
    pub fn new(reader: &'r mut dyn VideoReader, show_progress: bool) -> Result<Self> {
        let total_frames = reader.frame_count()?;
        let pb = if show_progress {
            ProgressBar::new(total_frames as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta})")?
                .progress_chars("#>-"),
        );

        Ok(Self {
            reader,
            pb,
            start_time: Instant::now(),
        })
    }
}

/// Drives the reader along the sampler's frame sequence, handing each
/// geotagged frame to `processor`. Per-frame failures are logged and
/// counted; only reader errors abort.
pub fn process_samples<P>(
    mut session: VideoSession<'_>,
    sampler: &mut FrameSampler<'_>,
    mut processor: P,
) -> Result<ExtractionStats>
where
    P: FrameProcessor,
{
    let mut stats = ExtractionStats::default();

    for point in sampler.by_ref() {
        stats.sampled_points += 1;
        session.pb.set_position(point.frame_index as u64);

        let Some(geotag) = point.geotag else {
            stats.frames_skipped += 1;
            continue;
        };
        let Some(frame) = session.reader.read_frame_at(point.frame_index)? else {
            tracing::debug!(
                "Video ended before frame {}; stopping extraction",
                point.frame_index
            );
            break;
        };
        match processor.process(point.frame_index, frame, &geotag) {
            Ok(()) => stats.frames_extracted += 1,
            Err(e) => {
                tracing::warn!("Failed to emit frame {}: {:#}", point.frame_index, e);
                stats.frames_skipped += 1;
            }
        }
    }

    stats.unresolved_at = sampler.unresolved_at();
    stats.duration = session.start_time.elapsed();
    session.pb.finish_and_clear();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sampler::SamplerConfig;
    use crate::pipeline::types::{sample, CadencePolicy, DenseSample, DenseTrajectory};
    use crate::video::fake::FakeReader;

    fn dense(seconds: usize, speed: f64) -> DenseTrajectory {
        DenseTrajectory {
            start: 0,
            samples: (0..seconds)
                .map(|i| DenseSample {
                    speed,
                    ..sample(i, 10.0, 20.0)
                })
                .collect(),
        }
    }

    fn config(frame_count: usize) -> SamplerConfig {
        SamplerConfig {
            cadence: CadencePolicy::Interval(1.0),
            fps: 10.0,
            frame_count,
            time_shift: 0.0,
            timezone_hours: 0.0,
            bearing_modifier: 0.0,
            recompute_bearing: false,
            min_speed: None,
        }
    }

    #[test]
    fn test_processor_sees_the_sampled_frames() {
        let trajectory = dense(10, 5.0);
        let mut reader = FakeReader::new(50, 10.0);
        let mut sampler = FrameSampler::new(&trajectory, config(50), "m", "n");
        let mut seen = Vec::new();

        let session = VideoSession::new(&mut reader, false).unwrap();
        let stats = process_samples(session, &mut sampler, |index: usize, frame: RgbImage, _: &Geotag| -> Result<()> {
            seen.push((index, frame.get_pixel(0, 0).0[0]));
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec![(0, 0), (10, 10), (20, 20), (30, 30), (40, 40)]);
        assert_eq!(stats.frames_extracted, 5);
        assert_eq!(stats.frames_skipped, 0);
        assert_eq!(stats.unresolved_at, None);
    }

    #[test]
    fn test_failures_and_slow_points_are_counted_as_skipped() {
        let trajectory = dense(10, 1.0);
        let mut reader = FakeReader::new(50, 10.0);
        let mut sampler = FrameSampler::new(
            &trajectory,
            SamplerConfig {
                min_speed: Some(0.5),
                ..config(50)
            },
            "",
            "",
        );
        let session = VideoSession::new(&mut reader, false).unwrap();
        let stats = process_samples(session, &mut sampler, |index: usize, _: RgbImage, _: &Geotag| -> Result<()> {
            if index == 20 {
                anyhow::bail!("disk full");
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(stats.sampled_points, 5);
        assert_eq!(stats.frames_extracted, 4);
        assert_eq!(stats.frames_skipped, 1);
    }

    #[test]
    fn test_unresolved_frame_is_reported() {
        // Trajectory covers 3 seconds of a 5 second video.
        let trajectory = dense(3, 5.0);
        let mut reader = FakeReader::new(50, 10.0);
        let mut sampler = FrameSampler::new(&trajectory, config(50), "", "");
        let session = VideoSession::new(&mut reader, false).unwrap();
        let stats = process_samples(session, &mut sampler, |_: usize, _: RgbImage, _: &Geotag| -> Result<()> { Ok(()) }).unwrap();
        assert_eq!(stats.frames_extracted, 3);
        assert_eq!(stats.unresolved_at, Some(30));
    }
}
