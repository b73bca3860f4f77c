// Pipeline orchestrator: runs every stage for one video, then the batch
//
// Files are processed strictly one after another. Each file ends with a
// report in its output directory whatever the outcome; nothing a single
// file does stops the batch.

use crate::pipeline::crop::load_mask;
use crate::pipeline::diagnostics::{write_dense, write_sparse, DENSE_TABLE, RAW_TABLE};
use crate::pipeline::emitter::FrameEmitter;
use crate::pipeline::exif::ExifJpegWriter;
use crate::pipeline::reconstruct::{coverage_pct, expected_seconds, reconstruct};
use crate::pipeline::sampler::{FrameSampler, SamplerConfig};
use crate::pipeline::types::{DenseTrajectory, Geotag};
use crate::run_artifacts::{FileReport, FileStatus};
use crate::run_context::{prepare_output_dir, GeotagConfig};
use crate::telemetry::{decode_file, detect_file, SparseTrajectory};
use crate::video::processor::{process_samples, VideoSession};
use crate::video::{open_reader, VideoReader};
use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Processes every video in order and logs a one-line summary per file.
pub fn process_batch(videos: &[PathBuf], config: &GeotagConfig) -> Vec<FileReport> {
    let total = videos.len();
    let reports: Vec<FileReport> = videos
        .iter()
        .enumerate()
        .map(|(i, video)| {
            tracing::info!("[{}/{}] Processing {}", i + 1, total, video.display());
            process_file(video, config)
        })
        .collect();

    let processed = reports
        .iter()
        .filter(|r| r.status == FileStatus::Processed)
        .count();
    tracing::info!("Batch finished: {}/{} files processed", processed, total);
    for report in &reports {
        tracing::info!("  {}", report.summary());
    }
    reports
}

/// Processes one video with the configured video backend.
pub fn process_file(path: &Path, config: &GeotagConfig) -> FileReport {
    process_file_with(path, config, |video| open_reader(video, config.backend))
}

/// Same as [`process_file`], with the video reader supplied by `open_video`.
pub fn process_file_with<F>(path: &Path, config: &GeotagConfig, open_video: F) -> FileReport
where
    F: FnOnce(&Path) -> Result<Box<dyn VideoReader>>,
{
    let mut report = FileReport::new(path, config);

    let output_dir = match prepare_output_dir(&config.output_root, path, config.overwrite) {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!("{}: {:#}", path.display(), e);
            return report.with_status(FileStatus::Failed, format!("{:#}", e));
        }
    };

    if let Err(e) = run_stages(path, config, &output_dir, open_video, &mut report) {
        tracing::error!("{}: {:#}", path.display(), e);
        report = report.with_status(FileStatus::Failed, format!("{:#}", e));
    }

    if let Err(e) = report.save(&output_dir) {
        tracing::error!("Failed to save report for {}: {:#}", path.display(), e);
    }
    report
}

/// Runs the file through the stages, recording progress on `report`. Soft
/// outcomes (unrecognized, too sparse) set the status and return `Ok`.
fn run_stages<F>(
    path: &Path,
    config: &GeotagConfig,
    output_dir: &Path,
    open_video: F,
    report: &mut FileReport,
) -> Result<()>
where
    F: FnOnce(&Path) -> Result<Box<dyn VideoReader>>,
{
    let Some(detection) = detect_file(path, config.device)? else {
        tracing::info!("{}: no known telemetry signature", path.display());
        report.status = FileStatus::Unrecognized;
        report.message = Some("no known telemetry signature".to_string());
        return Ok(());
    };
    tracing::info!(
        "{}: {} {} telemetry ({:?})",
        path.display(),
        detection.make,
        detection.model,
        detection.format
    );
    report.detection = Some(detection.clone());

    let decoded = decode_file(path, detection.format)?;
    report.points_decoded = decoded.fix_count;
    if config.write_tables {
        write_sparse(&output_dir.join(RAW_TABLE), &decoded.fixes)?;
    }

    if config.telemetry_only {
        let expected = decoded.fixes.last_index().map_or(0, |last| last + 1);
        if let Some(dense) = reconstruct_checked(&decoded.fixes, expected, config, report) {
            write_dense_table(config, output_dir, &dense)?;
            tracing::info!(
                "{}: {} seconds of trajectory, {:.0} m",
                path.display(),
                dense.len(),
                dense.total_distance()
            );
        }
        return Ok(());
    }

    let mut reader = open_video(path).with_context(|| format!("Failed to open video {}", path.display()))?;
    let frame_count = reader.frame_count()?;
    let fps = reader.source_fps()?;
    let expected = expected_seconds(frame_count, fps);

    let Some(dense) = reconstruct_checked(&decoded.fixes, expected, config, report) else {
        return Ok(());
    };
    write_dense_table(config, output_dir, &dense)?;

    let mask = config.mask.as_deref().map(load_mask).transpose()?;
    let mut emitter = FrameEmitter::new(
        ExifJpegWriter {
            quality: config.jpeg_quality,
        },
        output_dir,
        &config.prefix,
    )
    .with_mask(mask)
    .with_crop(config.crop);

    let sampler_config = SamplerConfig {
        cadence: config.cadence,
        fps,
        frame_count,
        time_shift: config.time_shift,
        timezone_hours: config.timezone_hours,
        bearing_modifier: config.bearing_modifier,
        recompute_bearing: config.recompute_bearing,
        min_speed: config.min_speed,
    };
    let mut sampler = FrameSampler::new(&dense, sampler_config, &detection.make, &detection.model);

    let session = VideoSession::new(&mut *reader, true)?;
    let stats = process_samples(
        session,
        &mut sampler,
        |_: usize, frame: RgbImage, geotag: &Geotag| -> Result<()> {
            emitter.emit(frame, geotag)?;
            Ok(())
        },
    )?;

    // Frames on disk, as numbered by the emitter.
    report.frames_extracted = emitter.emitted();
    report.frames_skipped = stats.frames_skipped;
    report.unresolved_at = stats.unresolved_at;
    tracing::info!(
        "{}: extracted {} frames ({} skipped) in {:.2?}",
        path.display(),
        report.frames_extracted,
        stats.frames_skipped,
        stats.duration
    );
    Ok(())
}

/// Reconstructs the dense trajectory, or marks the report as too sparse.
fn reconstruct_checked(
    sparse: &SparseTrajectory,
    expected: usize,
    config: &GeotagConfig,
    report: &mut FileReport,
) -> Option<DenseTrajectory> {
    report.coverage_pct = Some(coverage_pct(sparse, expected));
    match reconstruct(sparse, expected, &config.reconstruct_options()) {
        Ok(dense) => Some(dense),
        Err(e) => {
            tracing::warn!("Not enough telemetry to reconstruct a trajectory: {}", e);
            report.status = FileStatus::InsufficientTelemetry;
            report.message = Some(e.to_string());
            None
        }
    }
}

fn write_dense_table(config: &GeotagConfig, output_dir: &Path, dense: &DenseTrajectory) -> Result<()> {
    if config.write_tables {
        write_dense(&output_dir.join(DENSE_TABLE), dense)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use crate::run_artifacts::REPORT_FILE;
    use crate::telemetry::boxes::make_box;
    use crate::telemetry::garmin::fixtures::record;
    use crate::video::fake::FakeReader;
    use clap::Parser;
    use std::fs;

    /// A box file carrying one Garmin record per second.
    fn garmin_video(dir: &Path, name: &str, seconds: u32) -> PathBuf {
        let payload: Vec<u8> = (0..seconds)
            .flat_map(|i| record(1_700_000_000 + i, b'A', 3352.0, 15112.0 + i as f64 * 0.01, 10.0, 90.0))
            .collect();
        let udta = make_box(b"udta", &make_box(b"GRMN", &payload));
        let bytes = [make_box(b"ftyp", b"isom"), make_box(b"moov", &udta), make_box(b"mdat", &[0; 64])].concat();
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn config(output_root: &Path, extra: &[&str]) -> GeotagConfig {
        let root = output_root.to_string_lossy().into_owned();
        let mut argv = vec!["dashcam-geotag", "--output-root", root.as_str()];
        argv.extend_from_slice(extra);
        argv.push("unused.mp4");
        GeotagConfig::from_args(&Args::try_parse_from(argv).unwrap()).unwrap()
    }

    fn fake(frames: usize) -> impl FnOnce(&Path) -> Result<Box<dyn VideoReader>> {
        move |_: &Path| Ok(Box::new(FakeReader::new(frames, 10.0)) as Box<dyn VideoReader>)
    }

    #[test]
    fn test_end_to_end_with_fake_video() {
        let inputs = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let video = garmin_video(inputs.path(), "drive.mp4", 10);
        let config = config(output.path(), &["--csv"]);

        let report = process_file_with(&video, &config, fake(100));
        assert_eq!(report.status, FileStatus::Processed, "{:?}", report.message);
        assert_eq!(report.points_decoded, 10);
        assert_eq!(report.frames_extracted, 10);
        assert_eq!(report.unresolved_at, None);
        assert_eq!(report.detection.as_ref().unwrap().make, "Garmin");

        let dir = output.path().join("drive");
        for i in 0..10 {
            let jpeg = fs::read(dir.join(format!("picture_{}.jpg", i))).unwrap();
            assert_eq!(&jpeg[..4], &[0xFF, 0xD8, 0xFF, 0xE1]);
        }
        assert!(dir.join(RAW_TABLE).exists());
        assert!(dir.join(DENSE_TABLE).exists());

        let saved: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(REPORT_FILE)).unwrap()).unwrap();
        assert_eq!(saved["status"], "processed");
        assert_eq!(saved["frames_extracted"], 10);
    }

    #[test]
    fn test_sparse_telemetry_is_reported_not_failed() {
        let inputs = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let video = garmin_video(inputs.path(), "short.mp4", 3);

        let report = process_file_with(&video, &config(output.path(), &[]), fake(100));
        assert_eq!(report.status, FileStatus::InsufficientTelemetry);
        assert_eq!(report.frames_extracted, 0);
        assert!(output.path().join("short").join(REPORT_FILE).exists());
    }

    #[test]
    fn test_unrecognized_file() {
        let inputs = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let video = inputs.path().join("plain.mp4");
        fs::write(&video, [make_box(b"ftyp", b"isom"), make_box(b"mdat", &[0; 64])].concat()).unwrap();

        let report = process_file_with(&video, &config(output.path(), &[]), fake(100));
        assert_eq!(report.status, FileStatus::Unrecognized);
        assert!(report.detection.is_none());
    }

    #[test]
    fn test_telemetry_only_never_opens_video() {
        let inputs = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let video = garmin_video(inputs.path(), "drive.mp4", 12);
        let config = config(output.path(), &["--telemetry-only", "--csv"]);

        let report = process_file_with(&video, &config, |_| anyhow::bail!("video must not be opened"));
        assert_eq!(report.status, FileStatus::Processed);
        assert_eq!(report.coverage_pct, Some(100.0));
        assert_eq!(report.frames_extracted, 0);
        assert!(output.path().join("drive").join(DENSE_TABLE).exists());
    }

    #[test]
    fn test_video_open_failure_is_per_file() {
        let inputs = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let video = garmin_video(inputs.path(), "drive.mp4", 10);

        let report = process_file_with(&video, &config(output.path(), &[]), |_| anyhow::bail!("codec missing"));
        assert_eq!(report.status, FileStatus::Failed);
        assert!(report.message.unwrap().contains("codec missing"));
    }

    #[test]
    fn test_batch_refuses_non_empty_output_without_overwrite() {
        let inputs = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let video = garmin_video(inputs.path(), "drive.mp4", 12);
        let config = config(output.path(), &["--telemetry-only"]);

        let reports = process_batch(&[video.clone(), video], &config);
        assert_eq!(reports[0].status, FileStatus::Processed);
        // The first run left report.json behind.
        assert_eq!(reports[1].status, FileStatus::Failed);
    }
}
