use crate::cli::Args;
use crate::pipeline::crop::CropMargins;
use crate::pipeline::reconstruct::ReconstructOptions;
use crate::pipeline::types::CadencePolicy;
use crate::telemetry::VendorFormat;
use crate::video::Backend;
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: [&str; 3] = ["ts", "mp4", "mov"];

/// Validated settings threaded through every per-file stage.
#[derive(Serialize, Debug, Clone)]
pub struct GeotagConfig {
    pub output_root: PathBuf,
    pub prefix: String,
    pub cadence: CadencePolicy,
    pub time_shift: f64,
    pub timezone_hours: f64,
    pub bearing_modifier: f64,
    pub recompute_bearing: bool,
    /// `None` when the speed filter is disabled
    pub min_speed: Option<f64>,
    pub min_coverage_pct: f64,
    pub min_points: usize,
    /// `None` means detect per file
    pub device: Option<VendorFormat>,
    pub backend: Backend,
    pub mask: Option<PathBuf>,
    pub crop: CropMargins,
    pub write_tables: bool,
    pub telemetry_only: bool,
    pub overwrite: bool,
    pub jpeg_quality: u8,
}

impl GeotagConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let cadence = match (args.sampling_interval, args.metric_distance) {
            (Some(_), Some(_)) => bail!("--sampling-interval and --metric-distance are mutually exclusive"),
            (None, Some(meters)) => CadencePolicy::Distance(meters),
            (Some(seconds), None) => CadencePolicy::Interval(seconds),
            (None, None) => CadencePolicy::Interval(1.0),
        };
        match cadence {
            CadencePolicy::Interval(v) | CadencePolicy::Distance(v) if !(v.is_finite() && v > 0.0) => {
                bail!("Sampling cadence must be a positive number, got {}", v)
            }
            _ => {}
        }

        if !(0.0..=100.0).contains(&args.min_coverage) {
            bail!("--min-coverage must be within 0..=100, got {}", args.min_coverage);
        }
        for (name, value) in [
            ("--time-shift", args.time_shift),
            ("--timezone", args.timezone),
            ("--bearing-modifier", args.bearing_modifier),
            ("--min-speed", args.min_speed),
        ] {
            if !value.is_finite() {
                bail!("{} must be a finite number", name);
            }
        }

        Ok(Self {
            output_root: args.output_root.clone(),
            prefix: args.prefix.clone(),
            cadence,
            time_shift: args.time_shift,
            timezone_hours: args.timezone,
            bearing_modifier: args.bearing_modifier,
            recompute_bearing: args.use_bearing_from_track,
            min_speed: (args.min_speed >= 0.0).then_some(args.min_speed),
            min_coverage_pct: args.min_coverage,
            min_points: args.min_points,
            device: parse_device(&args.device)?,
            backend: args.backend,
            mask: args.mask.clone(),
            crop: CropMargins {
                top: args.crop_top,
                bottom: args.crop_bottom,
                left: args.crop_left,
                right: args.crop_right,
            },
            write_tables: args.csv,
            telemetry_only: args.telemetry_only,
            overwrite: args.overwrite,
            jpeg_quality: args.jpeg_quality,
        })
    }

    pub fn reconstruct_options(&self) -> ReconstructOptions {
        ReconstructOptions {
            min_coverage_pct: self.min_coverage_pct,
            min_points: self.min_points,
        }
    }
}

/// Maps a `--device` token to a decoder. `auto` (or empty) leaves detection on.
pub fn parse_device(token: &str) -> Result<Option<VendorFormat>> {
    let format = match token.trim().to_ascii_lowercase().as_str() {
        "" | "auto" => return Ok(None),
        "b" | "blueskysea" => VendorFormat::Blueskysea,
        "v" | "viofo" => VendorFormat::Viofo,
        "s" | "viofo-s" => VendorFormat::ViofoS,
        "n" | "novatek" => VendorFormat::Novatek,
        "g" | "garmin" => VendorFormat::Garmin,
        "m" | "nmea" => VendorFormat::Nmea,
        "x" | "nextbase" => VendorFormat::Nextbase,
        _ => return Err(anyhow!("Unknown device '{}'", token)),
    };
    Ok(Some(format))
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| VIDEO_EXTENSIONS.contains(&s.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expands files and directories into a sorted, de-duplicated list of videos.
/// Files named explicitly are kept whatever their extension.
pub fn list_videos(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut videos = Vec::new();
    for input in inputs {
        if input.is_file() {
            videos.push(input.clone());
            continue;
        }
        if !input.is_dir() {
            tracing::warn!("Input {} does not exist, skipping", input.display());
            continue;
        }
        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| is_video(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        found.sort();
        videos.extend(found);
    }
    let mut seen = std::collections::HashSet::new();
    videos.retain(|p| seen.insert(p.clone()));
    videos
}

/// Creates `<output_root>/<stem>` for a video. A non-empty directory is only
/// reused when `overwrite` is set.
pub fn prepare_output_dir(output_root: &Path, video: &Path, overwrite: bool) -> Result<PathBuf> {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("Invalid video name: {}", video.display()))?;

    let output_dir = output_root.join(stem);
    if output_dir.exists() {
        let occupied = fs::read_dir(&output_dir)
            .with_context(|| format!("Failed to read {}", output_dir.display()))?
            .next()
            .is_some();
        if occupied && !overwrite {
            bail!(
                "Output directory {} is not empty (use --overwrite to reuse it)",
                output_dir.display()
            );
        }
    }

    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    Ok(output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["dashcam-geotag"];
        argv.extend_from_slice(extra);
        argv.push("clip.ts");
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = GeotagConfig::from_args(&args(&[])).unwrap();
        assert_eq!(config.cadence, CadencePolicy::Interval(1.0));
        assert_eq!(config.min_speed, None);
        assert_eq!(config.device, None);
        assert_eq!(config.crop, CropMargins::default());
    }

    #[test]
    fn test_config_distance_and_speed() {
        let config =
            GeotagConfig::from_args(&args(&["--metric-distance", "5", "--min-speed", "0", "--device", "G"])).unwrap();
        assert_eq!(config.cadence, CadencePolicy::Distance(5.0));
        assert_eq!(config.min_speed, Some(0.0));
        assert_eq!(config.device, Some(VendorFormat::Garmin));
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(GeotagConfig::from_args(&args(&["--sampling-interval", "0"])).is_err());
        assert!(GeotagConfig::from_args(&args(&["--min-coverage", "150"])).is_err());
        assert!(GeotagConfig::from_args(&args(&["--device", "tesla"])).is_err());
    }

    #[test]
    fn test_parse_device_tokens() {
        assert_eq!(parse_device("auto").unwrap(), None);
        assert_eq!(parse_device("viofo-s").unwrap(), Some(VendorFormat::ViofoS));
        assert_eq!(parse_device("x").unwrap(), Some(VendorFormat::Nextbase));
        assert_eq!(parse_device("Blueskysea").unwrap(), Some(VendorFormat::Blueskysea));
    }

    #[test]
    fn test_list_videos_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("day1");
        fs::create_dir_all(&nested).unwrap();
        for name in ["a.TS", "b.mp4", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::write(nested.join("c.mov"), b"").unwrap();

        let explicit = dir.path().join("notes.txt");
        let videos = list_videos(&[dir.path().to_path_buf(), explicit.clone(), dir.path().join("b.mp4")]);
        let names: Vec<_> = videos
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.TS", "b.mp4", "c.mov", "notes.txt"]);
    }

    #[test]
    fn test_prepare_output_dir_refuses_non_empty() {
        let root = tempfile::tempdir().unwrap();
        let video = Path::new("/videos/drive.mp4");

        let dir = prepare_output_dir(root.path(), video, false).unwrap();
        assert_eq!(dir, root.path().join("drive"));
        // Empty directories are reused silently.
        prepare_output_dir(root.path(), video, false).unwrap();

        fs::write(dir.join("picture_0.jpg"), b"x").unwrap();
        assert!(prepare_output_dir(root.path(), video, false).is_err());
        assert!(prepare_output_dir(root.path(), video, true).is_ok());
    }
}
