use crate::video::Backend;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Video files or directories to process (.ts, .mp4, .mov)
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Root directory for output artifacts; one subdirectory per video
    #[arg(long, env = "DASHCAM_GEOTAG_OUTPUT_ROOT", default_value = "output")]
    pub output_root: PathBuf,

    /// File name prefix for extracted frames
    #[arg(long, env = "DASHCAM_GEOTAG_PREFIX", default_value = "picture_")]
    pub prefix: String,

    /// Seconds between extracted frames
    #[arg(long, env = "DASHCAM_GEOTAG_SAMPLING_INTERVAL", conflicts_with = "metric_distance")]
    pub sampling_interval: Option<f64>,

    /// Meters travelled between extracted frames
    #[arg(long, env = "DASHCAM_GEOTAG_METRIC_DISTANCE")]
    pub metric_distance: Option<f64>,

    /// Seconds added to the video clock before trajectory lookup
    #[arg(long, env = "DASHCAM_GEOTAG_TIME_SHIFT", default_value_t = 0.0, allow_hyphen_values = true)]
    pub time_shift: f64,

    /// Hours added to the timestamps written into the images
    #[arg(long, env = "DASHCAM_GEOTAG_TIMEZONE", default_value_t = 0.0, allow_hyphen_values = true)]
    pub timezone: f64,

    /// Degrees added to every bearing
    #[arg(long, env = "DASHCAM_GEOTAG_BEARING_MODIFIER", default_value_t = 0.0, allow_hyphen_values = true)]
    pub bearing_modifier: f64,

    /// Derive bearing from consecutive trajectory points instead of the decoded value
    #[arg(long, env = "DASHCAM_GEOTAG_USE_BEARING_FROM_TRACK")]
    pub use_bearing_from_track: bool,

    /// Minimum speed (m/s) for a frame to be extracted; negative disables
    #[arg(long, env = "DASHCAM_GEOTAG_MIN_SPEED", default_value_t = -1.0, allow_hyphen_values = true)]
    pub min_speed: f64,

    /// Minimum percentage of expected seconds that must carry a fix
    #[arg(long, env = "DASHCAM_GEOTAG_MIN_COVERAGE", default_value_t = 90.0)]
    pub min_coverage: f64,

    /// Minimum number of fixes needed to reconstruct a trajectory
    #[arg(long, env = "DASHCAM_GEOTAG_MIN_POINTS", default_value_t = 10)]
    pub min_points: usize,

    /// Telemetry format override: auto, or a vendor name or letter (B, V, S, N, G, M, X)
    #[arg(long, env = "DASHCAM_GEOTAG_DEVICE", default_value = "auto")]
    pub device: String,

    /// Video decoding backend
    #[arg(long, env = "DASHCAM_GEOTAG_BACKEND", value_enum, default_value_t = Backend::Ffmpeg)]
    pub backend: Backend,

    /// Grayscale mask image; black pixels are blanked in every frame
    #[arg(long, env = "DASHCAM_GEOTAG_MASK")]
    pub mask: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    pub crop_top: u32,

    #[arg(long, default_value_t = 0)]
    pub crop_bottom: u32,

    #[arg(long, default_value_t = 0)]
    pub crop_left: u32,

    #[arg(long, default_value_t = 0)]
    pub crop_right: u32,

    /// Write raw and reconstructed trajectory tables next to the frames
    #[arg(long, env = "DASHCAM_GEOTAG_CSV")]
    pub csv: bool,

    /// Decode and reconstruct telemetry only; no video decoding
    #[arg(long)]
    pub telemetry_only: bool,

    /// Reuse a non-empty output directory
    #[arg(long)]
    pub overwrite: bool,

    #[arg(long, env = "DASHCAM_GEOTAG_JPEG_QUALITY", default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["dashcam-geotag", "clip.ts"]).unwrap();
        assert_eq!(args.inputs, vec![PathBuf::from("clip.ts")]);
        assert_eq!(args.prefix, "picture_");
        assert_eq!(args.min_speed, -1.0);
        assert_eq!(args.min_coverage, 90.0);
        assert_eq!(args.min_points, 10);
        assert_eq!(args.jpeg_quality, 90);
        assert!(args.sampling_interval.is_none());
    }

    #[test]
    fn test_cadence_flags_conflict() {
        let result = Args::try_parse_from([
            "dashcam-geotag",
            "--sampling-interval",
            "2",
            "--metric-distance",
            "5",
            "clip.ts",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_values_parse() {
        let args = Args::try_parse_from([
            "dashcam-geotag",
            "--time-shift",
            "-1.5",
            "--timezone",
            "-5",
            "clip.mp4",
        ])
        .unwrap();
        assert_eq!(args.time_shift, -1.5);
        assert_eq!(args.timezone, -5.0);
    }
}
