// Dashcam telemetry: container sniffing, vendor detection and fix decoding
//
// Each vendor family has its own decoder module. They all feed a shared
// FixCollector so capture ordinals and validity filtering behave the same
// regardless of where the bytes came from.

pub mod boxes;
pub mod detect;
pub mod garmin;
pub mod nmea;
pub mod novatek;
pub mod ts;

use crate::error::TelemetryError;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// One decoded position record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RawFix {
    /// Record ordinal within the file, not wall time.
    pub capture_index: usize,
    /// Seconds since the Unix epoch (UTC).
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters per second.
    pub speed: f64,
    /// Degrees clockwise from north, [0, 360).
    pub bearing: f64,
    pub active: bool,
}

/// Active fixes keyed by capture index. Keys need not be contiguous.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseTrajectory {
    fixes: BTreeMap<usize, RawFix>,
}

impl SparseTrajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the fix under its capture index. Inactive fixes are refused.
    pub fn push(&mut self, fix: RawFix) -> bool {
        if !fix.active {
            return false;
        }
        self.fixes.insert(fix.capture_index, fix);
        true
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RawFix> {
        self.fixes.get(&index)
    }

    pub fn first_index(&self) -> Option<usize> {
        self.fixes.keys().next().copied()
    }

    pub fn last_index(&self) -> Option<usize> {
        self.fixes.keys().next_back().copied()
    }

    /// Number of fixes whose index is below `limit`.
    pub fn count_below(&self, limit: usize) -> usize {
        self.fixes.range(..limit).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &RawFix)> {
        self.fixes.iter().map(|(k, v)| (*k, v))
    }
}

impl FromIterator<RawFix> for SparseTrajectory {
    fn from_iter<I: IntoIterator<Item = RawFix>>(iter: I) -> Self {
        let mut track = SparseTrajectory::new();
        for fix in iter {
            track.push(fix);
        }
        track
    }
}

/// Output of a decoder run over one file.
#[derive(Debug, Clone, Default)]
pub struct DecodedTelemetry {
    pub fixes: SparseTrajectory,
    /// Active fixes retained.
    pub fix_count: usize,
    /// Records that were located in the byte stream, valid or not.
    pub records_seen: usize,
    /// Records dropped as inactive, malformed or out of order.
    pub records_dropped: usize,
}

/// Vendor encodings the decoders understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VendorFormat {
    Blueskysea,
    Viofo,
    ViofoS,
    Novatek,
    Garmin,
    Nmea,
    Nextbase,
}

impl VendorFormat {
    /// Single-letter device token used by the command line override.
    pub fn tag(&self) -> char {
        match self {
            Self::Blueskysea => 'B',
            Self::Viofo => 'V',
            Self::ViofoS => 'S',
            Self::Novatek => 'N',
            Self::Garmin => 'G',
            Self::Nmea => 'M',
            Self::Nextbase => 'X',
        }
    }

    pub fn make_model(&self) -> (&'static str, &'static str) {
        match self {
            Self::Blueskysea => ("Blueskysea", "B4K"),
            Self::Viofo => ("Viofo", "A119 V3"),
            Self::ViofoS => ("Viofo", "A119 S"),
            Self::Novatek => ("Novatek", "MP4"),
            Self::Garmin => ("Garmin", "Dash Cam"),
            Self::Nmea => ("NMEA", "MP4"),
            Self::Nextbase => ("Nextbase", "MP4"),
        }
    }

    /// Runs the decoder for this format over the whole byte source.
    pub fn decode<R: Read + Seek>(&self, reader: &mut R) -> io::Result<DecodedTelemetry> {
        reader.seek(SeekFrom::Start(0))?;
        match self {
            Self::Blueskysea => ts::decode(reader, ts::TsVariant::Blueskysea),
            Self::Viofo => ts::decode(reader, ts::TsVariant::Viofo),
            Self::ViofoS => ts::decode(reader, ts::TsVariant::ViofoS),
            Self::Novatek => novatek::decode(reader),
            Self::Garmin => garmin::decode(reader),
            Self::Nmea => nmea::decode_raw(reader),
            Self::Nextbase => nmea::decode_boxed(reader),
        }
    }
}

/// Detector verdict: which decoder to run and what to stamp into the images.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub format: VendorFormat,
    pub make: String,
    pub model: String,
}

impl From<VendorFormat> for Detection {
    fn from(format: VendorFormat) -> Self {
        let (make, model) = format.make_model();
        Self {
            format,
            make: make.to_string(),
            model: model.to_string(),
        }
    }
}

pub fn open_telemetry(path: &Path) -> Result<BufReader<File>, TelemetryError> {
    let file = File::open(path).map_err(|source| TelemetryError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Detects the vendor format of a file. An override skips detection entirely.
pub fn detect_file(
    path: &Path,
    device_override: Option<VendorFormat>,
) -> Result<Option<Detection>, TelemetryError> {
    if let Some(format) = device_override {
        return Ok(Some(Detection::from(format)));
    }
    let mut reader = open_telemetry(path)?;
    let extension = path.extension().and_then(|s| s.to_str());
    Ok(detect::detect(&mut reader, extension))
}

pub fn decode_file(path: &Path, format: VendorFormat) -> Result<DecodedTelemetry, TelemetryError> {
    let mut reader = open_telemetry(path)?;
    let decoded = format.decode(&mut reader)?;
    tracing::debug!(
        "Decoded {:?} from {}: {} records, {} fixes kept, {} dropped",
        format,
        path.display(),
        decoded.records_seen,
        decoded.fix_count,
        decoded.records_dropped
    );
    Ok(decoded)
}

// ---------------------------------------------------------------------------
// Shared record handling
// ---------------------------------------------------------------------------

/// Converts a degrees-and-decimal-minutes value (e.g. 4807.038 for 48°07.038')
/// into signed decimal degrees.
pub fn ddm_to_decimal(value: f64, hemisphere: u8) -> f64 {
    let minutes = value % 100.0;
    let degrees = value - minutes;
    let decimal = degrees / 100.0 + minutes / 60.0;
    match hemisphere {
        b'S' | b'W' => -decimal,
        _ => decimal,
    }
}

pub fn knots_to_mps(knots: f64) -> f64 {
    knots * 1.6 / 3.6
}

pub(crate) fn hemispheres_valid(lat_hem: u8, lon_hem: u8) -> bool {
    matches!(lat_hem, b'N' | b'S') && matches!(lon_hem, b'E' | b'W')
}

/// UTC epoch seconds for a calendar date and time, `None` when out of range.
pub(crate) fn utc_timestamp(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Option<f64> {
    let datetime = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    Some(datetime.and_utc().timestamp() as f64)
}

/// Fields shared by the fixed-offset binary layouts, before validation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BinaryRecord {
    pub timestamp: f64,
    pub active: u8,
    pub lat_hem: u8,
    pub lon_hem: u8,
    pub latitude_ddm: f64,
    pub longitude_ddm: f64,
    pub speed_knots: f64,
    pub bearing: f64,
}

impl BinaryRecord {
    pub fn into_fix(self) -> Option<RawFix> {
        if !hemispheres_valid(self.lat_hem, self.lon_hem) {
            return None;
        }
        if !(self.latitude_ddm.is_finite() && self.longitude_ddm.is_finite()) {
            return None;
        }
        let bearing = if self.bearing.is_finite() {
            self.bearing.rem_euclid(360.0)
        } else {
            0.0
        };
        let speed = if self.speed_knots.is_finite() {
            knots_to_mps(self.speed_knots)
        } else {
            0.0
        };
        Some(RawFix {
            capture_index: 0,
            timestamp: self.timestamp,
            latitude: ddm_to_decimal(self.latitude_ddm, self.lat_hem),
            longitude: ddm_to_decimal(self.longitude_ddm, self.lon_hem),
            speed,
            bearing: bearing % 360.0,
            active: self.active == b'A',
        })
    }
}

/// Assigns capture ordinals to located records and keeps the active ones.
#[derive(Debug, Default)]
pub(crate) struct FixCollector {
    fixes: SparseTrajectory,
    next_index: usize,
    dropped: usize,
}

impl FixCollector {
    /// Records one located record slot. `None` marks a malformed record; it
    /// still occupies an ordinal so later fixes keep their time position.
    pub fn record(&mut self, fix: Option<RawFix>) {
        let index = self.next_index;
        self.next_index += 1;
        match fix {
            Some(mut fix) => {
                fix.capture_index = index;
                if !self.fixes.push(fix) {
                    self.dropped += 1;
                }
            }
            None => {
                tracing::debug!("Dropping malformed telemetry record #{}", index);
                self.dropped += 1;
            }
        }
    }

    /// Counts a record that is discarded without taking an ordinal.
    pub fn reject(&mut self) {
        self.dropped += 1;
    }

    pub fn finish(self) -> DecodedTelemetry {
        DecodedTelemetry {
            fix_count: self.fixes.len(),
            records_seen: self.next_index,
            records_dropped: self.dropped,
            fixes: self.fixes,
        }
    }
}

pub(crate) fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(b)
}

pub(crate) fn le_f32(bytes: &[u8], offset: usize) -> f64 {
    f32::from_bits(le_u32(bytes, offset)) as f64
}

pub(crate) fn be_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_be_bytes(b)
}

pub(crate) fn be_f32(bytes: &[u8], offset: usize) -> f64 {
    f32::from_bits(be_u32(bytes, offset)) as f64
}

pub(crate) fn be_f64(bytes: &[u8], offset: usize) -> f64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[offset..offset + 8]);
    f64::from_be_bytes(b)
}

/// Reads until `buf` is full or the source is exhausted.
pub(crate) fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
