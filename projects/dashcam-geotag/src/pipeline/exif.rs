// JPEG encoding with an embedded Exif APP1 segment
//
// The Exif payload is a big-endian TIFF structure with three IFDs: IFD0
// (make, model and pointers), the Exif sub-IFD (capture time) and the GPS
// sub-IFD (position, speed and heading).

use crate::pipeline::types::Geotag;
use anyhow::{Context, Result};
use chrono::DateTime;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

const TYPE_BYTE: u16 = 1;
const TYPE_ASCII: u16 = 2;
const TYPE_LONG: u16 = 4;
const TYPE_RATIONAL: u16 = 5;

const TAG_MAKE: u16 = 0x010F;
const TAG_MODEL: u16 = 0x0110;
const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_GPS_IFD: u16 = 0x8825;
const TAG_DATETIME_ORIGINAL: u16 = 0x9003;

const GPS_VERSION_ID: u16 = 0x0000;
const GPS_LATITUDE_REF: u16 = 0x0001;
const GPS_LATITUDE: u16 = 0x0002;
const GPS_LONGITUDE_REF: u16 = 0x0003;
const GPS_LONGITUDE: u16 = 0x0004;
const GPS_SPEED_REF: u16 = 0x000C;
const GPS_SPEED: u16 = 0x000D;
const GPS_IMG_DIRECTION_REF: u16 = 0x0010;
const GPS_IMG_DIRECTION: u16 = 0x0011;
const GPS_DEST_BEARING_REF: u16 = 0x0017;
const GPS_DEST_BEARING: u16 = 0x0018;

/// Image-metadata collaborator: turns a frame and its geotag into file bytes.
pub trait GeotagWriter {
    fn write_geotag(&self, frame: &RgbImage, geotag: &Geotag) -> Result<Vec<u8>>;
}

/// Writes baseline JPEGs carrying the geotag as Exif.
#[derive(Debug, Clone, Copy)]
pub struct ExifJpegWriter {
    pub quality: u8,
}

impl GeotagWriter for ExifJpegWriter {
    fn write_geotag(&self, frame: &RgbImage, geotag: &Geotag) -> Result<Vec<u8>> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode_image(frame)
            .context("Failed to encode JPEG")?;
        splice_app1(&jpeg, &exif_tiff(geotag))
    }
}

struct Entry {
    tag: u16,
    kind: u16,
    count: u32,
    data: Vec<u8>,
}

impl Entry {
    fn ascii(tag: u16, text: &str) -> Self {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        Self {
            tag,
            kind: TYPE_ASCII,
            count: data.len() as u32,
            data,
        }
    }

    fn long(tag: u16, value: u32) -> Self {
        Self {
            tag,
            kind: TYPE_LONG,
            count: 1,
            data: value.to_be_bytes().to_vec(),
        }
    }

    fn rationals(tag: u16, values: &[(u32, u32)]) -> Self {
        let data = values
            .iter()
            .flat_map(|(n, d)| n.to_be_bytes().into_iter().chain(d.to_be_bytes()))
            .collect();
        Self {
            tag,
            kind: TYPE_RATIONAL,
            count: values.len() as u32,
            data,
        }
    }
}

#[derive(Default)]
struct Ifd {
    entries: Vec<Entry>,
}

impl Ifd {
    fn push(&mut self, entry: Entry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    fn overflow_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.data.len() > 4)
            .map(|e| e.data.len() + e.data.len() % 2)
            .sum()
    }

    fn len(&self) -> usize {
        2 + 12 * self.entries.len() + 4 + self.overflow_len()
    }

    /// Appends the IFD to `out`. Offsets are relative to the start of `out`.
    fn write(&mut self, out: &mut Vec<u8>) {
        self.entries.sort_by_key(|e| e.tag);
        let offset = out.len();
        let mut overflow_at = offset + 2 + 12 * self.entries.len() + 4;
        let mut overflow = Vec::new();

        out.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.tag.to_be_bytes());
            out.extend_from_slice(&entry.kind.to_be_bytes());
            out.extend_from_slice(&entry.count.to_be_bytes());
            if entry.data.len() <= 4 {
                let mut inline = [0u8; 4];
                inline[..entry.data.len()].copy_from_slice(&entry.data);
                out.extend_from_slice(&inline);
            } else {
                out.extend_from_slice(&(overflow_at as u32).to_be_bytes());
                overflow.extend_from_slice(&entry.data);
                if entry.data.len() % 2 == 1 {
                    overflow.push(0);
                }
                overflow_at += entry.data.len() + entry.data.len() % 2;
            }
        }
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&overflow);
    }
}

/// Splits absolute decimal degrees into degree, minute and second rationals.
fn to_dms(value: f64) -> [(u32, u32); 3] {
    let value = value.abs();
    let degrees = value.floor();
    let minutes_full = (value - degrees) * 60.0;
    let minutes = minutes_full.floor();
    let seconds = (minutes_full - minutes) * 60.0;
    [
        (degrees as u32, 1),
        (minutes as u32, 1),
        ((seconds * 1000.0).round() as u32, 1000),
    ]
}

fn hundredths(value: f64) -> (u32, u32) {
    ((value.max(0.0) * 100.0).round() as u32, 100)
}

fn exif_datetime(timestamp: f64) -> Option<String> {
    let datetime = DateTime::from_timestamp(timestamp.floor() as i64, 0)?;
    Some(datetime.format("%Y:%m:%d %H:%M:%S").to_string())
}

/// Builds the TIFF body of the Exif segment.
pub fn exif_tiff(geotag: &Geotag) -> Vec<u8> {
    let mut exif = Ifd::default();
    if let Some(datetime) = exif_datetime(geotag.timestamp) {
        exif.push(Entry::ascii(TAG_DATETIME_ORIGINAL, &datetime));
    }

    let bearing = match hundredths(geotag.bearing) {
        (36_000, den) => (0, den),
        other => other,
    };
    let mut gps = Ifd::default();
    gps.push(Entry {
        tag: GPS_VERSION_ID,
        kind: TYPE_BYTE,
        count: 4,
        data: vec![2, 3, 0, 0],
    })
    .push(Entry::ascii(
        GPS_LATITUDE_REF,
        if geotag.latitude < 0.0 { "S" } else { "N" },
    ))
    .push(Entry::rationals(GPS_LATITUDE, &to_dms(geotag.latitude)))
    .push(Entry::ascii(
        GPS_LONGITUDE_REF,
        if geotag.longitude < 0.0 { "W" } else { "E" },
    ))
    .push(Entry::rationals(GPS_LONGITUDE, &to_dms(geotag.longitude)))
    .push(Entry::ascii(GPS_SPEED_REF, "K"))
    .push(Entry::rationals(GPS_SPEED, &[hundredths(geotag.speed * 3.6)]))
    .push(Entry::ascii(GPS_IMG_DIRECTION_REF, "T"))
    .push(Entry::rationals(GPS_IMG_DIRECTION, &[bearing]))
    .push(Entry::ascii(GPS_DEST_BEARING_REF, "T"))
    .push(Entry::rationals(GPS_DEST_BEARING, &[bearing]));

    let mut ifd0 = Ifd::default();
    ifd0.push(Entry::ascii(TAG_MAKE, &geotag.make))
        .push(Entry::ascii(TAG_MODEL, &geotag.model))
        .push(Entry::long(TAG_EXIF_IFD, 0))
        .push(Entry::long(TAG_GPS_IFD, 0));

    // Pointer values do not change IFD sizes, so offsets are known up front.
    let exif_offset = 8 + ifd0.len();
    let gps_offset = exif_offset + exif.len();
    for entry in ifd0.entries.iter_mut() {
        match entry.tag {
            TAG_EXIF_IFD => entry.data = (exif_offset as u32).to_be_bytes().to_vec(),
            TAG_GPS_IFD => entry.data = (gps_offset as u32).to_be_bytes().to_vec(),
            _ => {}
        }
    }

    let mut tiff = Vec::with_capacity(gps_offset + gps.len());
    tiff.extend_from_slice(b"MM");
    tiff.extend_from_slice(&42u16.to_be_bytes());
    tiff.extend_from_slice(&8u32.to_be_bytes());
    ifd0.write(&mut tiff);
    exif.write(&mut tiff);
    gps.write(&mut tiff);
    tiff
}

/// Inserts an Exif APP1 segment right after the JPEG start-of-image marker.
pub fn splice_app1(jpeg: &[u8], tiff: &[u8]) -> Result<Vec<u8>> {
    if !jpeg.starts_with(&[0xFF, 0xD8]) {
        anyhow::bail!("Encoded image is not a JPEG stream");
    }
    let segment_len = 2 + 6 + tiff.len();
    let segment_len = u16::try_from(segment_len).context("Exif segment exceeds 64 KiB")?;

    let mut out = Vec::with_capacity(jpeg.len() + segment_len as usize + 2);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(tiff);
    out.extend_from_slice(&jpeg[2..]);
    Ok(out)
}
