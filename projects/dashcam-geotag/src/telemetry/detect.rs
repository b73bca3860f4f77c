// Signature detection: container sniffing and vendor identification
//
// Detection never fails. Read errors and unmatched signatures both end up as
// "no telemetry found" so the batch can move on to the next file.

use super::boxes::{self, Atom};
use super::ts::{self, PACKET_SIZE, VIOFO_LAYOUT, VIOFO_PREFIX, VIOFO_S_LAYOUT};
use super::{garmin, hemispheres_valid, nmea, novatek, read_up_to, Detection, VendorFormat};
use std::io::{self, Read, Seek, SeekFrom};

const VIOFO_MARKER: [u8; 5] = [0xB0, 0x0D, 0x30, 0x34, 0xC3];
const BLUESKYSEA_MARKER: [u8; 5] = [0x40, 0x1F, 0x4E, 0x54, 0x39];
const VIOFO_PROBE_PACKETS: usize = 4096;
const FREE_PAYLOAD_PEEK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    TransportStream,
    Boxed,
}

impl ContainerKind {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "ts" => Some(Self::TransportStream),
            "mp4" | "mov" => Some(Self::Boxed),
            _ => None,
        }
    }

    /// Classifies by content: sync bytes one packet apart, or an `ftyp` box.
    pub fn sniff<R: Read + Seek>(reader: &mut R) -> io::Result<Option<Self>> {
        reader.seek(SeekFrom::Start(0))?;
        let mut head = [0u8; PACKET_SIZE + 1];
        let n = read_up_to(reader, &mut head)?;
        if n > PACKET_SIZE && head[0] == 0x47 && head[PACKET_SIZE] == 0x47 {
            return Ok(Some(Self::TransportStream));
        }
        if n >= 8 && &head[4..8] == b"ftyp" {
            return Ok(Some(Self::Boxed));
        }
        Ok(None)
    }
}

/// Identifies the vendor format of a byte source. `extension` is a hint; an
/// unknown or missing hint falls back to content sniffing.
pub fn detect<R: Read + Seek>(reader: &mut R, extension: Option<&str>) -> Option<Detection> {
    match try_detect(reader, extension) {
        Ok(Some(format)) => Some(Detection::from(format)),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!("Detection aborted by read error: {}", e);
            None
        }
    }
}

fn try_detect<R: Read + Seek>(reader: &mut R, extension: Option<&str>) -> io::Result<Option<VendorFormat>> {
    let kind = match extension.and_then(ContainerKind::from_extension) {
        Some(kind) => Some(kind),
        None => ContainerKind::sniff(reader)?,
    };
    match kind {
        Some(ContainerKind::TransportStream) => detect_ts(reader),
        Some(ContainerKind::Boxed) => detect_boxed(reader),
        None => Ok(None),
    }
}

fn detect_ts<R: Read + Seek>(reader: &mut R) -> io::Result<Option<VendorFormat>> {
    reader.seek(SeekFrom::Start(0))?;
    let mut packet = [0u8; PACKET_SIZE];
    if !ts::read_packet(reader, &mut packet)? {
        return Ok(None);
    }

    if boxes::find_in(&packet, &BLUESKYSEA_MARKER).next().is_some() {
        return Ok(Some(VendorFormat::Blueskysea));
    }
    if boxes::find_in(&packet, &VIOFO_MARKER).next().is_none() {
        return Ok(None);
    }

    // Both Viofo models share the packet header; tell them apart by where
    // valid hemisphere letters sit.
    let mut probed = 0;
    loop {
        if packet.starts_with(&VIOFO_PREFIX) {
            let (lat, lon) = VIOFO_LAYOUT.hemispheres(&packet);
            if hemispheres_valid(lat, lon) {
                return Ok(Some(VendorFormat::Viofo));
            }
            let (lat, lon) = VIOFO_S_LAYOUT.hemispheres(&packet);
            if hemispheres_valid(lat, lon) {
                return Ok(Some(VendorFormat::ViofoS));
            }
        }
        probed += 1;
        if probed >= VIOFO_PROBE_PACKETS || !ts::read_packet(reader, &mut packet)? {
            break;
        }
    }
    Ok(Some(VendorFormat::Viofo))
}

fn free_payload_marks<R: Read + Seek>(
    reader: &mut R,
    headers: &[Atom],
) -> io::Result<Option<VendorFormat>> {
    for header in headers.iter().filter(|h| h.is(b"free")) {
        let payload = boxes::read_payload(reader, header, FREE_PAYLOAD_PEEK)?;
        if payload.starts_with(b"GPS ") {
            return Ok(Some(VendorFormat::Novatek));
        }
        let lower = payload.to_ascii_lowercase();
        if boxes::find_in(&lower, b"nextbase").next().is_some() {
            return Ok(Some(VendorFormat::Nextbase));
        }
    }
    Ok(None)
}

fn detect_boxed<R: Read + Seek>(reader: &mut R) -> io::Result<Option<VendorFormat>> {
    let headers = boxes::walk(reader)?;

    if headers.iter().any(|h| h.is(garmin::BOX_TYPE)) {
        return Ok(Some(VendorFormat::Garmin));
    }
    if headers.iter().any(|h| h.is(b"gps ")) {
        return Ok(Some(VendorFormat::Novatek));
    }
    if let Some(format) = free_payload_marks(reader, &headers)? {
        return Ok(Some(format));
    }
    if boxes::find_first(reader, novatek::MAGIC)?.is_some() {
        return Ok(Some(VendorFormat::Novatek));
    }
    if boxes::find_first(reader, nmea::MAGIC)?.is_some() {
        return Ok(Some(VendorFormat::Nmea));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::boxes::make_box;
    use crate::telemetry::nmea::fixtures::rmc;
    use crate::telemetry::ts::fixtures::{viofo_packet, viofo_s_packet, GpsRecord};
    use std::io::Cursor;

    fn first_packet(marker: &[u8]) -> [u8; PACKET_SIZE] {
        let mut p = [0u8; PACKET_SIZE];
        p[0] = 0x47;
        p[1] = 0x40;
        p[20..20 + marker.len()].copy_from_slice(marker);
        p
    }

    fn detect_bytes(bytes: &[u8], extension: Option<&str>) -> Option<VendorFormat> {
        detect(&mut Cursor::new(bytes), extension).map(|d| d.format)
    }

    #[test]
    fn test_unknown_ts_header_is_not_detected() {
        let mut stream = first_packet(&[1, 2, 3, 4, 5]).to_vec();
        stream.extend_from_slice(&viofo_packet(&GpsRecord::default()));
        assert_eq!(detect_bytes(&stream, Some("TS")), None);
    }

    #[test]
    fn test_blueskysea_marker() {
        let detection = detect(&mut Cursor::new(first_packet(&BLUESKYSEA_MARKER)), Some("ts")).unwrap();
        assert_eq!(detection.format, VendorFormat::Blueskysea);
        assert_eq!(detection.make, "Blueskysea");
        assert_eq!(detection.model, "B4K");
    }

    #[test]
    fn test_viofo_variants_told_apart_by_hemisphere_bytes() {
        let mut v = first_packet(&VIOFO_MARKER).to_vec();
        v.extend_from_slice(&viofo_packet(&GpsRecord::default()));
        assert_eq!(detect_bytes(&v, Some("ts")), Some(VendorFormat::Viofo));

        let mut s = first_packet(&VIOFO_MARKER).to_vec();
        s.extend_from_slice(&viofo_s_packet(&GpsRecord::default()));
        assert_eq!(detect_bytes(&s, None), Some(VendorFormat::ViofoS));

        // No GPS packets at all: the probe runs out and keeps V3.
        let bare = first_packet(&VIOFO_MARKER);
        assert_eq!(detect_bytes(&bare, Some("ts")), Some(VendorFormat::Viofo));
    }

    #[test]
    fn test_box_vendor_signatures() {
        let ftyp = make_box(b"ftyp", b"isom");

        let garmin = [ftyp.clone(), make_box(b"moov", &make_box(b"GRMN", &[]))].concat();
        assert_eq!(detect_bytes(&garmin, Some("mp4")), Some(VendorFormat::Garmin));

        let gps = [ftyp.clone(), make_box(b"moov", &make_box(b"gps ", &[0; 8]))].concat();
        assert_eq!(detect_bytes(&gps, Some("MOV")), Some(VendorFormat::Novatek));

        let free_gps = [ftyp.clone(), make_box(b"free", b"GPS \0\0\0\0")].concat();
        assert_eq!(detect_bytes(&free_gps, None), Some(VendorFormat::Novatek));

        let nextbase = [ftyp.clone(), make_box(b"free", b"\0\0NextBase 522GW")].concat();
        assert_eq!(detect_bytes(&nextbase, Some("mp4")), Some(VendorFormat::Nextbase));

        let sentence = rmc("080000", "A", "4000.000,N", "00300.000,W", "5", "010120");
        let nmea = [ftyp.clone(), make_box(b"mdat", sentence.as_bytes())].concat();
        assert_eq!(detect_bytes(&nmea, Some("mp4")), Some(VendorFormat::Nmea));

        let plain = [ftyp, make_box(b"mdat", &[0; 64])].concat();
        assert_eq!(detect_bytes(&plain, Some("mp4")), None);
    }

    #[test]
    fn test_garmin_box_wins_over_nmea_scan() {
        let sentence = rmc("080000", "A", "4000.000,N", "00300.000,W", "5", "010120");
        let file = [
            make_box(b"ftyp", b"isom"),
            make_box(b"mdat", sentence.as_bytes()),
            make_box(b"GRMN", &[]),
        ]
        .concat();
        assert_eq!(detect_bytes(&file, Some("mp4")), Some(VendorFormat::Garmin));
    }

    #[test]
    fn test_malformed_large_box_size_is_unknown() {
        let mut file = make_box(b"ftyp", b"isom");
        file.extend_from_slice(&1u32.to_be_bytes());
        file.extend_from_slice(b"free");
        file.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(detect_bytes(&file, Some("mp4")), None);
    }

    #[test]
    fn test_unsniffable_content_without_hint() {
        assert_eq!(detect_bytes(b"not a video", None), None);
        assert_eq!(detect_bytes(b"", Some("txt")), None);
    }
}
