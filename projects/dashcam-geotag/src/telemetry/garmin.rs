// Garmin dashcam MP4 telemetry
//
// Fixes live in `GRMN` boxes as packed 32-byte big-endian records:
// epoch seconds, status bytes, then DDMM.mmmm doubles and knots/bearing floats.

use super::{be_f32, be_f64, be_u32, boxes, BinaryRecord, DecodedTelemetry, FixCollector, RawFix};
use std::io::{self, Read, Seek};

pub(crate) const BOX_TYPE: &[u8; 4] = b"GRMN";
const RECORD_LEN: usize = 32;
const MAX_PAYLOAD: usize = 64 << 20;

fn parse_record(record: &[u8]) -> Option<RawFix> {
    BinaryRecord {
        timestamp: be_u32(record, 0) as f64,
        active: record[4],
        lat_hem: record[5],
        lon_hem: record[6],
        latitude_ddm: be_f64(record, 8),
        longitude_ddm: be_f64(record, 16),
        speed_knots: be_f32(record, 24),
        bearing: be_f32(record, 28),
    }
    .into_fix()
}

pub fn decode<R: Read + Seek>(reader: &mut R) -> io::Result<DecodedTelemetry> {
    let headers = boxes::walk(reader)?;
    let mut collector = FixCollector::default();

    for header in headers.iter().filter(|h| h.is(BOX_TYPE)) {
        let payload = boxes::read_payload(reader, header, MAX_PAYLOAD)?;
        let records = payload.chunks_exact(RECORD_LEN);
        if !records.remainder().is_empty() {
            tracing::debug!(
                "GRMN box at {} has {} trailing bytes",
                header.offset,
                records.remainder().len()
            );
        }
        for record in records {
            collector.record(parse_record(record));
        }
    }

    Ok(collector.finish())
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub fn record(epoch: u32, active: u8, lat: f64, lon: f64, knots: f32, bearing: f32) -> Vec<u8> {
        let mut r = Vec::with_capacity(32);
        r.extend_from_slice(&epoch.to_be_bytes());
        r.extend_from_slice(&[active, b'S', b'E', 0]);
        r.extend_from_slice(&lat.to_be_bytes());
        r.extend_from_slice(&lon.to_be_bytes());
        r.extend_from_slice(&knots.to_be_bytes());
        r.extend_from_slice(&bearing.to_be_bytes());
        r
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::record;
    use super::*;
    use crate::telemetry::boxes::make_box;
    use std::io::Cursor;

    #[test]
    fn test_decode_grmn_records_inside_udta() {
        let payload = [
            record(1_700_000_000, b'A', 3352.0, 15112.5, 5.0, 45.0),
            record(1_700_000_001, b'V', 3352.0, 15112.5, 5.0, 45.0),
            record(1_700_000_002, b'A', 3352.5, 15113.0, 6.0, 400.0),
        ]
        .concat();
        let udta = make_box(b"udta", &make_box(b"GRMN", &payload));
        let file = [make_box(b"ftyp", b"isom"), make_box(b"moov", &udta)].concat();

        let decoded = decode(&mut Cursor::new(file)).unwrap();
        assert_eq!(decoded.records_seen, 3);
        assert_eq!(decoded.fix_count, 2);

        let first = decoded.fixes.get(0).unwrap();
        assert_eq!(first.timestamp, 1_700_000_000.0);
        assert!((first.latitude + (33.0 + 52.0 / 60.0)).abs() < 1e-9);
        assert!((first.longitude - (151.0 + 12.5 / 60.0)).abs() < 1e-9);

        let last = decoded.fixes.get(2).unwrap();
        assert!((last.bearing - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_file_without_grmn_box_decodes_empty() {
        let file = [make_box(b"ftyp", b"isom"), make_box(b"mdat", &[0; 40])].concat();
        let decoded = decode(&mut Cursor::new(file)).unwrap();
        assert_eq!(decoded.records_seen, 0);
        assert!(decoded.fixes.is_empty());
    }
}
