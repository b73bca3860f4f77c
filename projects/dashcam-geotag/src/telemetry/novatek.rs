// Novatek-chipset MP4 telemetry
//
// Each GPS record is a `free` box whose payload starts with "GPS ". The
// record fields begin 16 bytes into the box, after the size, type and an
// 8-byte vendor preamble.

use super::{boxes, le_f32, le_u32, read_up_to, utc_timestamp, BinaryRecord, DecodedTelemetry, FixCollector, RawFix};
use std::io::{self, Read, Seek, SeekFrom};

pub(crate) const MAGIC: &[u8] = b"freeGPS ";
const RECORD_OFFSET: u64 = 12;
const RECORD_LEN: usize = 44;

fn parse_record(record: &[u8; RECORD_LEN]) -> Option<RawFix> {
    let timestamp = utc_timestamp(
        2000 + le_u32(record, 12) as i32,
        le_u32(record, 16),
        le_u32(record, 20),
        le_u32(record, 0),
        le_u32(record, 4),
        le_u32(record, 8),
    )?;
    BinaryRecord {
        timestamp,
        active: record[24],
        lat_hem: record[25],
        lon_hem: record[26],
        latitude_ddm: le_f32(record, 28),
        longitude_ddm: le_f32(record, 32),
        speed_knots: le_f32(record, 36),
        bearing: le_f32(record, 40),
    }
    .into_fix()
}

pub fn decode<R: Read + Seek>(reader: &mut R) -> io::Result<DecodedTelemetry> {
    let offsets = boxes::find_all(reader, MAGIC)?;
    let mut collector = FixCollector::default();
    let mut record = [0u8; RECORD_LEN];

    for offset in offsets {
        reader.seek(SeekFrom::Start(offset + RECORD_OFFSET))?;
        if read_up_to(reader, &mut record)? < RECORD_LEN {
            collector.record(None);
            continue;
        }
        collector.record(parse_record(&record));
    }

    Ok(collector.finish())
}
