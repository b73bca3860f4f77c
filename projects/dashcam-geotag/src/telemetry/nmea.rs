// NMEA `$GPRMC` telemetry, either as raw byte runs anywhere in the file or
// embedded in the payload of a vendor box (Nextbase)

use super::{boxes, ddm_to_decimal, knots_to_mps, read_up_to, utc_timestamp, DecodedTelemetry, FixCollector, RawFix};
use std::io::{self, Read, Seek, SeekFrom};

pub(crate) const MAGIC: &[u8] = b"$GPRMC";
const MAX_SENTENCE: usize = 128;
const MAX_PAYLOAD: usize = 16 << 20;

/// Extracts the sentence starting at the head of `bytes`: printable ASCII up
/// to the next line break, NUL or `$`.
fn sentence_at(bytes: &[u8]) -> Option<&str> {
    let len = bytes
        .iter()
        .take(MAX_SENTENCE)
        .enumerate()
        .skip(1)
        .find(|(_, b)| !(0x20..=0x7E).contains(*b) || **b == b'$')
        .map(|(i, _)| i)
        .unwrap_or_else(|| bytes.len().min(MAX_SENTENCE));
    std::str::from_utf8(&bytes[..len]).ok()
}

fn checksum_ok(sentence: &str) -> bool {
    let Some(body) = sentence.strip_prefix('$') else {
        return false;
    };
    let Some((data, expected)) = body.split_once('*') else {
        return true;
    };
    let Ok(expected) = u8::from_str_radix(expected.get(..2).unwrap_or(expected), 16) else {
        return false;
    };
    data.bytes().fold(0u8, |acc, b| acc ^ b) == expected
}

fn parse_time(field: &str) -> Option<(u32, u32, u32)> {
    let whole = field.split('.').next()?;
    if whole.len() != 6 {
        return None;
    }
    let hour = whole.get(0..2)?.parse().ok()?;
    let minute = whole.get(2..4)?.parse().ok()?;
    let second = whole.get(4..6)?.parse().ok()?;
    Some((hour, minute, second))
}

fn parse_date(field: &str) -> Option<(i32, u32, u32)> {
    if field.len() != 6 {
        return None;
    }
    let day = field.get(0..2)?.parse().ok()?;
    let month = field.get(2..4)?.parse().ok()?;
    let year: i32 = field.get(4..6)?.parse().ok()?;
    Some((2000 + year, month, day))
}

fn parse_coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    let hem = *hemisphere.as_bytes().first()?;
    let value: f64 = value.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(ddm_to_decimal(value, hem))
}

/// Optional numeric field; absent or unparsable values fall back to zero.
fn optional_number(field: Option<&str>) -> f64 {
    field
        .and_then(|f| f.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Parses one `$GPRMC` sentence. Position fields may be empty when the
/// status is `V`; the fix is then returned inactive so its timestamp still
/// counts.
pub fn parse_rmc(sentence: &str) -> Option<RawFix> {
    if !checksum_ok(sentence) {
        return None;
    }
    let data = sentence.split('*').next()?;
    let fields: Vec<&str> = data.split(',').collect();
    if fields.first() != Some(&"$GPRMC") || fields.len() < 10 {
        return None;
    }

    let (hour, minute, second) = parse_time(fields[1])?;
    let (year, month, day) = parse_date(fields[9])?;
    let fraction = fields[1]
        .split_once('.')
        .and_then(|(_, f)| format!("0.{}", f).parse::<f64>().ok())
        .unwrap_or(0.0);
    let timestamp = utc_timestamp(year, month, day, hour, minute, second)? + fraction;

    let active = fields[2] == "A";
    let position = parse_coordinate(fields[3], fields[4]).zip(parse_coordinate(fields[5], fields[6]));
    let (latitude, longitude) = match position {
        Some(p) => p,
        None if !active => (0.0, 0.0),
        None => return None,
    };
    if active && !(matches!(fields[4], "N" | "S") && matches!(fields[6], "E" | "W")) {
        return None;
    }

    Some(RawFix {
        capture_index: 0,
        timestamp,
        latitude,
        longitude,
        speed: knots_to_mps(optional_number(fields.get(7).copied())),
        bearing: optional_number(fields.get(8).copied()).rem_euclid(360.0) % 360.0,
        active,
    })
}

/// Applies the strictly-increasing timestamp filter in front of a collector.
#[derive(Default)]
struct SentenceCollector {
    inner: FixCollector,
    last_timestamp: Option<f64>,
}

impl SentenceCollector {
    fn push(&mut self, sentence: Option<&str>) {
        let Some(fix) = sentence.and_then(parse_rmc) else {
            self.inner.reject();
            return;
        };
        if self.last_timestamp.is_some_and(|last| fix.timestamp <= last) {
            tracing::debug!("Ignoring out-of-order NMEA fix at {}", fix.timestamp);
            self.inner.reject();
            return;
        }
        self.last_timestamp = Some(fix.timestamp);
        self.inner.record(Some(fix));
    }

    fn finish(self) -> DecodedTelemetry {
        self.inner.finish()
    }
}

/// Decodes every `$GPRMC` run found anywhere in the byte source.
pub fn decode_raw<R: Read + Seek>(reader: &mut R) -> io::Result<DecodedTelemetry> {
    let offsets = boxes::find_all(reader, MAGIC)?;
    let mut collector = SentenceCollector::default();
    let mut buf = [0u8; MAX_SENTENCE];

    for offset in offsets {
        reader.seek(SeekFrom::Start(offset))?;
        let n = read_up_to(reader, &mut buf)?;
        collector.push(sentence_at(&buf[..n]));
    }

    Ok(collector.finish())
}

/// Decodes `$GPRMC` runs found inside the payloads of non-media leaf boxes.
pub fn decode_boxed<R: Read + Seek>(reader: &mut R) -> io::Result<DecodedTelemetry> {
    let headers = boxes::walk(reader)?;
    let mut collector = SentenceCollector::default();

    for header in headers
        .iter()
        .filter(|h| !h.is_container() && !h.is(b"mdat"))
    {
        let payload = boxes::read_payload(reader, header, MAX_PAYLOAD)?;
        for pos in boxes::find_in(&payload, MAGIC) {
            collector.push(sentence_at(&payload[pos..]));
        }
    }

    Ok(collector.finish())
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Builds a checksummed `$GPRMC` sentence.
    pub fn rmc(time: &str, status: &str, lat: &str, lon: &str, knots: &str, date: &str) -> String {
        let body = format!(
            "GPRMC,{},{},{},{},{},,{}",
            time,
            status,
            lat,
            lon,
            knots,
            date
        );
        let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${}*{:02X}\r\n", body, sum)
    }
}
