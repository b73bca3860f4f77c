// MPEG transport-stream telemetry (Blueskysea B4K, Viofo A119 V3, Viofo A119S)
//
// The cameras mux a private stream whose 188-byte packets carry one GPS
// record at a fixed offset. Blueskysea splits the record across two
// consecutive packets; the Viofo variants keep it inside one.

use super::{le_f32, le_u32, utc_timestamp, BinaryRecord, DecodedTelemetry, FixCollector, RawFix};
use std::io::{self, Read};

pub const PACKET_SIZE: usize = 188;

pub(crate) const BLUESKYSEA_PREFIX: [u8; 3] = [0x47, 0x03, 0x00];
pub(crate) const VIOFO_PREFIX: [u8; 3] = [0x47, 0x43, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsVariant {
    Blueskysea,
    Viofo,
    ViofoS,
}

/// Byte offsets of a record that fits inside a single packet.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PacketLayout {
    hour: usize,
    minute: usize,
    second: usize,
    year: usize,
    month: usize,
    day: usize,
    active: usize,
    lat_hem: usize,
    lon_hem: usize,
    latitude: usize,
    longitude: usize,
    speed: usize,
    bearing: usize,
}

pub(crate) const VIOFO_LAYOUT: PacketLayout = PacketLayout {
    hour: 10,
    minute: 14,
    second: 18,
    year: 22,
    month: 26,
    day: 30,
    active: 34,
    lat_hem: 35,
    lon_hem: 36,
    latitude: 38,
    longitude: 42,
    speed: 46,
    bearing: 50,
};

pub(crate) const VIOFO_S_LAYOUT: PacketLayout = PacketLayout {
    hour: 132,
    minute: 136,
    second: 140,
    year: 144,
    month: 148,
    day: 152,
    active: 156,
    lat_hem: 157,
    lon_hem: 158,
    latitude: 160,
    longitude: 164,
    speed: 168,
    bearing: 172,
};

impl PacketLayout {
    pub(crate) fn hemispheres(&self, packet: &[u8]) -> (u8, u8) {
        (packet[self.lat_hem], packet[self.lon_hem])
    }

    fn parse(&self, packet: &[u8]) -> Option<RawFix> {
        let timestamp = utc_timestamp(
            2000 + le_u32(packet, self.year) as i32,
            le_u32(packet, self.month),
            le_u32(packet, self.day),
            le_u32(packet, self.hour),
            le_u32(packet, self.minute),
            le_u32(packet, self.second),
        )?;
        BinaryRecord {
            timestamp,
            active: packet[self.active],
            lat_hem: packet[self.lat_hem],
            lon_hem: packet[self.lon_hem],
            latitude_ddm: le_f32(packet, self.latitude),
            longitude_ddm: le_f32(packet, self.longitude),
            speed_knots: le_f32(packet, self.speed),
            bearing: le_f32(packet, self.bearing),
        }
        .into_fix()
    }
}

/// Blueskysea: the time of day sits at the tail of the previous packet and
/// the year is split across the boundary.
fn parse_straddled(prev: &[u8], cur: &[u8]) -> Option<RawFix> {
    let year = u32::from_le_bytes([prev[186], prev[187], cur[146], cur[147]]);
    let timestamp = utc_timestamp(
        2000 + year as i32,
        le_u32(cur, 148),
        le_u32(cur, 152),
        le_u32(prev, 174),
        le_u32(prev, 178),
        le_u32(prev, 182),
    )?;
    BinaryRecord {
        timestamp,
        active: cur[156],
        lat_hem: cur[157],
        lon_hem: cur[158],
        latitude_ddm: le_f32(cur, 160),
        longitude_ddm: le_f32(cur, 164),
        speed_knots: le_f32(cur, 168),
        bearing: le_f32(cur, 172),
    }
    .into_fix()
}

/// Reads the next whole packet. Returns `false` at end of stream; a trailing
/// partial packet counts as end of stream.
pub(crate) fn read_packet<R: Read>(reader: &mut R, packet: &mut [u8; PACKET_SIZE]) -> io::Result<bool> {
    match reader.read_exact(packet) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

pub fn decode<R: Read>(reader: &mut R, variant: TsVariant) -> io::Result<DecodedTelemetry> {
    let mut collector = FixCollector::default();
    let mut packet = [0u8; PACKET_SIZE];
    let mut prev: Option<[u8; PACKET_SIZE]> = None;

    while read_packet(reader, &mut packet)? {
        match variant {
            TsVariant::Blueskysea => {
                if packet.starts_with(&BLUESKYSEA_PREFIX) {
                    // The record's leading fields live in the preceding packet.
                    match prev.as_ref() {
                        Some(prev) => collector.record(parse_straddled(prev, &packet)),
                        None => collector.reject(),
                    }
                }
                prev = Some(packet);
            }
            TsVariant::Viofo => {
                if packet.starts_with(&VIOFO_PREFIX) {
                    collector.record(VIOFO_LAYOUT.parse(&packet));
                }
            }
            TsVariant::ViofoS => {
                if packet.starts_with(&VIOFO_PREFIX) {
                    collector.record(VIOFO_S_LAYOUT.parse(&packet));
                }
            }
        }
    }

    Ok(collector.finish())
}
