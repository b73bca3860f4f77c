// MP4/QuickTime box walking and whole-file magic scanning
//
// Box headers are parsed by the `mp4` crate; this module only tracks
// offsets and nesting. Both walkers are bounded by the file size, and a
// malformed header ends the walk of its container level instead of failing.

use super::read_up_to;
use mp4::{BoxHeader, FourCC, HEADER_SIZE};
use std::io::{self, Read, Seek, SeekFrom};

const CONTAINER_TYPES: [&[u8; 4]; 11] = [
    b"moov", b"trak", b"mdia", b"minf", b"stbl", b"udta", b"edts", b"dinf", b"mvex", b"moof",
    b"traf",
];
const MAX_BOXES: usize = 65_536;
const MAX_DEPTH: usize = 16;
const SCAN_CHUNK: usize = 1 << 20;

/// A located box: its type plus where its payload sits in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atom {
    pub fourcc: FourCC,
    /// File offset of the size field.
    pub offset: u64,
    pub payload_start: u64,
    pub payload_len: u64,
    pub depth: usize,
}

impl Atom {
    /// Never overflows: checked against the parent's end when the atom was read.
    pub fn end(&self) -> u64 {
        self.payload_start + self.payload_len
    }

    pub fn is_container(&self) -> bool {
        CONTAINER_TYPES.iter().any(|t| **t == self.fourcc.value)
    }

    pub fn is(&self, box_type: &[u8; 4]) -> bool {
        self.fourcc.value == *box_type
    }
}

/// Reads the box starting at `offset`, which must end by `parent_end`.
pub fn read_atom<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    parent_end: u64,
    depth: usize,
) -> io::Result<Option<Atom>> {
    if offset.checked_add(HEADER_SIZE).map_or(true, |h| h > parent_end) {
        return Ok(None);
    }
    reader.seek(SeekFrom::Start(offset))?;
    let header = match BoxHeader::read(reader) {
        Ok(header) => header,
        Err(e) => {
            tracing::debug!("Unreadable box header at {}: {}", offset, e);
            return Ok(None);
        }
    };
    let payload_start = reader.stream_position()?;
    let fourcc = FourCC::from(header.name);

    // The crate reports 64-bit sizes minus the extra 8 header bytes, so
    // `size - HEADER_SIZE` is the payload length for both header forms.
    let payload_len = if header.size == 0 {
        parent_end.checked_sub(payload_start)
    } else {
        header.size.checked_sub(HEADER_SIZE)
    };
    let end = payload_len.and_then(|len| payload_start.checked_add(len));

    match (payload_len, end) {
        (Some(payload_len), Some(end)) if end <= parent_end => Ok(Some(Atom {
            fourcc,
            offset,
            payload_start,
            payload_len,
            depth,
        })),
        _ => {
            tracing::debug!(
                "Malformed box {} at {} (size {}), stopping walk at this level",
                fourcc,
                offset,
                header.size
            );
            Ok(None)
        }
    }
}

/// Walks the whole box tree without recursion. Returns every atom in file
/// order.
pub fn walk<R: Read + Seek>(reader: &mut R) -> io::Result<Vec<Atom>> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    let mut out = Vec::new();
    let mut stack = vec![(0u64, file_len, 0usize)];

    while let Some((mut pos, end, depth)) = stack.pop() {
        while let Some(atom) = read_atom(reader, pos, end, depth)? {
            out.push(atom);
            if out.len() >= MAX_BOXES {
                tracing::warn!("Box walk stopped after {} boxes", MAX_BOXES);
                out.sort_by_key(|b| b.offset);
                return Ok(out);
            }
            if atom.is_container() && depth < MAX_DEPTH {
                stack.push((atom.payload_start, atom.end(), depth + 1));
            }
            pos = atom.end();
        }
    }

    out.sort_by_key(|b| b.offset);
    Ok(out)
}

/// Reads at most `limit` bytes of an atom's payload.
pub fn read_payload<R: Read + Seek>(reader: &mut R, atom: &Atom, limit: usize) -> io::Result<Vec<u8>> {
    let len = atom.payload_len.min(limit as u64) as usize;
    reader.seek(SeekFrom::Start(atom.payload_start))?;
    let mut payload = vec![0u8; len];
    let n = read_up_to(reader, &mut payload)?;
    payload.truncate(n);
    Ok(payload)
}

/// Positions of every occurrence of `needle` in `haystack`.
pub fn find_in<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    debug_assert!(!needle.is_empty());
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, w)| *w == needle)
        .map(|(i, _)| i)
}

/// Scans the whole source for `magic`, calling `on_match` with each file
/// offset until it returns `false`.
pub fn scan<R, F>(reader: &mut R, magic: &[u8], mut on_match: F) -> io::Result<()>
where
    R: Read + Seek,
    F: FnMut(u64) -> bool,
{
    reader.seek(SeekFrom::Start(0))?;
    let mut buf = vec![0u8; SCAN_CHUNK + magic.len()];
    let mut carry = 0usize;
    let mut base = 0u64;

    loop {
        let n = read_up_to(reader, &mut buf[carry..])?;
        if n == 0 {
            break;
        }
        let filled = carry + n;
        for pos in find_in(&buf[..filled], magic) {
            if !on_match(base + pos as u64) {
                return Ok(());
            }
        }
        // A full match cannot sit entirely inside the carried tail.
        let keep = (magic.len() - 1).min(filled);
        buf.copy_within(filled - keep..filled, 0);
        base += (filled - keep) as u64;
        carry = keep;
    }

    Ok(())
}

pub fn find_all<R: Read + Seek>(reader: &mut R, magic: &[u8]) -> io::Result<Vec<u64>> {
    let mut offsets = Vec::new();
    scan(reader, magic, |offset| {
        offsets.push(offset);
        true
    })?;
    Ok(offsets)
}

pub fn find_first<R: Read + Seek>(reader: &mut R, magic: &[u8]) -> io::Result<Option<u64>> {
    let mut found = None;
    scan(reader, magic, |offset| {
        found = Some(offset);
        false
    })?;
    Ok(found)
}

/// Builds a box from its type and payload. Used to assemble test fixtures.
#[cfg(test)]
pub(crate) fn make_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(box_type);
    out.extend_from_slice(payload);
    out
}
