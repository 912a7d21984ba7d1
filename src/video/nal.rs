//! Incremental H.264 Annex-B framing
//!
//! The device writes a raw elementary stream with no container and no length
//! prefixes, so unit boundaries are only known once the *next* start code has
//! arrived. [`NalFramer`] buffers the incomplete tail between reads and yields
//! every unit that is known to be complete, start code included (viewers feed
//! the bytes straight into their decoder).

use bytes::{Buf, Bytes, BytesMut};

/// H.264 NAL unit type, from the low 5 bits of the header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalType {
    /// Instantaneous decoder refresh (keyframe), type 5
    Idr,
    /// Sequence parameter set, type 7
    Sps,
    /// Picture parameter set, type 8
    Pps,
    /// Anything else
    Other(u8),
}

impl NalType {
    pub fn from_header(header: u8) -> Self {
        match header & 0x1f {
            5 => Self::Idr,
            7 => Self::Sps,
            8 => Self::Pps,
            other => Self::Other(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Self::Idr => 5,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Other(t) => t,
        }
    }
}

/// One complete NAL unit, including its leading start code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    data: Bytes,
    nal_type: NalType,
}

impl NalUnit {
    fn new(data: Bytes, start_code_len: usize) -> Self {
        let nal_type = data
            .get(start_code_len)
            .map(|h| NalType::from_header(*h))
            .unwrap_or(NalType::Other(0));
        Self { data, nal_type }
    }

    /// Parse a unit that starts with a 3- or 4-byte start code
    pub fn parse(data: Bytes) -> Option<Self> {
        let (pos, len) = find_start_code(&data, 0)?;
        (pos == 0).then(|| Self::new(data, len))
    }

    pub fn nal_type(&self) -> NalType {
        self.nal_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Incremental start-code framer
///
/// Invariant: once the first start code has been seen, `buf` always begins
/// with a start code of length `leading` and holds exactly one incomplete unit.
#[derive(Debug, Default)]
pub struct NalFramer {
    buf: BytesMut,
    /// Start code length at `buf[0]`, if `buf` begins with one
    leading: Option<usize>,
    /// Offset from which the next scan resumes; earlier offsets are settled
    scan_pos: usize,
}

impl NalFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data` and return every unit that is now complete
    pub fn ingest(&mut self, data: &[u8]) -> Vec<NalUnit> {
        self.buf.extend_from_slice(data);

        let mut markers: Vec<(usize, usize)> = Vec::new();
        if let Some(len) = self.leading {
            markers.push((0, len));
        }

        let mut cursor = self.scan_pos;
        while let Some((pos, len)) = find_start_code(&self.buf, cursor) {
            markers.push((pos, len));
            cursor = pos + len;
        }
        // A 4-byte code may still be completed by the next read, so the last
        // three offsets are re-examined next time.
        let scan_end = cursor.max(self.buf.len().saturating_sub(3));

        let Some(&(first_pos, _)) = markers.first() else {
            // No start code yet: nothing before one can belong to a unit, but
            // the last bytes may be the beginning of a start code.
            let keep = self.buf.len().min(3);
            let drop = self.buf.len() - keep;
            self.buf.advance(drop);
            self.scan_pos = 0;
            return Vec::new();
        };

        if first_pos > 0 {
            self.buf.advance(first_pos);
        }

        let mut units = Vec::with_capacity(markers.len().saturating_sub(1));
        for pair in markers.windows(2) {
            let (start, code_len) = pair[0];
            let (next, _) = pair[1];
            let unit = self.buf.split_to(next - start).freeze();
            units.push(NalUnit::new(unit, code_len));
        }

        let &(last_pos, last_len) = markers.last().unwrap_or(&(first_pos, 0));
        self.leading = Some(last_len);
        self.scan_pos = scan_end - last_pos;
        units
    }

    /// Bytes held for the next ingestion
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Forget buffered data (stream restarted)
    pub fn reset(&mut self) {
        self.buf.clear();
        self.leading = None;
        self.scan_pos = 0;
    }
}

/// Find the next Annex-B start code at or after `from`
///
/// Returns `(offset, length)`; a 4-byte code is preferred over the 3-byte
/// code it contains.
pub fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    if from >= data.len() {
        return None;
    }

    let mut i = from;
    while i + 3 <= data.len() {
        if i + 4 <= data.len()
            && data[i] == 0
            && data[i + 1] == 0
            && data[i + 2] == 0
            && data[i + 3] == 1
        {
            return Some((i, 4));
        }

        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            return Some((i, 3));
        }

        i += 1;
    }

    None
}

/// Latest parameter sets and keyframe, replayed to late joiners
#[derive(Debug, Clone, Default)]
pub struct StreamCache {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    keyframe: Option<Bytes>,
}

impl StreamCache {
    /// Record `unit` if it is one of the cached kinds (latest wins)
    pub fn observe(&mut self, unit: &NalUnit) {
        let slot = match unit.nal_type() {
            NalType::Sps => &mut self.sps,
            NalType::Pps => &mut self.pps,
            NalType::Idr => &mut self.keyframe,
            NalType::Other(_) => return,
        };
        *slot = Some(unit.data().clone());
    }

    /// Cached units in decoder order: SPS, PPS, keyframe
    pub fn catch_up(&self) -> Vec<Bytes> {
        [&self.sps, &self.pps, &self.keyframe]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Whether a joiner could start decoding from the cache alone
    pub fn is_complete(&self) -> bool {
        self.sps.is_some() && self.pps.is_some() && self.keyframe.is_some()
    }

    pub fn has_sps(&self) -> bool {
        self.sps.is_some()
    }

    pub fn has_pps(&self) -> bool {
        self.pps.is_some()
    }

    pub fn has_keyframe(&self) -> bool {
        self.keyframe.is_some()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
