//! On-disk layout of `.mvid` files.
//!
//! ```text
//! header       16 x u32 little-endian (64 bytes)
//! frame table  num_frames records, legacy (12 bytes) or large-file (24 bytes)
//! payloads     raw keyframes (optionally page aligned) and opcode streams
//! ```

use crate::error::{MvidError, Result};
use crate::pixels::Depth;

pub const MAGIC: u32 = 0xCAFE_BABE;

pub const HEADER_WORDS: usize = 16;
pub const HEADER_SIZE: usize = HEADER_WORDS * 4;

/// Alignment of raw keyframe payloads, so they can be mapped in place.
pub const PAGE_SIZE: u64 = 4096;

/// Largest frame length the legacy record can hold.
pub const MAX_24_BITS: u32 = 0x00FF_FFFF;

/// Upper bound on the frames in one file.
pub const MAX_FRAMES: u32 = 1 << 24;

/// Upper bound on `width * height`.
pub const MAX_FRAME_PIXELS: u64 = 1 << 26;

/// Newest version using the legacy record layout. 0-2 are older revisions of
/// the same layout.
pub const VERSION_LEGACY: u8 = 3;
pub const VERSION_LARGE: u8 = 4;

const FILE_FLAGS_SHIFT: u32 = 8;
pub const FILE_FLAG_ALL_KEYFRAMES: u32 = 0x2;
pub const FILE_FLAG_DELTAS: u32 = 0x4;

/// Header `versionAndFlags` word: version in bits 0-7, file flags from bit 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct VersionFlags(pub u32);

impl VersionFlags {
    pub fn new(version: u8, all_keyframes: bool, deltas: bool) -> Self {
        let mut flags = 0;
        if all_keyframes {
            flags |= FILE_FLAG_ALL_KEYFRAMES;
        }
        if deltas {
            flags |= FILE_FLAG_DELTAS;
        }
        Self(version as u32 | flags << FILE_FLAGS_SHIFT)
    }

    pub fn version(self) -> u8 {
        self.0 as u8
    }

    pub fn all_keyframes(self) -> bool {
        (self.0 >> FILE_FLAGS_SHIFT) & FILE_FLAG_ALL_KEYFRAMES != 0
    }

    pub fn deltas(self) -> bool {
        (self.0 >> FILE_FLAGS_SHIFT) & FILE_FLAG_DELTAS != 0
    }
}

/// The fixed-size file header.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct Header {
    pub magic: u32,
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    /// Display duration of every frame, in seconds.
    pub frame_duration: f32,
    pub num_frames: u32,
    pub version_flags: VersionFlags,
}

impl Header {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let words = [
            self.magic,
            self.width,
            self.height,
            self.bpp,
            self.frame_duration.to_bits(),
            self.num_frames,
            self.version_flags.0,
        ];
        let mut out = [0u8; HEADER_SIZE];
        for (slot, word) in out.chunks_exact_mut(4).zip(words) {
            slot.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decode without validation; see [`Header::validate`].
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let word = |i: usize| read_u32_le(bytes, i * 4);
        Self {
            magic: word(0),
            width: word(1),
            height: word(2),
            bpp: word(3),
            frame_duration: f32::from_bits(word(4)),
            num_frames: word(5),
            version_flags: VersionFlags(word(6)),
        }
    }

    /// Check magic, version, depth and dimensions, returning the record
    /// layout and pixel depth the header describes.
    pub fn validate(&self) -> Result<(RecordLayout, Depth)> {
        if self.magic != MAGIC {
            return Err(MvidError::BadMagic { got: self.magic });
        }
        let version = self.version_flags.version();
        let layout = RecordLayout::from_version(version).ok_or(MvidError::UnsupportedVersion {
            version: version as u32,
        })?;
        let depth = Depth::from_bits(self.bpp).ok_or(MvidError::UnsupportedBpp { bpp: self.bpp })?;
        check_dimensions(self.width, self.height)?;
        check_frame_count(self.num_frames as u64)?;
        Ok((layout, depth))
    }
}

/// Per-frame flags stored in a frame record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct FrameFlags(pub u32);

impl FrameFlags {
    pub const KEYFRAME: u32 = 0x1;
    pub const NOPFRAME: u32 = 0x2;
    pub const COMPRESSED: u32 = 0x4;

    pub fn keyframe(self) -> bool {
        self.0 & Self::KEYFRAME != 0
    }

    pub fn nop(self) -> bool {
        self.0 & Self::NOPFRAME != 0
    }

    pub fn compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }
}

/// One entry of the frame table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct FrameRecord {
    pub offset: u64,
    pub length: u32,
    pub flags: FrameFlags,
    /// Adler-32 of the decoded frame, 0 when absent.
    pub adler: u32,
}

impl FrameRecord {
    pub fn checksum(&self) -> Option<u32> {
        (self.adler != 0).then_some(self.adler)
    }
}

/// Frame table record format, selected by the header version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum RecordLayout {
    /// `offset:u32, length(24) | flags(8) << 24, adler:u32`
    Legacy,
    /// `offset:u64, length:u32, flags:u32, adler:u32, reserved:u32`
    Large,
}

impl RecordLayout {
    pub fn from_version(version: u8) -> Option<Self> {
        match version {
            0..=VERSION_LEGACY => Some(RecordLayout::Legacy),
            VERSION_LARGE => Some(RecordLayout::Large),
            _ => None,
        }
    }

    /// Version written for new files in this layout.
    pub fn version(self) -> u8 {
        match self {
            RecordLayout::Legacy => VERSION_LEGACY,
            RecordLayout::Large => VERSION_LARGE,
        }
    }

    pub fn record_size(self) -> usize {
        match self {
            RecordLayout::Legacy => 12,
            RecordLayout::Large => 24,
        }
    }

    /// Size of the header plus a table of `num_frames` records.
    pub fn table_end(self, num_frames: usize) -> u64 {
        (HEADER_SIZE + num_frames * self.record_size()) as u64
    }

    /// Append the encoded form of `record` (table entry `index`) to `out`.
    pub fn encode(self, index: usize, record: &FrameRecord, out: &mut Vec<u8>) -> Result<()> {
        match self {
            RecordLayout::Legacy => {
                let offset = u32::try_from(record.offset).map_err(|_| MvidError::OffsetTooLarge {
                    index,
                    offset: record.offset,
                })?;
                if record.length > MAX_24_BITS {
                    return Err(MvidError::FrameTooLarge {
                        index,
                        length: record.length as u64,
                    });
                }
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&(record.length | record.flags.0 << 24).to_le_bytes());
                out.extend_from_slice(&record.adler.to_le_bytes());
            }
            RecordLayout::Large => {
                out.extend_from_slice(&record.offset.to_le_bytes());
                out.extend_from_slice(&record.length.to_le_bytes());
                out.extend_from_slice(&record.flags.0.to_le_bytes());
                out.extend_from_slice(&record.adler.to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes());
            }
        }
        Ok(())
    }

    /// Decode one record from exactly [`record_size`](Self::record_size) bytes.
    pub fn decode(self, bytes: &[u8]) -> FrameRecord {
        assert_eq!(bytes.len(), self.record_size(), "frame record size");
        match self {
            RecordLayout::Legacy => {
                let packed = read_u32_le(bytes, 4);
                FrameRecord {
                    offset: read_u32_le(bytes, 0) as u64,
                    length: packed & MAX_24_BITS,
                    flags: FrameFlags(packed >> 24),
                    adler: read_u32_le(bytes, 8),
                }
            }
            RecordLayout::Large => FrameRecord {
                offset: u64::from_le_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]),
                length: read_u32_le(bytes, 8),
                flags: FrameFlags(read_u32_le(bytes, 12)),
                adler: read_u32_le(bytes, 16),
            },
        }
    }
}

/// Whether a frame of this geometry could overflow the legacy 24-bit length.
///
/// Raw keyframes take `width * height * storage_bytes`; the worst-case
/// compressed frame is bounded by twice that plus the terminating words.
pub fn requires_large_layout(width: u32, height: u32, depth: Depth) -> bool {
    depth.frame_bytes(width, height) * 2 + HEADER_SIZE as u64 > MAX_24_BITS as u64
}

/// Reject empty frames and frames larger than [`MAX_FRAME_PIXELS`].
pub fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width as u64 * height as u64 > MAX_FRAME_PIXELS {
        return Err(MvidError::InvalidDimensions { width, height });
    }
    Ok(())
}

pub fn check_frame_count(frames: u64) -> Result<()> {
    if frames > MAX_FRAMES as u64 {
        return Err(MvidError::FrameCountTooLarge {
            frames,
            limit: MAX_FRAMES,
        });
    }
    Ok(())
}

/// Round `offset` up to the next page boundary.
pub fn page_align(offset: u64) -> u64 {
    offset.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}
