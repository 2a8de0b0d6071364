use thiserror::Error;

use crate::fourcc::FourCc;

/// Errors raised while reading or writing a `.mvid` container.
#[derive(Error, Debug)]
pub enum MvidError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic number: expected 0xCAFEBABE, got 0x{got:08X} (file missing or not finalized)")]
    BadMagic { got: u32 },

    #[error("unsupported file version {version}")]
    UnsupportedVersion { version: u32 },

    #[error("unsupported bits per pixel {bpp}: expected 16, 24 or 32")]
    UnsupportedBpp { bpp: u32 },

    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("frame index {index} out of range ({count} frames)")]
    FrameOutOfRange { index: usize, count: usize },

    #[error("frame {index} is {length} bytes, which does not fit the legacy 24-bit length field")]
    FrameTooLarge { index: usize, length: u64 },

    #[error("frame {index} starts at offset 0x{offset:X}, beyond the legacy 32-bit offset range")]
    OffsetTooLarge { index: usize, offset: u64 },

    #[error("frame table holds {expected} frames but {written} were written")]
    IncompleteFrameTable { expected: usize, written: usize },

    #[error("cannot append frame: all {expected} declared frames already written")]
    TooManyFrames { expected: usize },

    #[error("frame {index} is a no-op frame but has no preceding frame")]
    NopWithoutPredecessor { index: usize },

    #[error("frame {index} payload is {got} bytes, expected {expected}")]
    BadFrameLength { index: usize, expected: u64, got: u64 },

    #[error("frame {index} checksum mismatch: expected 0x{expected:08X}, got 0x{got:08X}")]
    ChecksumMismatch { index: usize, expected: u32, got: u32 },

    #[error("no keyframe at or before frame {index}")]
    NoKeyframe { index: usize },

    #[error("{frames} frames exceeds the limit of {limit}")]
    FrameCountTooLarge { frames: u64, limit: u32 },

    #[error("frame table of {frames} records ends at {table_end}, beyond the {file_len} byte file")]
    TruncatedFrameTable { frames: u32, table_end: u64, file_len: u64 },

    #[error("frame {index} payload ({length} bytes at 0x{offset:X}) extends beyond the {file_len} byte file")]
    PayloadOutOfBounds {
        index: usize,
        offset: u64,
        length: u32,
        file_len: u64,
    },
}

impl MvidError {
    /// Stable numeric code for presentation layers.
    pub fn code(&self) -> u32 {
        match self {
            MvidError::Io(_) => 100,
            MvidError::BadMagic { .. } => 101,
            MvidError::UnsupportedVersion { .. } => 102,
            MvidError::UnsupportedBpp { .. } => 103,
            MvidError::InvalidDimensions { .. } => 104,
            MvidError::FrameOutOfRange { .. } => 105,
            MvidError::FrameTooLarge { .. } => 106,
            MvidError::OffsetTooLarge { .. } => 107,
            MvidError::IncompleteFrameTable { .. } => 108,
            MvidError::TooManyFrames { .. } => 109,
            MvidError::NopWithoutPredecessor { .. } => 110,
            MvidError::BadFrameLength { .. } => 111,
            MvidError::ChecksumMismatch { .. } => 112,
            MvidError::NoKeyframe { .. } => 113,
            MvidError::FrameCountTooLarge { .. } => 114,
            MvidError::TruncatedFrameTable { .. } => 115,
            MvidError::PayloadOutOfBounds { .. } => 116,
        }
    }
}

/// Errors raised while validating a QuickTime Animation `.mov` file.
#[derive(Error, Debug)]
pub enum MovError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error reading atom '{atom}' at offset 0x{offset:X}: {source}")]
    IoAtOffset {
        atom: FourCc,
        offset: u64,
        source: std::io::Error,
    },

    #[error("atom at offset 0x{offset:X} has invalid size {size} (limit 0x{limit:X})")]
    BadAtomSize { offset: u64, size: u64, limit: u64 },

    #[error("atom '{atom}' is too short: need {expected} bytes, got {got}")]
    ShortAtom {
        atom: FourCc,
        expected: usize,
        got: usize,
    },

    #[error("required atom '{atom}' not found in '{parent}'")]
    MissingAtom { atom: FourCc, parent: FourCc },

    #[error("atom '{atom}' appears more than once in '{parent}'")]
    DuplicateAtom { atom: FourCc, parent: FourCc },

    #[error("only one track is supported, found a second 'trak'")]
    MultipleTracks,

    #[error("track has zero width or height, which indicates an audio track")]
    AudioTrack,

    #[error("'{atom}' field {field}: expected {expected}, found {found}")]
    Unsupported {
        atom: FourCc,
        field: &'static str,
        expected: String,
        found: String,
    },

    #[error("minimum sample duration of 1 tick is not supported, re-export the movie")]
    DegenerateFrameDuration,

    #[error("{samples} samples but only {frames} display frames (stale track data?)")]
    TooManySamples { samples: usize, frames: usize },

    #[error("sample table inconsistency: {0}")]
    SampleTable(String),

    #[error("sample {index} ({length} bytes at 0x{offset:X}) lies outside the 'mdat' payload")]
    SampleOutsideMdat { index: usize, offset: u64, length: u32 },

    #[error("sample {index} length {length} does not fit in 24 bits")]
    SampleTooLarge { index: usize, length: u32 },
}

impl MovError {
    /// Stable numeric code for presentation layers.
    pub fn code(&self) -> u32 {
        match self {
            MovError::Io(_) | MovError::IoAtOffset { .. } => 200,
            MovError::BadAtomSize { .. } => 201,
            MovError::ShortAtom { .. } => 202,
            MovError::MissingAtom { .. } => 203,
            MovError::DuplicateAtom { .. } => 204,
            MovError::MultipleTracks => 205,
            MovError::AudioTrack => 206,
            MovError::Unsupported { .. } => 207,
            MovError::DegenerateFrameDuration => 208,
            MovError::TooManySamples { .. } => 209,
            MovError::SampleTable(_) => 210,
            MovError::SampleOutsideMdat { .. } => 211,
            MovError::SampleTooLarge { .. } => 212,
        }
    }

    pub(crate) fn unsupported(
        atom: &[u8; 4],
        field: &'static str,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        MovError::Unsupported {
            atom: FourCc(*atom),
            field,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Errors raised while scanning or decoding an APNG file.
#[derive(Error, Debug)]
pub enum ApngError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a PNG file: bad signature")]
    BadSignature,

    #[error("chunk '{chunk}' at offset 0x{offset:X} is truncated")]
    Truncated { chunk: FourCc, offset: u64 },

    #[error("chunk '{chunk}' at offset 0x{offset:X}: CRC mismatch (expected 0x{expected:08X}, got 0x{got:08X})")]
    CrcMismatch {
        chunk: FourCc,
        offset: u64,
        expected: u32,
        got: u32,
    },

    #[error("required chunk '{0}' not found")]
    MissingChunk(FourCc),

    #[error("chunk '{chunk}' is malformed: {reason}")]
    Malformed { chunk: FourCc, reason: String },

    #[error("unsupported PNG format: {0}")]
    UnsupportedFormat(String),

    #[error("acTL declares {declared} frames but {found} fcTL chunks were found")]
    FrameCountMismatch { declared: u32, found: usize },

    #[error("animation needs at least 2 visible frames, found {0}")]
    TooFewFrames(usize),

    #[error("frame {index} region {width}x{height}+{x}+{y} exceeds the {canvas_width}x{canvas_height} canvas")]
    FrameOutOfBounds {
        index: usize,
        width: u32,
        height: u32,
        x: u32,
        y: u32,
        canvas_width: u32,
        canvas_height: u32,
    },

    #[error("frame {index}: compressed image data is corrupt: {reason}")]
    BadImageData { index: usize, reason: String },
}

impl ApngError {
    /// Stable numeric code for presentation layers.
    pub fn code(&self) -> u32 {
        match self {
            ApngError::Io(_) => 300,
            ApngError::BadSignature => 301,
            ApngError::Truncated { .. } => 302,
            ApngError::CrcMismatch { .. } => 303,
            ApngError::MissingChunk(_) => 304,
            ApngError::Malformed { .. } => 305,
            ApngError::UnsupportedFormat(_) => 306,
            ApngError::FrameCountMismatch { .. } => 307,
            ApngError::TooFewFrames(_) => 308,
            ApngError::FrameOutOfBounds { .. } => 309,
            ApngError::BadImageData { .. } => 310,
        }
    }

    pub(crate) fn malformed(chunk: &[u8; 4], reason: impl Into<String>) -> Self {
        ApngError::Malformed {
            chunk: FourCc(*chunk),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the conversion pipeline.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Mov(#[from] MovError),

    #[error("{0}")]
    Apng(#[from] ApngError),

    #[error("{0}")]
    Mvid(#[from] MvidError),

    #[error("unrecognised input format (expected a QuickTime .mov or a PNG/APNG file)")]
    UnknownFormat,
}

impl ConvertError {
    /// Numeric code of the underlying failure.
    pub fn code(&self) -> u32 {
        match self {
            ConvertError::Io(_) => 400,
            ConvertError::Mov(e) => e.code(),
            ConvertError::Apng(e) => e.code(),
            ConvertError::Mvid(e) => e.code(),
            ConvertError::UnknownFormat => 401,
        }
    }
}

pub type Result<T> = std::result::Result<T, MvidError>;
