//! QuickTime `.mov` parsing, restricted to single-track Animation movies.
//!
//! Only the `moov` atom is loaded into memory; `mdat` is located but its
//! payload is read one sample at a time.

use std::io::{Read, Seek, SeekFrom};

use crate::error::MovError;
use crate::fourcc::FourCc;
use crate::pixels::Depth;
use crate::sample_table::{SampleTables, map_frames};

type Result<T> = std::result::Result<T, MovError>;

/// Widest and tallest track accepted.
pub const MAX_DIMENSION: u32 = 2000;

const FILE: FourCc = FourCc::new(b"file");

/// Graphics modes for which pixels are copied unmodified.
const GRAPHICS_MODE_COPY: u16 = 0x0000;
const GRAPHICS_MODE_DITHER_COPY: u16 = 0x0040;

/// One compressed Animation sample inside `mdat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct Sample {
    pub offset: u64,
    pub length: u32,
    pub keyframe: bool,
}

/// The validated video track of an Animation movie.
#[derive(Debug, Clone, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct MovFile {
    pub width: u32,
    pub height: u32,
    pub depth: Depth,
    /// Media time scale, in ticks per second.
    pub time_scale: u32,
    /// Display duration of one frame in media ticks: the shortest sample
    /// duration in the track.
    pub frame_ticks: u32,
    pub samples: Vec<Sample>,
    /// Sample index shown for each display frame.
    pub frame_samples: Vec<usize>,
}

impl MovFile {
    pub fn frame_count(&self) -> usize {
        self.frame_samples.len()
    }

    /// Display duration of one frame in seconds.
    pub fn frame_duration(&self) -> f32 {
        (self.frame_ticks as f64 / self.time_scale as f64) as f32
    }

    pub fn read_sample<R: Read + Seek>(&self, reader: &mut R, index: usize) -> Result<Vec<u8>> {
        let sample = self.samples[index];
        let mut data = vec![0u8; sample.length as usize];
        reader
            .seek(SeekFrom::Start(sample.offset))
            .and_then(|_| reader.read_exact(&mut data))
            .map_err(|source| MovError::IoAtOffset {
                atom: FourCc::new(b"mdat"),
                offset: sample.offset,
                source,
            })?;
        Ok(data)
    }
}

/// Payload of an atom held in memory, with its absolute file position.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AtomData<'a> {
    pub kind: FourCc,
    /// Absolute offset of `data[0]`.
    pub offset: u64,
    pub data: &'a [u8],
}

impl<'a> AtomData<'a> {
    pub fn bytes(&self, at: usize, len: usize) -> Result<&'a [u8]> {
        self.data.get(at..at + len).ok_or(MovError::ShortAtom {
            atom: self.kind,
            expected: at + len,
            got: self.data.len(),
        })
    }

    pub fn u8(&self, at: usize) -> Result<u8> {
        Ok(self.bytes(at, 1)?[0])
    }

    pub fn u16(&self, at: usize) -> Result<u16> {
        let b = self.bytes(at, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&self, at: usize) -> Result<u32> {
        let b = self.bytes(at, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&self, at: usize) -> Result<u64> {
        let b = self.bytes(at, 8)?;
        Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    pub fn fourcc(&self, at: usize) -> Result<FourCc> {
        Ok(FourCc::from_be_u32(self.u32(at)?))
    }

    /// Version byte of a full atom; only version 0 layouts are understood.
    pub fn require_version0(&self) -> Result<()> {
        match self.u8(0)? {
            0 => Ok(()),
            v => Err(MovError::unsupported(self.kind.as_bytes(), "version", 0, v)),
        }
    }

    /// Split the payload into child atoms. Fewer than 8 trailing bytes are
    /// ignored (QuickTime permits a zero terminator word).
    pub fn children(&self) -> Result<Vec<AtomData<'a>>> {
        let mut out = Vec::new();
        let mut pos = 0usize;
        let limit = self.offset + self.data.len() as u64;
        while self.data.len() - pos >= 8 {
            let start = self.offset + pos as u64;
            let size32 = self.u32(pos)?;
            let kind = self.fourcc(pos + 4)?;
            let (size, header_len) = match size32 {
                0 => ((self.data.len() - pos) as u64, 8),
                1 => (self.u64(pos + 8)?, 16),
                n => (n as u64, 8),
            };
            if size < header_len as u64 || size > (self.data.len() - pos) as u64 {
                return Err(MovError::BadAtomSize {
                    offset: start,
                    size,
                    limit,
                });
            }
            let end = pos + size as usize;
            out.push(AtomData {
                kind,
                offset: start + header_len as u64,
                data: &self.data[pos + header_len..end],
            });
            pos = end;
        }
        Ok(out)
    }
}

pub(crate) fn find<'a>(children: &[AtomData<'a>], kind: &[u8; 4], parent: FourCc) -> Result<Option<AtomData<'a>>> {
    let mut matches = children.iter().filter(|a| a.kind == *kind);
    let first = matches.next().copied();
    if matches.next().is_some() {
        return Err(MovError::DuplicateAtom {
            atom: FourCc::new(kind),
            parent,
        });
    }
    Ok(first)
}

pub(crate) fn require<'a>(children: &[AtomData<'a>], kind: &[u8; 4], parent: FourCc) -> Result<AtomData<'a>> {
    find(children, kind, parent)?.ok_or(MovError::MissingAtom {
        atom: FourCc::new(kind),
        parent,
    })
}

/// Walk into `path` from `root`, requiring each step to exist exactly once.
fn descend<'a>(root: AtomData<'a>, path: &[&[u8; 4]]) -> Result<AtomData<'a>> {
    path.iter().try_fold(root, |atom, kind| require(&atom.children()?, kind, atom.kind))
}

/// Size and header length of the top-level atom at `offset`.
fn read_top_level_header<R: Read + Seek>(reader: &mut R, offset: u64, end: u64) -> Result<(FourCc, u64, u64)> {
    let mut header = [0u8; 16];
    reader.seek(SeekFrom::Start(offset))?;
    reader.read_exact(&mut header[..8])?;
    let kind = FourCc::new(&[header[4], header[5], header[6], header[7]]);
    let (size, header_len) = match u32::from_be_bytes([header[0], header[1], header[2], header[3]]) {
        0 => (end - offset, 8),
        1 => {
            reader
                .read_exact(&mut header[8..16])
                .map_err(|source| MovError::IoAtOffset { atom: kind, offset, source })?;
            let size = u64::from_be_bytes([
                header[8], header[9], header[10], header[11], header[12], header[13], header[14], header[15],
            ]);
            (size, 16)
        }
        n => (n as u64, 8),
    };
    if size < header_len || size > end - offset {
        return Err(MovError::BadAtomSize { offset, size, limit: end });
    }
    Ok((kind, size, header_len))
}

/// Parse and validate an Animation movie.
pub fn parse_mov<R: Read + Seek>(reader: &mut R) -> Result<MovFile> {
    let end = reader.seek(SeekFrom::End(0))?;
    let mut moov: Option<(u64, Vec<u8>)> = None;
    let mut mdat: Option<(u64, u64)> = None;

    let mut offset = 0u64;
    while end - offset >= 8 {
        let (kind, size, header_len) = read_top_level_header(reader, offset, end)?;
        let payload_offset = offset + header_len;
        let payload_len = size - header_len;
        match kind.as_bytes() {
            b"moov" => {
                if moov.is_some() {
                    return Err(MovError::DuplicateAtom { atom: kind, parent: FILE });
                }
                let mut data = vec![0u8; payload_len as usize];
                reader
                    .read_exact(&mut data)
                    .map_err(|source| MovError::IoAtOffset { atom: kind, offset, source })?;
                moov = Some((payload_offset, data));
            }
            b"mdat" => {
                if mdat.is_some() {
                    return Err(MovError::DuplicateAtom { atom: kind, parent: FILE });
                }
                mdat = Some((payload_offset, payload_len));
            }
            b"ftyp" => {
                let mut brand = [0u8; 4];
                if payload_len >= 4 && reader.read_exact(&mut brand).is_ok() {
                    log::debug!("ftyp major brand '{}'", FourCc(brand));
                }
            }
            _ => log::debug!("skipping top-level atom '{kind}' ({size} bytes)"),
        }
        offset += size;
    }

    let (moov_offset, moov_data) = moov.ok_or(MovError::MissingAtom {
        atom: FourCc::new(b"moov"),
        parent: FILE,
    })?;
    let (mdat_offset, mdat_len) = mdat.ok_or(MovError::MissingAtom {
        atom: FourCc::new(b"mdat"),
        parent: FILE,
    })?;
    let moov = AtomData {
        kind: FourCc::new(b"moov"),
        offset: moov_offset,
        data: &moov_data,
    };
    parse_moov(moov, mdat_offset..mdat_offset + mdat_len)
}

struct MovieHeader {
    time_scale: u32,
    duration: u32,
}

fn parse_mvhd(mvhd: AtomData) -> Result<MovieHeader> {
    mvhd.require_version0()?;
    let header = MovieHeader {
        time_scale: mvhd.u32(12)?,
        duration: mvhd.u32(16)?,
    };
    if header.time_scale == 0 {
        return Err(MovError::unsupported(b"mvhd", "time scale", "non-zero", 0));
    }
    Ok(header)
}

/// Track dimensions from `tkhd`, stored as 16.16 fixed point.
fn parse_tkhd(tkhd: AtomData) -> Result<(u32, u32)> {
    tkhd.require_version0()?;
    let track_id = tkhd.u32(12)?;
    if track_id != 1 {
        return Err(MovError::unsupported(b"tkhd", "track id", 1, track_id));
    }
    let width = tkhd.u32(76)?;
    let height = tkhd.u32(80)?;
    if width == 0 || height == 0 {
        return Err(MovError::AudioTrack);
    }
    for (field, value) in [("width", width), ("height", height)] {
        if value & 0xFFFF != 0 {
            return Err(MovError::unsupported(
                b"tkhd",
                field,
                "a whole number",
                format!("{:.3}", value as f64 / 65536.0),
            ));
        }
        if value >> 16 > MAX_DIMENSION {
            return Err(MovError::unsupported(b"tkhd", field, format!("at most {MAX_DIMENSION}"), value >> 16));
        }
    }
    Ok((width >> 16, height >> 16))
}

/// The single edit must present the whole movie from media time 0 at normal rate.
fn check_elst(elst: AtomData, movie: &MovieHeader) -> Result<u32> {
    elst.require_version0()?;
    let entries = elst.u32(4)?;
    if entries != 1 {
        return Err(MovError::unsupported(b"elst", "entry count", 1, entries));
    }
    let duration = elst.u32(8)?;
    let media_time = elst.u32(12)? as i32;
    let rate = elst.u32(16)?;
    if duration != movie.duration {
        return Err(MovError::unsupported(b"elst", "edit duration", movie.duration, duration));
    }
    if media_time != 0 {
        return Err(MovError::unsupported(b"elst", "media time", 0, media_time));
    }
    if rate != 0x0001_0000 {
        return Err(MovError::unsupported(
            b"elst",
            "rate",
            "1.0",
            format!("{:.3}", rate as f64 / 65536.0),
        ));
    }
    Ok(duration)
}

fn check_handler(hdlr: AtomData, component: &[u8; 4], subtype: &[u8; 4]) -> Result<()> {
    let found_component = hdlr.fourcc(4)?;
    if found_component != *component {
        return Err(MovError::unsupported(
            b"hdlr",
            "component type",
            FourCc::new(component),
            found_component,
        ));
    }
    let found_subtype = hdlr.fourcc(8)?;
    if found_subtype != *subtype {
        return Err(MovError::unsupported(
            b"hdlr",
            "component subtype",
            FourCc::new(subtype),
            found_subtype,
        ));
    }
    Ok(())
}

/// Validate the single `stsd` entry and return its pixel depth.
fn parse_stsd(stsd: AtomData) -> Result<Depth> {
    let entries = stsd.u32(4)?;
    if entries != 1 {
        return Err(MovError::unsupported(b"stsd", "entry count", 1, entries));
    }
    // Offsets relative to the payload; the entry starts at byte 8.
    let format = stsd.fourcc(12)?;
    if format != *b"rle " {
        return Err(MovError::unsupported(b"stsd", "format", "'rle '", format!("'{format}'")));
    }
    let vendor = stsd.fourcc(28)?;
    if vendor != *b"appl" {
        return Err(MovError::unsupported(b"stsd", "vendor", "'appl'", format!("'{vendor}'")));
    }
    let name = stsd.bytes(58, 32)?;
    let name_len = (name[0] as usize).min(31);
    let name = String::from_utf8_lossy(&name[1..1 + name_len]);
    if name != "Animation" {
        return Err(MovError::unsupported(b"stsd", "compressor name", "Animation", name));
    }
    let bits = stsd.u16(90)?;
    let depth = Depth::from_bits(bits as u32)
        .ok_or_else(|| MovError::unsupported(b"stsd", "depth", "16, 24 or 32", bits))?;
    let color_table = stsd.u16(92)?;
    if color_table != 0xFFFF {
        return Err(MovError::unsupported(b"stsd", "color table id", -1, color_table as i16));
    }
    Ok(depth)
}

fn parse_moov(moov: AtomData, mdat: std::ops::Range<u64>) -> Result<MovFile> {
    let children = moov.children()?;
    let movie = parse_mvhd(require(&children, b"mvhd", moov.kind)?)?;

    let mut tracks = children.iter().filter(|a| a.kind == *b"trak");
    let trak = *tracks.next().ok_or(MovError::MissingAtom {
        atom: FourCc::new(b"trak"),
        parent: moov.kind,
    })?;
    if tracks.next().is_some() {
        return Err(MovError::MultipleTracks);
    }

    let trak_children = trak.children()?;
    let (width, height) = parse_tkhd(require(&trak_children, b"tkhd", trak.kind)?)?;
    let edit_duration = check_elst(descend(trak, &[b"edts", b"elst"])?, &movie)?;

    let mdia = require(&trak_children, b"mdia", trak.kind)?;
    let mdia_children = mdia.children()?;
    let mdhd = require(&mdia_children, b"mdhd", mdia.kind)?;
    mdhd.require_version0()?;
    let time_scale = mdhd.u32(12)?;
    if time_scale == 0 {
        return Err(MovError::unsupported(b"mdhd", "time scale", "non-zero", 0));
    }
    check_handler(require(&mdia_children, b"hdlr", mdia.kind)?, b"mhlr", b"vide")?;

    let minf = require(&mdia_children, b"minf", mdia.kind)?;
    let minf_children = minf.children()?;
    let mode = require(&minf_children, b"vmhd", minf.kind)?.u16(4)?;
    if mode != GRAPHICS_MODE_COPY && mode != GRAPHICS_MODE_DITHER_COPY {
        return Err(MovError::unsupported(
            b"vmhd",
            "graphics mode",
            "COPY (0x0) or DITHER_COPY (0x40)",
            format!("0x{mode:X}"),
        ));
    }
    if let Some(hdlr) = find(&minf_children, b"hdlr", minf.kind)? {
        check_handler(hdlr, b"dhlr", b"alis")?;
    }
    descend(minf, &[b"dinf", b"dref"])?;

    let stbl = require(&minf_children, b"stbl", minf.kind)?;
    let stbl_children = stbl.children()?;
    let depth = parse_stsd(require(&stbl_children, b"stsd", stbl.kind)?)?;
    let tables = SampleTables::parse(&stbl_children, stbl.kind)?;

    // Edit duration is in movie ticks; convert to media ticks.
    let edit_media_ticks =
        ((edit_duration as u64 * time_scale as u64) as f64 / movie.time_scale as f64).round() as u64;
    let (frame_ticks, frame_samples) = map_frames(&tables.durations, edit_media_ticks)?;

    let samples = tables.samples(mdat)?;
    log::debug!(
        "mov: {width}x{height} {depth}, {} samples, {} frames of {frame_ticks}/{time_scale} s",
        samples.len(),
        frame_samples.len()
    );

    Ok(MovFile {
        width,
        height,
        depth,
        time_scale,
        frame_ticks,
        samples,
        frame_samples,
    })
}
