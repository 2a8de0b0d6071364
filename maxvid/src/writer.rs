//! Streaming `.mvid` writer.
//!
//! Files are produced in four passes so that a reader can trust any file
//! whose first word is the magic number:
//!
//! 1. a zeroed header and zeroed frame table are written,
//! 2. frame payloads are appended while their records are kept in memory,
//! 3. the header (magic still zero) and the table are rewritten,
//! 4. the magic word alone is written at offset 0.

use std::io::{Seek, SeekFrom, Write};

use crate::error::{MvidError, Result};
use crate::format::{
    FrameFlags, FrameRecord, HEADER_SIZE, Header, MAGIC, PAGE_SIZE, RecordLayout, VersionFlags, check_dimensions,
    check_frame_count, page_align, requires_large_layout,
};
use crate::pixels::Depth;

const ZEROS: [u8; PAGE_SIZE as usize] = [0; PAGE_SIZE as usize];

/// Geometry and timing of a file about to be written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub depth: Depth,
    /// Seconds each frame is displayed.
    pub frame_duration: f32,
    pub num_frames: usize,
}

pub struct MvidWriter<W> {
    inner: W,
    info: StreamInfo,
    layout: RecordLayout,
    records: Vec<FrameRecord>,
    position: u64,
    wrote_delta: bool,
}

impl<W: Write + Seek> MvidWriter<W> {
    /// Start a file, writing the zeroed header and frame table.
    ///
    /// A legacy layout request is upgraded to the large-file layout when a
    /// frame of this geometry might not fit a legacy record.
    pub fn create(mut inner: W, info: StreamInfo, layout: RecordLayout) -> Result<Self> {
        check_dimensions(info.width, info.height)?;
        check_frame_count(info.num_frames as u64)?;
        let layout = if layout == RecordLayout::Legacy && requires_large_layout(info.width, info.height, info.depth) {
            log::warn!(
                "{}x{} {} frames may exceed the legacy 24-bit frame length, writing large-file layout",
                info.width,
                info.height,
                info.depth
            );
            RecordLayout::Large
        } else {
            layout
        };

        let table_end = layout.table_end(info.num_frames);
        inner.seek(SeekFrom::Start(0))?;
        write_zeros(&mut inner, table_end)?;

        Ok(Self {
            inner,
            info,
            layout,
            records: Vec::with_capacity(info.num_frames),
            position: table_end,
            wrote_delta: false,
        })
    }

    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    pub fn frames_written(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    fn next_index(&self) -> Result<usize> {
        let index = self.records.len();
        if index >= self.info.num_frames {
            return Err(MvidError::TooManyFrames {
                expected: self.info.num_frames,
            });
        }
        Ok(index)
    }

    fn pad_to(&mut self, target: u64) -> Result<()> {
        write_zeros(&mut self.inner, target - self.position)?;
        self.position = target;
        Ok(())
    }

    /// Append an uncompressed keyframe, page aligned on both ends.
    ///
    /// `pixels` is the little-endian framebuffer image. Returns the number of
    /// bytes appended, padding included.
    pub fn write_raw_keyframe(&mut self, pixels: &[u8], adler: u32) -> Result<u64> {
        let index = self.next_index()?;
        let expected = self.info.depth.frame_bytes(self.info.width, self.info.height);
        if pixels.len() as u64 != expected {
            return Err(MvidError::BadFrameLength {
                index,
                expected,
                got: pixels.len() as u64,
            });
        }
        let start = self.position;
        self.pad_to(page_align(start))?;
        let offset = self.position;
        self.inner.write_all(pixels)?;
        self.position += pixels.len() as u64;
        self.pad_to(page_align(self.position))?;

        self.records.push(FrameRecord {
            offset,
            length: frame_length(index, pixels.len() as u64)?,
            flags: FrameFlags(FrameFlags::KEYFRAME),
            adler,
        });
        log::debug!("frame {index}: raw keyframe at 0x{offset:X}");
        Ok(self.position - start)
    }

    /// Append an opcode stream. Compressed keyframes decode onto a cleared
    /// framebuffer. Returns the number of bytes appended.
    pub fn write_compressed_frame(&mut self, words: &[u32], keyframe: bool, adler: u32) -> Result<u64> {
        let index = self.next_index()?;
        let offset = self.position;
        let mut bytes = Vec::with_capacity(words.len() * 4);
        for word in words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        self.inner.write_all(&bytes)?;
        self.position += bytes.len() as u64;

        let mut flags = FrameFlags::COMPRESSED;
        if keyframe {
            flags |= FrameFlags::KEYFRAME;
        } else {
            self.wrote_delta = true;
        }
        self.records.push(FrameRecord {
            offset,
            length: frame_length(index, bytes.len() as u64)?,
            flags: FrameFlags(flags),
            adler,
        });
        log::debug!(
            "frame {index}: {} words{}",
            words.len(),
            if keyframe { " (keyframe)" } else { "" }
        );
        Ok(bytes.len() as u64)
    }

    /// Append a frame identical to the previous one: a single zero word on
    /// disk, and a record pointing at the previous frame's payload.
    pub fn write_nop_frame(&mut self) -> Result<u64> {
        let index = self.next_index()?;
        let Some(prev) = self.records.last().copied() else {
            return Err(MvidError::NopWithoutPredecessor { index });
        };
        self.inner.write_all(&0u32.to_le_bytes())?;
        self.position += 4;

        let inherited = prev.flags.0 & (FrameFlags::KEYFRAME | FrameFlags::COMPRESSED);
        self.records.push(FrameRecord {
            flags: FrameFlags(inherited | FrameFlags::NOPFRAME),
            ..prev
        });
        log::debug!("frame {index}: no-op");
        Ok(4)
    }

    /// Rewrite header and frame table, then publish the magic number.
    pub fn finish(mut self) -> Result<W> {
        if self.records.len() != self.info.num_frames {
            return Err(MvidError::IncompleteFrameTable {
                expected: self.info.num_frames,
                written: self.records.len(),
            });
        }

        let all_keyframes = self.records.iter().all(|r| r.flags.nop() || r.flags.keyframe());
        let mut header = Header {
            magic: 0,
            width: self.info.width,
            height: self.info.height,
            bpp: self.info.depth.bits(),
            frame_duration: self.info.frame_duration,
            num_frames: self.info.num_frames as u32,
            version_flags: VersionFlags::new(self.layout.version(), all_keyframes, self.wrote_delta),
        };

        let mut table = Vec::with_capacity(HEADER_SIZE + self.records.len() * self.layout.record_size());
        table.extend_from_slice(&header.to_bytes());
        for (index, record) in self.records.iter().enumerate() {
            self.layout.encode(index, record, &mut table)?;
        }

        self.inner.flush()?;
        self.inner.seek(SeekFrom::Start(0))?;
        self.inner.write_all(&table)?;
        self.inner.flush()?;

        header.magic = MAGIC;
        self.inner.seek(SeekFrom::Start(0))?;
        self.inner.write_all(&header.to_bytes()[..4])?;
        self.inner.flush()?;

        log::debug!(
            "finalized {} frames, {} bytes, {:?} layout",
            self.records.len(),
            self.position,
            self.layout
        );
        Ok(self.inner)
    }
}

fn frame_length(index: usize, length: u64) -> Result<u32> {
    u32::try_from(length).map_err(|_| MvidError::FrameTooLarge { index, length })
}

fn write_zeros<W: Write>(out: &mut W, mut count: u64) -> Result<()> {
    while count > 0 {
        let n = count.min(ZEROS.len() as u64) as usize;
        out.write_all(&ZEROS[..n])?;
        count -= n as u64;
    }
    Ok(())
}
