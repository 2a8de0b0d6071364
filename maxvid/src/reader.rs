use std::io::{Read, Seek, SeekFrom};

use crate::c4::{apply_c4_16, apply_c4_32};
use crate::error::{MvidError, Result};
use crate::format::{FrameRecord, HEADER_SIZE, Header, MAGIC, RecordLayout};
use crate::pixels::{AnyFrameBuffer, Depth};

/// Whether the stream starts with the magic number, i.e. the writer reached
/// its final step.
pub fn is_finalized<R: Read + Seek>(reader: &mut R) -> Result<bool> {
    reader.seek(SeekFrom::Start(0))?;
    let mut word = [0u8; 4];
    match reader.read_exact(&mut word) {
        Ok(()) => Ok(u32::from_le_bytes(word) == MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(MvidError::Io(e)),
    }
}

/// Serializable view of a file's header and frame table.
#[derive(Debug, Clone, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct MvidInfo {
    pub header: Header,
    pub layout: RecordLayout,
    pub depth: Depth,
    pub records: Vec<FrameRecord>,
}

/// An opened `.mvid` file: validated header plus the full frame table.
#[derive(Debug)]
pub struct MvidFile<R> {
    inner: R,
    header: Header,
    layout: RecordLayout,
    depth: Depth,
    records: Vec<FrameRecord>,
    file_len: u64,
}

impl<R: Read + Seek> MvidFile<R> {
    pub fn open(mut inner: R) -> Result<Self> {
        let file_len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        let mut header_bytes = [0u8; HEADER_SIZE];
        inner.read_exact(&mut header_bytes)?;
        let header = Header::from_bytes(&header_bytes);
        let (layout, depth) = header.validate()?;

        let table_end = layout.table_end(header.num_frames as usize);
        if table_end > file_len {
            return Err(MvidError::TruncatedFrameTable {
                frames: header.num_frames,
                table_end,
                file_len,
            });
        }
        let record_size = layout.record_size();
        let mut table = vec![0u8; header.num_frames as usize * record_size];
        inner.read_exact(&mut table)?;
        let records = table.chunks_exact(record_size).map(|r| layout.decode(r)).collect();

        Ok(Self {
            inner,
            header,
            layout,
            depth,
            records,
            file_len,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    pub fn width(&self) -> usize {
        self.header.width as usize
    }

    pub fn height(&self) -> usize {
        self.header.height as usize
    }

    pub fn frame_count(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Result<&FrameRecord> {
        self.records.get(index).ok_or(MvidError::FrameOutOfRange {
            index,
            count: self.records.len(),
        })
    }

    /// Raw payload bytes of frame `index`, as the record describes them.
    pub fn read_payload(&mut self, index: usize) -> Result<Vec<u8>> {
        let record = *self.record(index)?;
        if record
            .offset
            .checked_add(record.length as u64)
            .is_none_or(|end| end > self.file_len)
        {
            return Err(MvidError::PayloadOutOfBounds {
                index,
                offset: record.offset,
                length: record.length,
                file_len: self.file_len,
            });
        }
        self.inner.seek(SeekFrom::Start(record.offset))?;
        let mut payload = vec![0u8; record.length as usize];
        self.inner.read_exact(&mut payload)?;
        Ok(payload)
    }

    pub fn info(&self) -> MvidInfo {
        MvidInfo {
            header: self.header,
            layout: self.layout,
            depth: self.depth,
            records: self.records.clone(),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Random access frame decoding over an [`MvidFile`].
///
/// Decoding frame `n` continues from the current frame when moving forward,
/// and otherwise restarts at the closest keyframe at or before `n`.
pub struct FrameDecoder<R> {
    file: MvidFile<R>,
    frame: AnyFrameBuffer,
    current: Option<usize>,
    verify: bool,
}

impl<R: Read + Seek> FrameDecoder<R> {
    pub fn new(file: MvidFile<R>) -> Self {
        let frame = AnyFrameBuffer::new(file.depth(), file.width(), file.height());
        Self {
            file,
            frame,
            current: None,
            verify: false,
        }
    }

    /// Check each applied frame against its recorded Adler-32.
    pub fn set_verify(&mut self, verify: bool) {
        self.verify = verify;
    }

    pub fn file(&self) -> &MvidFile<R> {
        &self.file
    }

    /// The most recently decoded frame.
    pub fn frame(&self) -> &AnyFrameBuffer {
        &self.frame
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn decode(&mut self, index: usize) -> Result<&AnyFrameBuffer> {
        self.file.record(index)?;
        let start = match self.current {
            Some(current) if current == index => return Ok(&self.frame),
            Some(current) if current < index => current + 1,
            _ => self.keyframe_at_or_before(index)?,
        };
        for i in start..=index {
            // Leave no half-applied state behind a failed frame.
            self.current = None;
            self.apply(i)?;
            self.current = Some(i);
        }
        Ok(&self.frame)
    }

    fn keyframe_at_or_before(&self, index: usize) -> Result<usize> {
        self.file.records()[..=index]
            .iter()
            .rposition(|r| r.flags.keyframe() && !r.flags.nop())
            .ok_or(MvidError::NoKeyframe { index })
    }

    fn apply(&mut self, index: usize) -> Result<()> {
        let record = *self.file.record(index)?;
        if !record.flags.nop() {
            let payload = self.file.read_payload(index)?;
            if record.flags.compressed() {
                if payload.len() % 4 != 0 {
                    return Err(MvidError::BadFrameLength {
                        index,
                        expected: (payload.len() as u64 / 4 + 1) * 4,
                        got: payload.len() as u64,
                    });
                }
                let words: Vec<u32> = payload
                    .chunks_exact(4)
                    .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
                    .collect();
                if record.flags.keyframe() {
                    self.frame.clear();
                }
                match &mut self.frame {
                    AnyFrameBuffer::Pixels16(fb) => apply_c4_16(&words, fb),
                    AnyFrameBuffer::Pixels32(fb) => apply_c4_32(&words, fb),
                }
            } else {
                let expected = self.file.depth().frame_bytes(self.file.header.width, self.file.header.height);
                if payload.len() as u64 != expected {
                    return Err(MvidError::BadFrameLength {
                        index,
                        expected,
                        got: payload.len() as u64,
                    });
                }
                self.frame.load_le_bytes(&payload);
            }
        }

        if !self.verify {
            return Ok(());
        }
        if let Some(expected) = record.checksum() {
            let got = self.frame.checksum();
            if got != expected {
                return Err(MvidError::ChecksumMismatch { index, expected, got });
            }
        }
        Ok(())
    }
}
