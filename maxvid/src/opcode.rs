//! Generic maxvid opcodes.
//!
//! A frame is described as a sequence of SKIP / DUP / COPY instructions that
//! together cover exactly `width * height` pixels, terminated by DONE. The
//! generic form stores the opcode in bits 30-31 of a word and the count in
//! bits 0-15; pixel payload words follow DUP and COPY:
//!
//! - DUP: one word. 16bpp repeats the pixel in both halves.
//! - COPY: one word per pixel (32-bit pixels), or one word per pixel pair,
//!   low half first, with an odd trailing pixel zero padded (16-bit pixels).
//!
//! Malformed opcode streams are programmer errors and panic.

use std::marker::PhantomData;

use crate::pixels::{FrameBuffer, Pixel};

pub const MAX_14_BITS: u32 = 0x3FFF;
pub const MAX_16_BITS: u32 = 0xFFFF;
pub const MAX_22_BITS: u32 = 0x3F_FFFF;

/// Largest count a generic opcode word can carry.
pub const GENERIC_MAX_COUNT: u32 = MAX_16_BITS;

const OPCODE_SHIFT: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpCode {
    Skip = 0,
    Dup = 1,
    Copy = 2,
    Done = 3,
}

impl OpCode {
    pub fn from_word(word: u32) -> Self {
        match word >> OPCODE_SHIFT {
            0 => OpCode::Skip,
            1 => OpCode::Dup,
            2 => OpCode::Copy,
            _ => OpCode::Done,
        }
    }

    /// Panic unless `count` is legal for this opcode under a `max` bit width.
    pub fn check_count(self, count: u32, max: u32) {
        match self {
            OpCode::Skip | OpCode::Copy => {
                assert!(count > 0 && count <= max, "{self:?} count {count} outside 1..={max}")
            }
            OpCode::Dup => assert!(count > 1 && count <= max, "Dup count {count} outside 2..={max}"),
            OpCode::Done => assert_eq!(count, 0, "Done must carry a zero count"),
        }
    }
}

/// Build a generic opcode word.
pub fn generic_word(op: OpCode, count: u32) -> u32 {
    op.check_count(count, GENERIC_MAX_COUNT);
    (op as u32) << OPCODE_SHIFT | count
}

/// Split a generic opcode word into opcode and count.
pub fn split_generic_word(word: u32) -> (OpCode, u32) {
    assert_eq!(
        word & 0x3FFF_0000,
        0,
        "generic opcode word 0x{word:08X} has reserved bits set"
    );
    (OpCode::from_word(word), word & MAX_16_BITS)
}

/// Bounded, append-only opcode word buffer.
///
/// The capacity is fixed at construction; pushing past it panics, since it
/// means the caller's size estimate for the encoded sample was wrong.
#[derive(Debug, Clone)]
pub struct OpWriter {
    words: Vec<u32>,
    capacity: usize,
}

impl OpWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: Vec::with_capacity(capacity.min(1 << 20)),
            capacity,
        }
    }

    pub fn push(&mut self, word: u32) {
        assert!(
            self.words.len() < self.capacity,
            "opcode buffer overflow: capacity {} words",
            self.capacity
        );
        self.words.push(word);
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.words.len()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn into_words(self) -> Vec<u32> {
        self.words
    }
}

/// Pixel storage types that can travel in opcode payloads.
pub trait OpPixel: Pixel {
    /// Payload word for a generic DUP.
    fn dup_word(self) -> u32;

    fn from_dup_word(word: u32) -> Self;

    /// Number of payload words a COPY of `count` pixels occupies.
    fn copy_words(count: usize) -> usize;

    fn pack_copy(pixels: &[Self], out: &mut OpWriter);

    /// Unpack `out.len()` pixels from COPY payload words.
    fn unpack_copy(words: &[u32], out: &mut [Self]);
}

impl OpPixel for u16 {
    fn dup_word(self) -> u32 {
        (self as u32) << 16 | self as u32
    }

    fn from_dup_word(word: u32) -> Self {
        word as u16
    }

    fn copy_words(count: usize) -> usize {
        count.div_ceil(2)
    }

    fn pack_copy(pixels: &[Self], out: &mut OpWriter) {
        for pair in pixels.chunks(2) {
            let low = pair[0] as u32;
            let high = pair.get(1).copied().unwrap_or(0) as u32;
            out.push(high << 16 | low);
        }
    }

    fn unpack_copy(words: &[u32], out: &mut [Self]) {
        for (i, p) in out.iter_mut().enumerate() {
            let word = words[i / 2];
            *p = if i % 2 == 0 { word as u16 } else { (word >> 16) as u16 };
        }
    }
}

impl OpPixel for u32 {
    fn dup_word(self) -> u32 {
        self
    }

    fn from_dup_word(word: u32) -> Self {
        word
    }

    fn copy_words(count: usize) -> usize {
        count
    }

    fn pack_copy(pixels: &[Self], out: &mut OpWriter) {
        for &p in pixels {
            out.push(p);
        }
    }

    fn unpack_copy(words: &[u32], out: &mut [Self]) {
        out.copy_from_slice(&words[..out.len()]);
    }
}

/// Emits a generic opcode stream while tracking pixel coverage.
///
/// Skips are accumulated and only written out when a DUP or COPY follows or
/// at [`finish`](Self::finish), so consecutive skips from different sources
/// collapse into as few words as possible.
#[derive(Debug)]
pub struct GenericEncoder<P> {
    out: OpWriter,
    pending_skip: usize,
    position: usize,
    total: usize,
    _pixel: PhantomData<P>,
}

impl<P: OpPixel> GenericEncoder<P> {
    /// Encoder for a frame of `total` pixels writing at most `capacity` words.
    pub fn new(total: usize, capacity: usize) -> Self {
        Self {
            out: OpWriter::with_capacity(capacity),
            pending_skip: 0,
            position: 0,
            total,
            _pixel: PhantomData,
        }
    }

    /// Pixels accounted for so far, including pending skips.
    pub fn position(&self) -> usize {
        self.position
    }

    fn advance(&mut self, count: usize) {
        self.position += count;
        assert!(
            self.position <= self.total,
            "opcode stream overruns frame: {} > {} pixels",
            self.position,
            self.total
        );
    }

    pub fn skip(&mut self, count: usize) {
        self.advance(count);
        self.pending_skip += count;
    }

    /// Skip forward to an absolute pixel position.
    pub fn skip_to(&mut self, position: usize) {
        assert!(position >= self.position, "cannot skip backwards to {position}");
        self.skip(position - self.position);
    }

    fn flush_skip(&mut self) {
        while self.pending_skip > 0 {
            let n = self.pending_skip.min(GENERIC_MAX_COUNT as usize);
            self.out.push(generic_word(OpCode::Skip, n as u32));
            self.pending_skip -= n;
        }
    }

    pub fn dup(&mut self, pixel: P, count: usize) {
        if count == 0 {
            return;
        }
        if count == 1 {
            self.copy(&[pixel]);
            return;
        }
        self.advance(count);
        self.flush_skip();
        let max = GENERIC_MAX_COUNT as usize;
        let mut remaining = count;
        while remaining > 0 {
            let mut n = remaining.min(max);
            if remaining - n == 1 {
                n -= 1;
            }
            if n == 1 {
                self.out.push(generic_word(OpCode::Copy, 1));
                P::pack_copy(&[pixel], &mut self.out);
            } else {
                self.out.push(generic_word(OpCode::Dup, n as u32));
                self.out.push(pixel.dup_word());
            }
            remaining -= n;
        }
    }

    pub fn copy(&mut self, pixels: &[P]) {
        if pixels.is_empty() {
            return;
        }
        self.advance(pixels.len());
        self.flush_skip();
        for run in pixels.chunks(GENERIC_MAX_COUNT as usize) {
            self.out.push(generic_word(OpCode::Copy, run.len() as u32));
            P::pack_copy(run, &mut self.out);
        }
    }

    /// Pad the remainder of the frame with SKIP, append DONE and return the words.
    pub fn finish(mut self) -> Vec<u32> {
        let rest = self.total - self.position;
        self.skip(rest);
        self.flush_skip();
        self.out.push(generic_word(OpCode::Done, 0));
        self.out.into_words()
    }
}

/// One decoded instruction from a generic opcode stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op<'a> {
    Skip(usize),
    Dup { count: usize, word: u32 },
    Copy { count: usize, words: &'a [u32] },
    Done,
}

/// Iterate the instructions of a generic opcode stream.
pub fn generic_ops<P: OpPixel>(words: &[u32]) -> GenericOps<'_, P> {
    GenericOps {
        words,
        pos: 0,
        done: false,
        _pixel: PhantomData,
    }
}

pub struct GenericOps<'a, P> {
    words: &'a [u32],
    pos: usize,
    done: bool,
    _pixel: PhantomData<P>,
}

impl<'a, P: OpPixel> Iterator for GenericOps<'a, P> {
    type Item = Op<'a>;

    fn next(&mut self) -> Option<Op<'a>> {
        if self.done {
            return None;
        }
        let Some(&word) = self.words.get(self.pos) else {
            panic!("generic opcode stream ends without DONE");
        };
        self.pos += 1;
        let (op, count) = split_generic_word(word);
        op.check_count(count, GENERIC_MAX_COUNT);
        let count = count as usize;
        Some(match op {
            OpCode::Skip => Op::Skip(count),
            OpCode::Dup => {
                let word = self.words[self.pos];
                self.pos += 1;
                Op::Dup { count, word }
            }
            OpCode::Copy => {
                let n = P::copy_words(count);
                let words = &self.words[self.pos..self.pos + n];
                self.pos += n;
                Op::Copy { count, words }
            }
            OpCode::Done => {
                self.done = true;
                Op::Done
            }
        })
    }
}

/// Apply a generic opcode stream on top of `fb`.
///
/// Panics unless the stream covers exactly every pixel of the frame.
pub fn apply_generic<P: OpPixel>(words: &[u32], fb: &mut FrameBuffer<P>) {
    let total = fb.len();
    let pixels = fb.pixels_mut();
    let mut cursor = 0usize;
    let mut finished = false;

    for op in generic_ops::<P>(words) {
        match op {
            Op::Skip(n) => cursor += n,
            Op::Dup { count, word } => {
                pixels[cursor..cursor + count].fill(P::from_dup_word(word));
                cursor += count;
            }
            Op::Copy { count, words } => {
                P::unpack_copy(words, &mut pixels[cursor..cursor + count]);
                cursor += count;
            }
            Op::Done => finished = true,
        }
        assert!(cursor <= total, "opcode stream overruns frame");
    }
    assert!(finished, "opcode stream ends without DONE");
    assert_eq!(cursor, total, "opcode stream covers {cursor} of {total} pixels");
}
