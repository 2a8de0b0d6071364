//! Synthetic input files for the integration tests.

#![allow(dead_code)]

use std::io::Write;

use flate2::Crc;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use maxvid::apng::PNG_SIGNATURE;

fn atom(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn container(kind: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    atom(kind, &children.concat())
}

/// Version/flags word followed by big-endian words.
fn full_atom(kind: &[u8; 4], words: &[u32]) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    for w in words {
        payload.extend_from_slice(&w.to_be_bytes());
    }
    atom(kind, &payload)
}

fn handler(component: &[u8; 4], subtype: &[u8; 4]) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(component);
    payload.extend_from_slice(subtype);
    payload.extend_from_slice(&[0u8; 12]);
    payload.push(0);
    atom(b"hdlr", &payload)
}

/// A single-track QuickTime Animation movie, one sample per chunk.
pub struct MovBuilder {
    width: u32,
    height: u32,
    depth: u16,
    time_scale: u32,
    samples: Vec<(Vec<u8>, u32, bool)>,
}

impl MovBuilder {
    pub fn new(width: u32, height: u32, depth: u16) -> Self {
        Self {
            width,
            height,
            depth,
            time_scale: 600,
            samples: Vec::new(),
        }
    }

    /// Append a sample lasting `duration` media ticks.
    pub fn sample(mut self, data: Vec<u8>, duration: u32, keyframe: bool) -> Self {
        self.samples.push((data, duration, keyframe));
        self
    }

    fn stsd(&self) -> Vec<u8> {
        let mut entry = vec![0u8; 94];
        entry[8..12].copy_from_slice(&86u32.to_be_bytes());
        entry[12..16].copy_from_slice(b"rle ");
        entry[22..24].copy_from_slice(&1u16.to_be_bytes());
        entry[28..32].copy_from_slice(b"appl");
        entry[40..42].copy_from_slice(&(self.width as u16).to_be_bytes());
        entry[42..44].copy_from_slice(&(self.height as u16).to_be_bytes());
        entry[56..58].copy_from_slice(&1u16.to_be_bytes());
        let name = b"Animation";
        entry[58] = name.len() as u8;
        entry[59..59 + name.len()].copy_from_slice(name);
        entry[90..92].copy_from_slice(&self.depth.to_be_bytes());
        entry[92..94].copy_from_slice(&0xFFFFu16.to_be_bytes());
        entry[4..8].copy_from_slice(&1u32.to_be_bytes());
        atom(b"stsd", &entry)
    }

    fn stbl(&self, mdat_data_offset: u32) -> Vec<u8> {
        let n = self.samples.len() as u32;

        let mut stts = vec![n];
        let mut stsz = vec![0, n];
        let mut stco = vec![n];
        let mut offset = mdat_data_offset;
        for (data, duration, _) in &self.samples {
            stts.extend([1, *duration]);
            stsz.push(data.len() as u32);
            stco.push(offset);
            offset += data.len() as u32;
        }

        let mut children = vec![
            self.stsd(),
            full_atom(b"stts", &stts),
            full_atom(b"stsc", &[1, 1, 1, 1]),
            full_atom(b"stsz", &stsz),
            full_atom(b"stco", &stco),
        ];
        if self.samples.iter().any(|(_, _, keyframe)| !keyframe) {
            let mut stss: Vec<u32> = self
                .samples
                .iter()
                .enumerate()
                .filter(|(_, (_, _, keyframe))| *keyframe)
                .map(|(i, _)| i as u32 + 1)
                .collect();
            stss.insert(0, stss.len() as u32);
            children.push(full_atom(b"stss", &stss));
        }
        container(b"stbl", &children)
    }

    fn moov(&self, mdat_data_offset: u32) -> Vec<u8> {
        let duration: u32 = self.samples.iter().map(|(_, d, _)| d).sum();

        let mut mvhd = vec![0u8; 100];
        mvhd[12..16].copy_from_slice(&self.time_scale.to_be_bytes());
        mvhd[16..20].copy_from_slice(&duration.to_be_bytes());

        let mut tkhd = vec![0u8; 84];
        tkhd[12..16].copy_from_slice(&1u32.to_be_bytes());
        tkhd[76..80].copy_from_slice(&(self.width << 16).to_be_bytes());
        tkhd[80..84].copy_from_slice(&(self.height << 16).to_be_bytes());

        let elst = full_atom(b"elst", &[1, duration, 0, 0x0001_0000]);
        let mdhd = full_atom(b"mdhd", &[0, 0, self.time_scale, duration, 0]);
        let vmhd = atom(b"vmhd", &[0, 0, 0, 1, 0, 0x40, 0, 0, 0, 0, 0, 0]);
        let mut dref = vec![0u8; 4];
        dref.extend_from_slice(&1u32.to_be_bytes());
        dref.extend(atom(b"alis", &[0, 0, 0, 1]));

        let minf = container(
            b"minf",
            &[
                vmhd,
                handler(b"dhlr", b"alis"),
                container(b"dinf", &[atom(b"dref", &dref)]),
                self.stbl(mdat_data_offset),
            ],
        );
        let mdia = container(b"mdia", &[mdhd, handler(b"mhlr", b"vide"), minf]);
        let trak = container(b"trak", &[atom(b"tkhd", &tkhd), container(b"edts", &[elst]), mdia]);
        container(b"moov", &[atom(b"mvhd", &mvhd), trak])
    }

    /// `ftyp`, then `mdat` holding every sample, then `moov`.
    pub fn build(&self) -> Vec<u8> {
        let mut file = atom(b"ftyp", b"qt  \0\0\0\0qt  ");
        let mdat_data_offset = file.len() as u32 + 8;
        let payload: Vec<u8> = self.samples.iter().flat_map(|(data, _, _)| data.clone()).collect();
        file.extend(atom(b"mdat", &payload));
        file.extend(self.moov(mdat_data_offset));
        file
    }
}

fn chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = (data.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(data);
    out.extend_from_slice(&crc.sum().to_be_bytes());
    out
}

/// One animation frame: straight RGBA pixels for its region.
pub struct TestFrame {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
    pub delay_num: u16,
    pub delay_den: u16,
    pub dispose: u8,
    pub blend: u8,
    pub pixels: Vec<[u8; 4]>,
}

impl TestFrame {
    /// A full-canvas frame with a 1/10 s delay.
    pub fn full(width: u32, height: u32, pixels: Vec<[u8; 4]>) -> Self {
        Self {
            width,
            height,
            x: 0,
            y: 0,
            delay_num: 1,
            delay_den: 10,
            dispose: 0,
            blend: 0,
            pixels,
        }
    }
}

/// An 8-bit truecolour animated PNG, RGBA (colour type 6) or RGB (type 2).
pub struct ApngBuilder {
    width: u32,
    height: u32,
    alpha: bool,
    frames: Vec<TestFrame>,
}

impl ApngBuilder {
    pub fn new(width: u32, height: u32, alpha: bool) -> Self {
        Self {
            width,
            height,
            alpha,
            frames: Vec::new(),
        }
    }

    pub fn frame(mut self, frame: TestFrame) -> Self {
        self.frames.push(frame);
        self
    }

    fn image_data(&self, frame: &TestFrame) -> Vec<u8> {
        let mut raw = Vec::new();
        for row in frame.pixels.chunks(frame.width as usize) {
            raw.push(0);
            for px in row {
                let channels = if self.alpha { &px[..] } else { &px[..3] };
                raw.extend_from_slice(channels);
            }
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        encoder.finish().unwrap()
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = PNG_SIGNATURE.to_vec();

        let mut ihdr = self.width.to_be_bytes().to_vec();
        ihdr.extend_from_slice(&self.height.to_be_bytes());
        ihdr.extend_from_slice(&[8, if self.alpha { 6 } else { 2 }, 0, 0, 0]);
        out.extend(chunk(b"IHDR", &ihdr));

        let mut actl = (self.frames.len() as u32).to_be_bytes().to_vec();
        actl.extend_from_slice(&0u32.to_be_bytes());
        out.extend(chunk(b"acTL", &actl));

        let mut sequence = 0u32;
        for (index, frame) in self.frames.iter().enumerate() {
            let mut fctl = Vec::new();
            for v in [sequence, frame.width, frame.height, frame.x, frame.y] {
                fctl.extend_from_slice(&v.to_be_bytes());
            }
            fctl.extend_from_slice(&frame.delay_num.to_be_bytes());
            fctl.extend_from_slice(&frame.delay_den.to_be_bytes());
            fctl.extend_from_slice(&[frame.dispose, frame.blend]);
            out.extend(chunk(b"fcTL", &fctl));
            sequence += 1;

            let data = self.image_data(frame);
            if index == 0 {
                out.extend(chunk(b"IDAT", &data));
            } else {
                let mut fdat = sequence.to_be_bytes().to_vec();
                fdat.extend_from_slice(&data);
                out.extend(chunk(b"fdAT", &fdat));
                sequence += 1;
            }
        }
        out.extend(chunk(b"IEND", &[]));
        out
    }
}
