mod common;

use std::io::Cursor;

use common::{ApngBuilder, TestFrame, MovBuilder};
use maxvid::convert::{ConvertOptions, KeyframeMode, convert_apng, convert_file, convert_mov};
use maxvid::format::{FrameFlags, RecordLayout, VERSION_LARGE, VERSION_LEGACY};
use maxvid::pixels::{Depth, FrameBuffer};
use maxvid::qtrle::{SampleBuilder, decode_sample16, decode_sample24, decode_sample32};
use maxvid::reader::{FrameDecoder, MvidFile, is_finalized};
use sha2::{Digest, Sha256};

fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn all_options() -> Vec<ConvertOptions> {
    let mut out = Vec::new();
    for keyframes in [KeyframeMode::Raw, KeyframeMode::Compressed] {
        for layout in [RecordLayout::Large, RecordLayout::Legacy] {
            out.push(ConvertOptions { keyframes, layout });
        }
    }
    out
}

fn open(bytes: &[u8]) -> MvidFile<Cursor<Vec<u8>>> {
    assert!(is_finalized(&mut Cursor::new(bytes)).unwrap());
    MvidFile::open(Cursor::new(bytes.to_vec())).unwrap()
}

/// Digest of every decoded frame, checking recorded checksums on the way.
fn decoded_digests(bytes: &[u8]) -> Vec<String> {
    let file = open(bytes);
    let count = file.frame_count();
    let mut decoder = FrameDecoder::new(file);
    decoder.set_verify(true);
    (0..count)
        .map(|i| digest(&decoder.decode(i).unwrap().to_le_bytes()))
        .collect()
}

fn convert_mov_bytes(mov: &[u8], options: &ConvertOptions) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    convert_mov(&mut Cursor::new(mov), &mut out, options).unwrap();
    out.into_inner()
}

fn convert_apng_bytes(apng: &[u8], options: &ConvertOptions) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    convert_apng(&mut Cursor::new(apng), &mut out, options).unwrap();
    out.into_inner()
}

/// 4x3 RGB24 samples: keyframe, partial delta, held delta, single-pixel delta.
fn rgb24_samples() -> Vec<Vec<u8>> {
    let mut key = SampleBuilder::new();
    key.skip_code(1)
        .rle_code(-4)
        .bytes(&[0x10, 0x20, 0x30])
        .rle_code(-1)
        .skip_code(1)
        .rle_code(4)
        .bytes(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12])
        .rle_code(-1)
        .skip_code(2)
        .rle_code(-3)
        .bytes(&[0xFF, 0xFF, 0xFF])
        .rle_code(-1);

    let mut delta = SampleBuilder::new().partial(1, 2);
    delta
        .skip_code(3)
        .rle_code(2)
        .bytes(&[0xAA, 0, 0, 0, 0xBB, 0])
        .rle_code(-1)
        .skip_code(1)
        .rle_code(-2)
        .bytes(&[0, 0, 0xCC])
        .rle_code(-1);

    let mut held = SampleBuilder::new().partial(0, 1);
    held.skip_code(1).rle_code(1).bytes(&[9, 9, 9]).rle_code(-1);

    let mut last = SampleBuilder::new().partial(2, 1);
    last.skip_code(4).rle_code(1).bytes(&[0x12, 0x34, 0x56]).rle_code(-1);

    vec![key.build(), delta.build(), held.build(), last.build()]
}

#[test]
fn test_mov_24bpp_matches_direct_decode() {
    let samples = rgb24_samples();
    // Sample 2 lasts two frame durations, so it is shown twice.
    let durations = [100, 100, 200, 100];
    let mut builder = MovBuilder::new(4, 3, 24);
    for (i, (sample, duration)) in samples.iter().zip(durations).enumerate() {
        builder = builder.sample(sample.clone(), duration, i == 0);
    }
    let mov = builder.build();

    let mut fb = FrameBuffer::<u32>::new(4, 3);
    let mut expected = Vec::new();
    for (i, sample) in samples.iter().enumerate() {
        decode_sample24(sample, i == 0, &mut fb);
        expected.push(digest(&fb.to_le_bytes()));
        if i == 2 {
            expected.push(digest(&fb.to_le_bytes()));
        }
    }

    for options in all_options() {
        let bytes = convert_mov_bytes(&mov, &options);
        assert_eq!(decoded_digests(&bytes), expected, "{options:?}");

        let file = open(&bytes);
        let header = file.header();
        assert_eq!((header.width, header.height, header.bpp), (4, 3, 24));
        assert_eq!(header.num_frames, 5);
        assert!((header.frame_duration - 100.0 / 600.0).abs() < 1e-6);

        let records = file.records();
        assert!(records[0].flags.keyframe());
        assert_eq!(records[0].flags.compressed(), options.keyframes == KeyframeMode::Compressed);
        assert_eq!(records[1].flags.0, FrameFlags::COMPRESSED);
        // The held sample repeats as a no-op pointing at its payload.
        assert!(records[3].flags.nop());
        assert_eq!(records[3].offset, records[2].offset);
        assert_eq!(records[3].length, records[2].length);
        assert_eq!(records[3].adler, records[2].adler);
        assert!(!records[4].flags.nop());
    }
}

#[test]
fn test_mov_32bpp_premultiplies_and_round_trips() {
    let mut key = SampleBuilder::new();
    key.skip_code(1)
        .rle_code(2)
        .bytes(&[0x80, 0xFF, 0x00, 0x00, 0x00, 0x12, 0x34, 0x56])
        .rle_code(-1)
        .skip_code(1)
        .rle_code(-2)
        .bytes(&[0xFF, 0x01, 0x02, 0x03])
        .rle_code(-1);
    let mut delta = SampleBuilder::new();
    delta.skip_code(2).rle_code(1).bytes(&[0x40, 0xFF, 0xFF, 0xFF]).rle_code(-1);
    let mov = MovBuilder::new(2, 2, 32)
        .sample(key.build(), 50, true)
        .sample(delta.build(), 50, false)
        .build();

    for options in all_options() {
        let bytes = convert_mov_bytes(&mov, &options);
        let mut decoder = FrameDecoder::new(open(&bytes));
        decoder.set_verify(true);
        let frame = decoder.decode(0).unwrap().as_pixels32().unwrap().clone();
        assert_eq!(frame.pixels(), &[0x8080_0000, 0x0000_0000, 0xFF01_0203, 0xFF01_0203]);
        let frame = decoder.decode(1).unwrap().as_pixels32().unwrap().clone();
        assert_eq!(frame.pixels(), &[0x8080_0000, 0x4040_4040, 0xFF01_0203, 0xFF01_0203]);
    }
}

#[test]
fn test_mov_16bpp_matches_direct_decode() {
    let mut key = SampleBuilder::new();
    key.skip_code(1)
        .rle_code(-3)
        .bytes(&[0x7C, 0x00])
        .rle_code(-1)
        .skip_code(1)
        .rle_code(3)
        .bytes(&[0x03, 0xE0, 0x00, 0x1F, 0x7F, 0xFF])
        .rle_code(-1);
    let mut delta = SampleBuilder::new().partial(1, 1);
    delta.skip_code(2).rle_code(-2).bytes(&[0x12, 0x34]).rle_code(-1);
    let samples = [key.build(), delta.build()];
    let mov = MovBuilder::new(3, 2, 16)
        .sample(samples[0].clone(), 20, true)
        .sample(samples[1].clone(), 20, false)
        .build();

    let mut fb = FrameBuffer::<u16>::new(3, 2);
    let mut expected = Vec::new();
    for (i, sample) in samples.iter().enumerate() {
        decode_sample16(sample, i == 0, &mut fb);
        expected.push(digest(&fb.to_le_bytes()));
    }
    assert_eq!(fb.pixels(), &[0x7C00, 0x7C00, 0x7C00, 0x03E0, 0x1234, 0x1234]);

    for options in all_options() {
        let bytes = convert_mov_bytes(&mov, &options);
        let file = open(&bytes);
        assert_eq!(file.depth(), Depth::Bpp16);
        assert_eq!(decoded_digests(&bytes), expected, "{options:?}");
    }
}

#[test]
fn test_legacy_layout_header_version() {
    let samples = rgb24_samples();
    let mov = MovBuilder::new(4, 3, 24)
        .sample(samples[0].clone(), 10, true)
        .sample(samples[1].clone(), 10, false)
        .build();

    let legacy = ConvertOptions {
        layout: RecordLayout::Legacy,
        ..Default::default()
    };
    let bytes = convert_mov_bytes(&mov, &legacy);
    let file = open(&bytes);
    assert_eq!(file.layout(), RecordLayout::Legacy);
    assert_eq!(file.header().version_flags.version(), VERSION_LEGACY);

    let large = convert_mov_bytes(&mov, &ConvertOptions::default());
    assert_eq!(open(&large).header().version_flags.version(), VERSION_LARGE);
    assert_eq!(decoded_digests(&bytes), decoded_digests(&large));
}

#[test]
fn test_mov_with_two_tracks_rejected() {
    let samples = rgb24_samples();
    let mov = MovBuilder::new(4, 3, 24).sample(samples[0].clone(), 10, true).build();
    // Duplicate the trak atom inside moov.
    let moov_at = mov.windows(4).position(|w| w == b"moov").unwrap() - 4;
    let trak_at = mov.windows(4).position(|w| w == b"trak").unwrap() - 4;
    let trak_len = u32::from_be_bytes(mov[trak_at..trak_at + 4].try_into().unwrap()) as usize;
    let trak = mov[trak_at..trak_at + trak_len].to_vec();
    let mut doubled = mov.clone();
    doubled.extend_from_slice(&trak);
    let moov_len = u32::from_be_bytes(mov[moov_at..moov_at + 4].try_into().unwrap()) + trak_len as u32;
    doubled[moov_at..moov_at + 4].copy_from_slice(&moov_len.to_be_bytes());

    let err = convert_mov(
        &mut Cursor::new(doubled),
        Cursor::new(Vec::new()),
        &ConvertOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.code(), 205);
}

#[test]
fn test_apng_two_identical_frames() {
    let red = [255, 0, 0, 128];
    let apng = ApngBuilder::new(2, 2, true)
        .frame(TestFrame::full(2, 2, vec![red; 4]))
        .frame(TestFrame::full(2, 2, vec![red; 4]))
        .build();

    let bytes = convert_apng_bytes(&apng, &ConvertOptions::default());
    let file = open(&bytes);
    assert_eq!(file.header().num_frames, 2);
    assert_eq!(file.depth(), Depth::Bpp32);
    let records = file.records().to_vec();
    assert!(records[0].flags.keyframe());
    assert!(!records[0].flags.nop());
    assert!(records[1].flags.nop());
    assert_eq!(records[1].offset, records[0].offset);

    let mut decoder = FrameDecoder::new(file);
    decoder.set_verify(true);
    for index in 0..2 {
        let frame = decoder.decode(index).unwrap().as_pixels32().unwrap();
        assert_eq!(frame.pixels(), &[0x8080_0000; 4]);
    }
}

#[test]
fn test_info_serializes_to_json() {
    let apng = ApngBuilder::new(1, 1, true)
        .frame(TestFrame::full(1, 1, vec![[9, 9, 9, 255]]))
        .frame(TestFrame::full(1, 1, vec![[9, 9, 9, 255]]))
        .build();
    let bytes = convert_apng_bytes(&apng, &ConvertOptions::default());
    let json = serde_json::to_value(open(&bytes).info()).unwrap();
    assert_eq!(json["header"]["num_frames"], 2);
    assert_eq!(json["header"]["bpp"], 32);
    assert_eq!(json["layout"], "Large");
    assert_eq!(json["records"][1]["flags"], FrameFlags::NOPFRAME | FrameFlags::KEYFRAME);
}

#[test]
fn test_apng_delays_become_repeats() {
    let apng = ApngBuilder::new(2, 1, false)
        .frame(TestFrame::full(2, 1, vec![[1, 2, 3, 255], [4, 5, 6, 255]]))
        .frame(TestFrame {
            delay_num: 3,
            ..TestFrame::full(2, 1, vec![[7, 8, 9, 255], [4, 5, 6, 255]])
        })
        .build();

    for options in all_options() {
        let bytes = convert_apng_bytes(&apng, &options);
        let file = open(&bytes);
        assert_eq!(file.depth(), Depth::Bpp24);
        assert_eq!(file.header().num_frames, 4);
        let flags: Vec<bool> = file.records().iter().map(|r| r.flags.nop()).collect();
        assert_eq!(flags, vec![false, false, true, true]);

        let mut decoder = FrameDecoder::new(file);
        decoder.set_verify(true);
        let first = decoder.decode(0).unwrap().as_pixels32().unwrap().clone();
        assert_eq!(first.pixels(), &[0x0001_0203, 0x0004_0506]);
        let last = decoder.decode(3).unwrap().as_pixels32().unwrap().clone();
        assert_eq!(last.pixels(), &[0x0007_0809, 0x0004_0506]);
    }
}

#[test]
fn test_apng_one_pixel_marker_frames() {
    let blue = [0, 0, 255, 255];
    let first = TestFrame {
        dispose: 1,
        ..TestFrame::full(2, 2, vec![blue; 4])
    };
    let marker = |pixel: [u8; 4]| TestFrame::full(1, 1, vec![pixel]);

    // Same pixel at the origin: treated as a no-op even though disposal
    // cleared the rest of the canvas.
    let apng = ApngBuilder::new(2, 2, true)
        .frame(first)
        .frame(marker(blue))
        .build();
    let bytes = convert_apng_bytes(&apng, &ConvertOptions::default());
    assert!(open(&bytes).records()[1].flags.nop());

    // A different pixel is a real update.
    let first = TestFrame {
        dispose: 1,
        ..TestFrame::full(2, 2, vec![blue; 4])
    };
    let apng = ApngBuilder::new(2, 2, true)
        .frame(first)
        .frame(marker([255, 255, 255, 255]))
        .build();
    let bytes = convert_apng_bytes(&apng, &ConvertOptions::default());
    let file = open(&bytes);
    assert!(!file.records()[1].flags.nop());
    let mut decoder = FrameDecoder::new(file);
    decoder.set_verify(true);
    let frame = decoder.decode(1).unwrap().as_pixels32().unwrap();
    assert_eq!(frame.pixels(), &[0xFFFF_FFFF, 0, 0, 0]);
}

#[test]
fn test_convert_file_sniffs_inputs() {
    let dir = std::env::temp_dir().join(format!("maxvid-integration-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let samples = rgb24_samples();
    let mov = MovBuilder::new(4, 3, 24).sample(samples[0].clone(), 10, true).build();
    let apng = ApngBuilder::new(1, 1, true)
        .frame(TestFrame::full(1, 1, vec![[1, 2, 3, 4]]))
        .frame(TestFrame::full(1, 1, vec![[5, 6, 7, 8]]))
        .build();

    for (name, data, frames) in [("clip.mov", mov, 1), ("clip.png", apng, 2)] {
        let input = dir.join(name);
        let output = dir.join(format!("{name}.mvid"));
        std::fs::write(&input, data).unwrap();
        let summary = convert_file(&input, &output, &ConvertOptions::default()).unwrap();
        assert_eq!(summary.frames, frames);
        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(open(&bytes).frame_count(), frames);
    }

    // A truncated movie fails and leaves no output behind.
    let input = dir.join("broken.mov");
    let output = dir.join("broken.mvid");
    let mut mov = MovBuilder::new(4, 3, 24).sample(samples[0].clone(), 10, true).build();
    mov.truncate(mov.len() - 10);
    std::fs::write(&input, mov).unwrap();
    assert!(convert_file(&input, &output, &ConvertOptions::default()).is_err());
    assert!(!output.exists());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_decode_32bpp_direct_path_agrees() {
    // The same Argb32 sample decoded directly and through the container.
    let mut key = SampleBuilder::new();
    key.skip_code(1).rle_code(-2).bytes(&[0x33, 0x66, 0x99, 0xCC]).rle_code(-1);
    let sample = key.build();
    let mov = MovBuilder::new(2, 1, 32).sample(sample.clone(), 30, true).build();

    let mut fb = FrameBuffer::<u32>::new(2, 1);
    decode_sample32(&sample, true, &mut fb);
    let bytes = convert_mov_bytes(&mov, &ConvertOptions::default());
    assert_eq!(decoded_digests(&bytes), vec![digest(&fb.to_le_bytes())]);
}

fn rgb24_movie() -> Vec<u8> {
    let mut builder = MovBuilder::new(4, 3, 24);
    for (i, sample) in rgb24_samples().into_iter().enumerate() {
        builder = builder.sample(sample, 100, i == 0);
    }
    builder.build()
}

fn find(haystack: &[u8], needle: &[u8; 4]) -> usize {
    haystack.windows(4).position(|w| w == needle).unwrap()
}

fn mov_error_code(mov: Vec<u8>) -> u32 {
    convert_mov(&mut Cursor::new(mov), Cursor::new(Vec::new()), &ConvertOptions::default())
        .unwrap_err()
        .code()
}

fn apng_error_code(apng: Vec<u8>) -> u32 {
    convert_apng(&mut Cursor::new(apng), Cursor::new(Vec::new()), &ConvertOptions::default())
        .unwrap_err()
        .code()
}

#[test]
fn test_corrupt_mvid_headers_rejected() {
    let bytes = convert_mov_bytes(&rgb24_movie(), &ConvertOptions::default());
    let open_code = |bytes: Vec<u8>| MvidFile::open(Cursor::new(bytes)).unwrap_err().code();

    let mut unfinished = bytes.clone();
    unfinished[..4].copy_from_slice(&[0; 4]);
    assert_eq!(open_code(unfinished), 101);

    let mut bad_depth = bytes.clone();
    bad_depth[12..16].copy_from_slice(&8u32.to_le_bytes());
    assert_eq!(open_code(bad_depth), 103);

    for (frames, code) in [(u32::MAX, 114), (100_000, 115)] {
        let mut table = bytes.clone();
        table[20..24].copy_from_slice(&frames.to_le_bytes());
        assert_eq!(open_code(table), code, "{frames} frames");
    }

    assert_eq!(open_code(bytes[..40].to_vec()), 100);
}

#[test]
fn test_tampered_mvid_frames_fail_verification() {
    let bytes = convert_mov_bytes(&rgb24_movie(), &ConvertOptions::default());
    let decode_code = |bytes: Vec<u8>, index: usize| {
        let mut decoder = FrameDecoder::new(MvidFile::open(Cursor::new(bytes)).unwrap());
        decoder.set_verify(true);
        decoder.decode(index).unwrap_err().code()
    };
    let records = open(&bytes).records().to_vec();

    // A pixel of the raw keyframe.
    let mut pixel = bytes.clone();
    pixel[records[0].offset as usize + 1] ^= 0x40;
    assert_eq!(decode_code(pixel, 0), 112);

    // The recorded checksum of the first delta (large record, adler word).
    let mut adler = bytes.clone();
    let at = 64 + 24 + 16;
    adler[at..at + 4].copy_from_slice(&0x1234_5678u32.to_le_bytes());
    assert_eq!(decode_code(adler, 1), 112);

    // The last payload cut off.
    let last = records.last().unwrap();
    let cut = bytes[..(last.offset + last.length as u64 - 1) as usize].to_vec();
    assert_eq!(decode_code(cut, records.len() - 1), 116);
}

#[test]
fn test_corrupt_movies_rejected() {
    let mov = rgb24_movie();

    // mdat claims more bytes than the file holds.
    let mut oversized = mov.clone();
    let mdat_at = find(&mov, b"mdat") - 4;
    oversized[mdat_at..mdat_at + 4].copy_from_slice(&0xFFFF_FFF0u32.to_be_bytes());
    assert_eq!(mov_error_code(oversized), 201);

    // First chunk offset points past mdat.
    let mut outside = mov.clone();
    let entry_at = find(&mov, b"stco") + 12;
    outside[entry_at..entry_at + 4].copy_from_slice(&0x00FF_0000u32.to_be_bytes());
    assert_eq!(mov_error_code(outside), 211);

    // No moov at all.
    let moov_at = find(&mov, b"moov") - 4;
    assert_eq!(mov_error_code(mov[..moov_at].to_vec()), 203);

    // Uniform sample size with an absurd sample count.
    let mut counted = mov.clone();
    let stsz_at = find(&mov, b"stsz") + 8;
    counted[stsz_at..stsz_at + 8].copy_from_slice(&[0, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF]);
    assert_eq!(mov_error_code(counted), 210);
}

#[test]
fn test_corrupt_apngs_rejected() {
    let pixel = [1, 2, 3, 255];
    let apng = ApngBuilder::new(1, 2, true)
        .frame(TestFrame::full(1, 2, vec![pixel; 2]))
        .frame(TestFrame::full(1, 2, vec![[4, 5, 6, 255]; 2]))
        .build();

    let mut bad_crc = apng.clone();
    let idat_at = find(&apng, b"IDAT");
    bad_crc[idat_at + 4] ^= 0xFF;
    assert_eq!(apng_error_code(bad_crc), 303);

    // acTL declares three frames; rewrite its CRC so only the count is wrong.
    let mut miscounted = apng.clone();
    let actl_at = find(&apng, b"acTL");
    miscounted[actl_at + 4..actl_at + 8].copy_from_slice(&3u32.to_be_bytes());
    let mut crc = flate2::Crc::new();
    crc.update(&miscounted[actl_at..actl_at + 12]);
    miscounted[actl_at + 12..actl_at + 16].copy_from_slice(&crc.sum().to_be_bytes());
    assert_eq!(apng_error_code(miscounted), 307);

    let mut not_png = apng.clone();
    not_png[1] = b'X';
    assert_eq!(apng_error_code(not_png), 301);

    // Cut inside the fdAT payload.
    let fdat_at = find(&apng, b"fdAT") - 4;
    assert_eq!(apng_error_code(apng[..fdat_at + 10].to_vec()), 302);
}
