use std::fs::File;
use std::io::BufReader;

use clap::Parser;
use maxvid::format::FrameRecord;
use maxvid::reader::{FrameDecoder, MvidFile, is_finalized};

#[derive(Parser)]
#[command(name = "mvid-info", about = "Parse and display .mvid file structure")]
struct Args {
    /// Input .mvid file
    #[arg(short = 'f', long = "file")]
    file: Option<String>,

    /// Input .mvid file (positional)
    #[arg(conflicts_with = "file", required_unless_present_any = ["file", "schema", "version"])]
    input: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Print JSON schema for the output format and exit
    #[arg(long)]
    schema: bool,

    /// Decode every frame and check it against its recorded checksum
    #[arg(long)]
    verify: bool,

    /// Display version and quit
    #[arg(long)]
    version: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Reset SIGPIPE to default so piped output (e.g. head/tail) exits cleanly
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let args = Args::parse();

    if args.version {
        maxvid::version::print_cli_version_banner(
            "MVID Info Tool",
            env!("CARGO_PKG_VERSION"),
            env!("RELEASE_VERSION"),
            env!("GIT_COMMIT"),
        );
        return Ok(());
    }

    if args.schema {
        let schema = schemars::schema_for!(maxvid::reader::MvidInfo);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let path = args.file.or(args.input).ok_or("file argument required")?;
    let mut reader = BufReader::new(File::open(&path)?);
    if !is_finalized(&mut reader)? {
        return Err(format!("{path}: not a finished .mvid file (magic number missing)").into());
    }
    let file = MvidFile::open(reader)?;

    if args.json {
        println!("{}", serde_json::to_string(&file.info())?);
    } else {
        print_table(&file);
    }

    if args.verify {
        let count = file.frame_count();
        let mut decoder = FrameDecoder::new(file);
        decoder.set_verify(true);
        for index in 0..count {
            decoder.decode(index)?;
        }
        eprintln!("Verified {count} frames");
    }

    Ok(())
}

fn print_table<R>(file: &MvidFile<R>)
where
    R: std::io::Read + std::io::Seek,
{
    let header = file.header();
    println!("Size:      {}x{}", header.width, header.height);
    println!("Depth:     {}", file.depth());
    println!("Frames:    {}", header.num_frames);
    println!("Duration:  {:.4}s per frame", header.frame_duration);
    println!(
        "Version:   {} ({:?} records)",
        header.version_flags.version(),
        file.layout()
    );
    println!(
        "Flags:     all-keyframes={} deltas={}",
        header.version_flags.all_keyframes(),
        header.version_flags.deltas()
    );
    println!();

    println!("{:>7} {:>5} {:>12} {:>10} {:>10}", "FRAME", "FLAGS", "OFFSET", "LENGTH", "ADLER");
    for (index, record) in file.records().iter().enumerate() {
        println!(
            "{:>7} {:>5} {:>12} {:>10} {:>10}",
            index,
            flag_letters(record),
            record.offset,
            record.length,
            format!("{:08x}", record.adler),
        );
    }
}

/// `K` keyframe, `N` no-op, `C` compressed.
fn flag_letters(record: &FrameRecord) -> String {
    let flags = record.flags;
    [(flags.keyframe(), 'K'), (flags.nop(), 'N'), (flags.compressed(), 'C')]
        .iter()
        .map(|&(set, letter)| if set { letter } else { '-' })
        .collect()
}
