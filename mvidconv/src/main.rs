use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, ValueEnum};

use maxvid::convert::{ConvertOptions, KeyframeMode, convert_file};
use maxvid::format::RecordLayout;

/// MVID Conversion Tool: converts QuickTime Animation .mov and APNG files to .mvid.
#[derive(Parser)]
#[command(name = "mvidconv")]
struct Args {
    /// Output directory ("SRC-FOLDER" = alongside the input files)
    #[arg(long = "output-folder", default_value = "./")]
    output_folder: String,

    /// How keyframes are stored
    #[arg(long = "keyframes", value_enum, default_value_t = Keyframes::Raw)]
    keyframes: Keyframes,

    /// Write the legacy 32-bit frame table (only honoured when frames fit)
    #[arg(long = "legacy-layout", default_value_t = false, action = ArgAction::Set)]
    legacy_layout: bool,

    /// Stop on the first error instead of continuing and reporting failures at the end
    #[arg(long = "fail-fast", default_value_t = false, action = ArgAction::Set)]
    fail_fast: bool,

    /// Display version and quit
    #[arg(long = "version")]
    version: bool,

    /// Input .mov / .png / .apng files
    files: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Keyframes {
    /// Uncompressed, page-aligned pixels
    Raw,
    /// Run-length opcodes
    Compressed,
}

impl Args {
    fn options(&self) -> ConvertOptions {
        ConvertOptions {
            keyframes: match self.keyframes {
                Keyframes::Raw => KeyframeMode::Raw,
                Keyframes::Compressed => KeyframeMode::Compressed,
            },
            layout: if self.legacy_layout {
                RecordLayout::Legacy
            } else {
                RecordLayout::Large
            },
        }
    }
}

/// Convert known single-dash flags to double-dash for clap compatibility.
/// Handles both `-flag value` and `-flag=value` forms.
fn normalise_args(args: Vec<String>) -> Vec<String> {
    let known_flags = [
        "-output-folder",
        "-keyframes",
        "-legacy-layout",
        "-fail-fast",
        "-version",
    ];

    args.into_iter()
        .map(|arg| {
            for flag in &known_flags {
                if arg == *flag {
                    return format!("-{}", flag);
                }
                let prefix = format!("{}=", flag);
                if arg.starts_with(&prefix) {
                    return format!("-{}", arg);
                }
            }
            arg
        })
        .collect()
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let raw_args: Vec<String> = std::env::args().collect();
    let normalised = normalise_args(raw_args);
    let args = Args::parse_from(normalised);

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.version {
        maxvid::version::print_cli_version_banner(
            "MVID Conversion Tool",
            env!("CARGO_PKG_VERSION"),
            env!("RELEASE_VERSION"),
            env!("GIT_COMMIT"),
        );
        return Ok(());
    }

    if args.files.is_empty() {
        return Err("Expected at least one .mov or .png file as input!".into());
    }
    convert_cli(args)
}

/// A deferred failure collected when not in fail-fast mode.
#[derive(Debug)]
enum DeferredError {
    /// The input could not be found or is not a regular file.
    Input { file: String, error: String },
    /// Conversion started but failed.
    Convert { file: String, code: u32, error: String },
}

impl std::fmt::Display for DeferredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferredError::Input { file, error } => write!(f, "Cannot read {}: {}", file, error),
            DeferredError::Convert { file, code, error } => {
                write!(f, "Failed to convert {} (error {}): {}", file, code, error)
            }
        }
    }
}

fn convert_cli(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let options = args.options();
    let mut errors: Vec<DeferredError> = Vec::new();

    for input in &args.files {
        let failure = match process_file(args, input, &options) {
            Ok(()) => continue,
            Err(failure) => failure,
        };
        if args.fail_fast {
            return Err(failure.to_string().into());
        }
        log::warn!("{}", failure);
        errors.push(failure);
    }

    if !errors.is_empty() {
        log::error!("");
        log::error!("OPERATION COMPLETED WITH ERRORS:");
        for e in &errors {
            log::error!("  {}", e);
        }
        return Err(format!("{} error(s) encountered during processing", errors.len()).into());
    }

    Ok(())
}

fn output_path(output_folder: &str, input: &str) -> PathBuf {
    let folder = output_folder.trim_end_matches(['/', '\\']);
    let folder = if folder == "SRC-FOLDER" {
        Path::new(input)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    } else if folder.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(folder)
    };

    let stem = Path::new(input)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    folder.join(format!("{stem}.mvid"))
}

fn process_file(args: &Args, input: &str, options: &ConvertOptions) -> Result<(), DeferredError> {
    let path = Path::new(input);
    if !path.is_file() {
        return Err(DeferredError::Input {
            file: input.to_string(),
            error: "not found or not a regular file".to_string(),
        });
    }

    let output = output_path(&args.output_folder, input);
    log::info!("Converting {} -> {}", input, output.display());
    let summary = convert_file(path, &output, options).map_err(|e| DeferredError::Convert {
        file: input.to_string(),
        code: e.code(),
        error: e.to_string(),
    })?;
    log::info!(
        "\t{}x{} {} bpp, {} frames at {:.4}s ({} keyframes, {} deltas, {} no-ops), {} payload bytes",
        summary.width,
        summary.height,
        summary.bpp,
        summary.frames,
        summary.frame_duration,
        summary.keyframes,
        summary.deltas,
        summary.nop_frames,
        summary.payload_bytes
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_single_dash_flags() {
        let args = vec![
            "mvidconv".to_string(),
            "-keyframes=compressed".to_string(),
            "-fail-fast".to_string(),
            "true".to_string(),
            "-x".to_string(),
            "clip.mov".to_string(),
        ];
        assert_eq!(
            normalise_args(args),
            vec!["mvidconv", "--keyframes=compressed", "--fail-fast", "true", "-x", "clip.mov"]
        );
    }

    #[test]
    fn test_output_path() {
        assert_eq!(output_path("./", "in/clip.mov"), PathBuf::from("./clip.mvid"));
        assert_eq!(output_path("out/", "clip.apng"), PathBuf::from("out/clip.mvid"));
        assert_eq!(output_path("SRC-FOLDER", "in/clip.mov"), PathBuf::from("in/clip.mvid"));
        assert_eq!(output_path("SRC-FOLDER", "clip.mov"), PathBuf::from("./clip.mvid"));
    }

    #[test]
    fn test_options_from_flags() {
        let args = Args::parse_from(["mvidconv", "--keyframes", "compressed", "--legacy-layout=true", "a.mov"]);
        let options = args.options();
        assert_eq!(options.keyframes, KeyframeMode::Compressed);
        assert_eq!(options.layout, RecordLayout::Legacy);
        assert_eq!(Args::parse_from(["mvidconv", "a.mov"]).options(), ConvertOptions::default());
    }
}
