pub fn print_cli_version_banner(tool_name: &str, version: &str, release: &str, commit: &str) {
    println!("{tool_name}");
    println!("Copyright (c) Peter Wright 2020-2026");
    println!("License: GNU AGPL v3 (AGPL-3.0-only)");
    println!(
        "Reads .mvid versions 0-{large}, writes versions {legacy} and {large}",
        legacy = crate::format::VERSION_LEGACY,
        large = crate::format::VERSION_LARGE
    );
    println!();

    println!("\tVersion:     {version}");
    if !release.is_empty() {
        println!("\tGit tag:     {release}");
    }
    if !commit.is_empty() {
        println!("\tGit commit:  {commit}");
    }
}
