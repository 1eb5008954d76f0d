//! Stamps the version string with the commit, the build day and the compiled-in media backends.

use std::env;
use std::process::Command;

use time::OffsetDateTime;

fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=../../.git/HEAD");

    println!("cargo:rustc-env=GIT_SHA={}", commit());
    println!("cargo:rustc-env=BUILD_DATE={}", build_day());
    println!("cargo:rustc-env=VPLAY_BACKENDS={}", backends());
}

fn commit() -> String {
    git(&["describe", "--always", "--dirty", "--abbrev=8"]).unwrap_or_else(|| "unknown".into())
}

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let text = String::from_utf8(out.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Calendar day of the build. `SOURCE_DATE_EPOCH` pins it for reproducible builds.
fn build_day() -> String {
    env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or_else(OffsetDateTime::now_utc)
        .date()
        .to_string()
}

fn backends() -> &'static str {
    if env::var_os("CARGO_FEATURE_FFMPEG").is_some() {
        "y4m+ffmpeg"
    } else {
        "y4m"
    }
}
