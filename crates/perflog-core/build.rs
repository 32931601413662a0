use std::env;
use std::process::Command;

/// Set by release tarball builds, which have no `.git` to ask.
const SHA_OVERRIDE: &str = "PERFLOG_GIT_SHA";

fn git_sha() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let sha = String::from_utf8(out.stdout).ok()?;
    Some(sha.trim().to_string()).filter(|s| !s.is_empty())
}

fn main() {
    let sha = env::var(SHA_OVERRIDE)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(git_sha)
        .unwrap_or_else(|| "unknown".into());

    // Logged by perflogd at startup.
    println!("cargo:rustc-env=GIT_SHA={sha}");

    println!("cargo:rerun-if-env-changed={SHA_OVERRIDE}");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/refs/");
}
