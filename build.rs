//! Build script: stamps the binary with the source revision

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    // Short hash, suffixed with -dirty for uncommitted trees
    let git_hash =
        git(&["describe", "--always", "--dirty", "--abbrev=8"]).unwrap_or_else(|| String::from("unknown"));

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}
