use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=data/catalog.json");

    let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
    else {
        return;
    };
    if !output.status.success() {
        return;
    }
    if let Ok(hash) = String::from_utf8(output.stdout) {
        let trimmed = hash.trim();
        if !trimmed.is_empty() {
            println!("cargo:rustc-env=GIT_COMMIT_HASH={trimmed}");
        }
    }
}
