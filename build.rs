use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");

    println!("cargo:rustc-env=FPR_AUDIT_BUILD_DATE={}", chrono::Utc::now().format("%Y-%m-%d"));
    if let Ok(target) = std::env::var("TARGET") {
        println!("cargo:rustc-env=FPR_AUDIT_TARGET={target}");
    }

    // Missing git or a source tarball build leaves the revision unset.
    let rev = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|rev| !rev.is_empty());
    if let Some(rev) = rev {
        println!("cargo:rustc-env=FPR_AUDIT_GIT_REV={rev}");
    }
}
