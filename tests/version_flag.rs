use std::process::Command;

#[test]
fn prints_version() {
    let exe = env!("CARGO_BIN_EXE_med-gallery");
    let output = Command::new(exe)
        .arg("--version")
        .output()
        .expect("run med-gallery --version");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "stdout was: {}",
        stdout.trim()
    );
}

#[test]
fn prints_help() {
    let exe = env!("CARGO_BIN_EXE_med-gallery");
    let output = Command::new(exe)
        .arg("--help")
        .output()
        .expect("run med-gallery --help");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(stdout.contains("Med-Gallery"));
    assert!(stdout.contains("--version"));
    assert!(stdout.contains("--config"));
}

#[test]
fn rejects_unknown_flag() {
    let exe = env!("CARGO_BIN_EXE_med-gallery");
    let output = Command::new(exe)
        .arg("--bogus")
        .output()
        .expect("run med-gallery --bogus");
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).expect("stderr utf8");
    assert!(stderr.contains("unknown argument"));
}
