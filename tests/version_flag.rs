use std::process::Command;

#[test]
fn prints_version() {
    let exe = env!("CARGO_BIN_EXE_moments");
    let output = Command::new(exe)
        .arg("--version")
        .output()
        .expect("run moments --version");
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
    let exe = env!("CARGO_BIN_EXE_moments");
    let output = Command::new(exe)
        .arg("--help")
        .output()
        .expect("run moments --help");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(stdout.contains("moments"));
    assert!(stdout.contains("--source"));
}

#[test]
fn rejects_unknown_arguments() {
    let exe = env!("CARGO_BIN_EXE_moments");
    let output = Command::new(exe)
        .arg("--frobnicate")
        .output()
        .expect("run moments --frobnicate");
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).expect("stderr utf8");
    assert!(stderr.contains("unknown argument"));
}
