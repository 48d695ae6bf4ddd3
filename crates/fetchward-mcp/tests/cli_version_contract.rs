#[test]
fn fetchward_version_contract() {
    let bin = assert_cmd::cargo::cargo_bin!("fetchward");
    let out = std::process::Command::new(bin)
        .args(["version"])
        .output()
        .expect("run fetchward version");

    assert!(out.status.success(), "fetchward version failed");
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(s.trim().starts_with("fetchward "));
}
