use assert_cmd::Command;
use predicates::str::contains;

fn gitdeploy() -> Command {
    Command::cargo_bin("gitdeploy").expect("binary built")
}

#[test]
fn help_lists_config_flag() {
    gitdeploy()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--config"));
}

#[test]
fn version_prints_binary_name() {
    gitdeploy()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("gitdeploy"));
}

#[test]
fn malformed_config_file_fails_fast() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("gitdeploy.toml");
    std::fs::write(&config_path, "this is not valid toml =====").expect("write config");

    gitdeploy()
        .arg("--config")
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(contains("failed to load config"));
}
