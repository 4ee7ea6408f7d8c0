use assert_cmd::prelude::*;
use flate2::{write::GzEncoder, Compression};
use predicates::prelude::*;
use std::fs::File;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn acops_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("acops"))
}

fn write_targz(path: &Path, members: &[&str]) {
    let enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    let mut tar = tar::Builder::new(enc);
    for m in members {
        let data = b"x";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append_data(&mut header, m, &data[..]).unwrap();
    }
    tar.into_inner().unwrap().finish().unwrap();
}

#[test]
fn inspect_java_archive_prints_guarded_start() {
    let tmp = TempDir::new().unwrap();
    let artifact = tmp.path().join("app.tar.gz");
    write_targz(&artifact, &["app/app.jar", "app/README.md"]);

    acops_cmd()
        .arg("inspect")
        .arg(&artifact)
        .args(["--language", "java"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"common_root_dir\": \"app\""))
        .stdout(predicate::str::contains(
            "[ -f app.tar.gz ] && tar -xzf app.tar.gz || exit 1 && [ -d app ] && cd app || exit 1",
        ))
        .stdout(predicate::str::contains("nohup java -jar app.jar > /root/app.log 2>&1 &"))
        .stdout(predicate::str::contains("pkill -f 'java -jar' || true"));
}

#[test]
fn inspect_docker_without_dockerfile_has_no_start() {
    let tmp = TempDir::new().unwrap();
    let artifact = tmp.path().join("svc.tar.gz");
    write_targz(&artifact, &["svc/main.go"]);

    acops_cmd()
        .arg("inspect")
        .arg(&artifact)
        .args(["--language", "docker", "--name", "My Svc"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"start\": null"))
        .stdout(predicate::str::contains("docker stop my-svc"));
}

#[test]
fn inspect_missing_artifact_fails() {
    let tmp = TempDir::new().unwrap();
    acops_cmd()
        .arg("inspect")
        .arg(tmp.path().join("nope.zip"))
        .args(["--language", "python"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.zip"));
}

#[test]
fn help_lists_subcommands() {
    acops_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("last-deployment"))
        .stdout(predicate::str::contains("describe-instances"));
}
