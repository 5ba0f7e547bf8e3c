//! `DockerCli` against a stand-in `docker` script, so the CLI handling is
//! exercised without an engine.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use circus_container::{ContainerError, ContainerRunner, ContainerSpec, DockerCli, RunOptions};

/// Write an executable `docker` replacement into `dir`.
fn stand_in_docker(dir: &Path, script: &str) -> PathBuf {
    let path = dir.join("docker");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn runner(docker: &Path) -> ContainerRunner {
    let engine = Arc::new(DockerCli::new(docker.display().to_string(), None));
    ContainerRunner::new(engine).with_poll_interval(Duration::from_millis(20))
}

#[tokio::test]
async fn start_refused_by_the_engine_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    // The engine leaves the container `created` and reports no state error;
    // only the attach client's exit status shows the failure.
    let docker = stand_in_docker(
        dir.path(),
        r#"#!/bin/sh
case "$1" in
  create) echo c0ffee ;;
  start) echo 'exec: "/run.sh": executable file not found in $PATH' >&2; exit 1 ;;
  inspect) echo 'created 127 ' ;;
  *) exit 0 ;;
esac
"#,
    );

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        runner(&docker).run(&ContainerSpec::new("circus/lung:1.0"), RunOptions::default()),
    )
    .await
    .expect("run should end once the attach client has failed");

    assert_matches!(
        result,
        Err(ContainerError::StartFailed { container_id, message })
            if container_id == "c0ffee" && message.contains("executable file not found")
    );
}

#[tokio::test]
async fn finished_container_returns_its_output() {
    let dir = tempfile::tempdir().unwrap();
    let docker = stand_in_docker(
        dir.path(),
        r#"#!/bin/sh
case "$1" in
  create) echo c0ffee ;;
  start) echo 'volume written' ;;
  inspect) echo 'exited 0 ' ;;
  *) exit 0 ;;
esac
"#,
    );

    let output = runner(&docker)
        .run(&ContainerSpec::new("circus/lung:1.0"), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(output.trim(), "volume written");
}
