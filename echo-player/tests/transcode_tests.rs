//! Transcoder process tests
//!
//! Stand-in shell programs play the transcoder so the pipeline can be
//! exercised without ffmpeg installed. Serialized because every test spawns
//! child processes.

#![cfg(unix)]

mod helpers;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use serial_test::serial;

use echo_player::playback::upload_cache_key;
use echo_player::transcode::{
    FfmpegTranscoder, SourceDescriptor, SourceInput, StreamOutcome, Transcode,
};
use echo_player::Error;
use helpers::open_cache;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn source() -> SourceDescriptor {
    SourceDescriptor::new(SourceInput::Url("https://cdn.example/song.mp3".to_string()))
}

#[tokio::test]
#[serial]
async fn test_missing_program_is_source_unavailable() {
    let transcoder = FfmpegTranscoder::new("/nonexistent/echo-ffmpeg");
    let result = transcoder.open(source()).await;
    assert!(matches!(result, Err(Error::SourceUnavailable(_))));
}

#[tokio::test]
#[serial]
async fn test_exit_without_output_is_source_unavailable() {
    for program in ["false", "true"] {
        let result = FfmpegTranscoder::new(program).open(source()).await;
        assert!(
            matches!(result, Err(Error::SourceUnavailable(_))),
            "{} should fail to open",
            program
        );
    }
}

#[tokio::test]
#[serial]
async fn test_output_streams_and_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let program = script(dir.path(), "ok.sh", "printf 'opus-data'");

    let stream = FfmpegTranscoder::new(program.to_string_lossy())
        .open(source())
        .await
        .unwrap();
    let outcome = stream.outcome();

    let chunks: Vec<_> = stream.collect().await;
    let bytes: Vec<u8> = chunks
        .into_iter()
        .flat_map(|c| c.unwrap().to_vec())
        .collect();

    assert_eq!(bytes, b"opus-data");
    assert_eq!(outcome.wait().await, StreamOutcome::Finished);
}

#[tokio::test]
#[serial]
async fn test_failure_after_output_surfaces_on_stream() {
    let dir = tempfile::tempdir().unwrap();
    let program = script(
        dir.path(),
        "fail.sh",
        "printf 'partial'\necho 'decode error' >&2\nexit 3",
    );

    let stream = FfmpegTranscoder::new(program.to_string_lossy())
        .open(source())
        .await
        .unwrap();
    let outcome = stream.outcome();

    let items: Vec<_> = stream.collect().await;
    assert!(items.first().unwrap().is_ok());
    assert!(items.last().unwrap().is_err());

    match outcome.wait().await {
        StreamOutcome::Failed(reason) => assert!(reason.contains("decode error"), "{}", reason),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
#[serial]
async fn test_tee_commits_output_to_cache() {
    let (dir, cache) = open_cache(1024 * 1024).await;
    let program = script(dir.path(), "tee.sh", "printf 'transcoded upload'");
    let key = upload_cache_key("https://cdn.example/song.mp3");

    let (writer, pending) = cache.begin_write(&key).await.unwrap();
    let stream = FfmpegTranscoder::new(program.to_string_lossy())
        .open(source().caching_into(writer))
        .await
        .unwrap();
    let outcome = stream.outcome();
    let _: Vec<_> = stream.collect().await;

    assert_eq!(outcome.wait().await, StreamOutcome::Finished);
    let committed = pending.wait().await.unwrap().expect("tee committed");
    assert_eq!(std::fs::read(&committed).unwrap(), b"transcoded upload");
    assert_eq!(cache.lookup(&key).await.unwrap(), Some(committed));
}

#[tokio::test]
#[serial]
async fn test_tee_keeps_running_after_consumer_leaves() {
    let (dir, cache) = open_cache(1024 * 1024).await;
    let program = script(
        dir.path(),
        "slow.sh",
        "printf 'first'\nsleep 0.2\nprintf 'second'",
    );
    let key = upload_cache_key("https://cdn.example/slow.mp3");

    let (writer, pending) = cache.begin_write(&key).await.unwrap();
    let mut stream = FfmpegTranscoder::new(program.to_string_lossy())
        .open(source().caching_into(writer))
        .await
        .unwrap();
    let outcome = stream.outcome();

    assert!(stream.next().await.unwrap().is_ok());
    drop(stream);

    assert_eq!(outcome.wait().await, StreamOutcome::Finished);
    let committed = pending.wait().await.unwrap().expect("tee committed");
    assert_eq!(std::fs::read(committed).unwrap(), b"firstsecond");
}

#[tokio::test]
#[serial]
async fn test_dropping_stream_kills_process() {
    let dir = tempfile::tempdir().unwrap();
    let program = script(
        dir.path(),
        "endless.sh",
        "while true; do printf 'opus-frame'; sleep 0.01; done",
    );

    let mut stream = FfmpegTranscoder::new(program.to_string_lossy())
        .open(source())
        .await
        .unwrap();
    let outcome = stream.outcome();

    assert!(stream.next().await.unwrap().is_ok());
    drop(stream);

    let result = tokio::time::timeout(std::time::Duration::from_secs(5), outcome.wait())
        .await
        .expect("transcoder was not stopped");
    assert_eq!(result, StreamOutcome::Cancelled);
}
