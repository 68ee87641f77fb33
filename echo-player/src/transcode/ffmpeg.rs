//! External transcoder process

use std::process::Stdio;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{build_args, AudioStream, SourceDescriptor, StreamOutcome, Transcode};
use crate::cache::CacheWriter;
use crate::error::{Error, Result};

const CHUNK_SIZE: usize = 16 * 1024;
const CHANNEL_DEPTH: usize = 32;
const STDERR_LIMIT: usize = 2048;

/// Spawns one transcoder process per stream
pub struct FfmpegTranscoder {
    program: String,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Transcode for FfmpegTranscoder {
    async fn open(&self, mut source: SourceDescriptor) -> Result<AudioStream> {
        let args = build_args(&source);
        info!("Spawning {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::SourceUnavailable(format!("failed to spawn {}: {}", self.program, e))
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::SourceUnavailable("transcoder stdout unavailable".to_string()))?;
        let stderr = child.stderr.take().map(|s| tokio::spawn(capture_tail(s)));

        let first = match read_chunk(&mut stdout).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                let status = child.wait().await;
                let detail = stderr_text(stderr).await;
                let status = status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|e| e.to_string());
                return Err(Error::SourceUnavailable(format!(
                    "transcoder produced no output ({}){}",
                    status, detail
                )));
            }
            Err(e) => {
                let _ = child.start_kill();
                return Err(Error::SourceUnavailable(format!(
                    "failed reading transcoder output: {}",
                    e
                )));
            }
        };

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let tee = source.cache_into.take();

        tokio::spawn(pump(child, stdout, stderr, first, tx, tee, outcome_tx));

        Ok(AudioStream::from_parts(rx, outcome_rx))
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<Bytes>> {
    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
    let n = reader.read_buf(&mut buf).await?;
    if n == 0 {
        Ok(None)
    } else {
        Ok(Some(buf.freeze()))
    }
}

async fn capture_tail<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut captured = Vec::new();
    let mut buf = [0u8; 512];
    while let Ok(n) = reader.read(&mut buf).await {
        if n == 0 {
            break;
        }
        captured.extend_from_slice(&buf[..n]);
        if captured.len() > STDERR_LIMIT {
            captured.drain(..captured.len() - STDERR_LIMIT);
        }
    }
    String::from_utf8_lossy(&captured).trim().to_string()
}

async fn stderr_text(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => match handle.await {
            Ok(text) if !text.is_empty() => format!(": {}", text),
            _ => String::new(),
        },
        None => String::new(),
    }
}

/// Forward process output to the consumer and the optional cache tee
///
/// When the consumer goes away the process is killed, unless output is also
/// being cached, in which case it runs to completion.
async fn pump(
    mut child: Child,
    mut stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    first: Bytes,
    tx: mpsc::Sender<std::io::Result<Bytes>>,
    mut tee: Option<CacheWriter>,
    outcome: watch::Sender<Option<StreamOutcome>>,
) {
    let mut consumer_open = true;
    let mut cancelled = false;
    let mut read_error = None;
    let mut next: std::io::Result<Option<Bytes>> = Ok(Some(first));

    loop {
        match next {
            Ok(Some(bytes)) => {
                if let Some(writer) = tee.as_mut() {
                    if let Err(e) = writer.write(&bytes).await {
                        warn!("Cache tee for {} failed, dropping it: {}", writer.hash(), e);
                        tee = None;
                    }
                }

                if consumer_open && tx.send(Ok(bytes)).await.is_err() {
                    consumer_open = false;
                    if tee.is_none() {
                        debug!("Audio consumer closed, killing transcoder");
                        let _ = child.start_kill();
                        cancelled = true;
                        break;
                    }
                    debug!("Audio consumer closed, transcoder continues for cache");
                }
            }
            Ok(None) => break,
            Err(e) => {
                read_error = Some(e.to_string());
                break;
            }
        }
        next = read_chunk(&mut stdout).await;
    }

    let status = child.wait().await;
    let detail = stderr_text(stderr).await;

    let result = if cancelled {
        StreamOutcome::Cancelled
    } else if let Some(e) = read_error {
        StreamOutcome::Failed(e)
    } else {
        match status {
            Ok(status) if status.success() => StreamOutcome::Finished,
            Ok(status) => StreamOutcome::Failed(format!("transcoder exited with {}{}", status, detail)),
            Err(e) => StreamOutcome::Failed(e.to_string()),
        }
    };

    if let StreamOutcome::Failed(reason) = &result {
        warn!("Transcoder failed mid-stream: {}", reason);
        if consumer_open {
            let _ = tx
                .send(Err(std::io::Error::new(std::io::ErrorKind::Other, reason.clone())))
                .await;
        }
    }

    if let Some(writer) = tee {
        if result == StreamOutcome::Finished {
            if let Err(e) = writer.finish().await {
                warn!("Failed to commit tee'd cache copy: {}", e);
            }
        } else {
            writer.abort();
        }
    }

    let _ = outcome.send_replace(Some(result));
}
