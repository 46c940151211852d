//! External transcoder bridge
//!
//! The transcoder is an ffmpeg process that reads the session description
//! from stdin and pulls SRTP from the local ports packets are forwarded to.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{SessionError, SessionResult};
use crate::notify::{OnceListener, OnceSignal};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What to do with the video stream
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoTranscode {
    /// Drop video; only audio is forwarded
    Disabled,
    /// Keep video with the transcoder's default handling
    #[default]
    Default,
    /// Keep video with these output arguments
    Custom(Vec<String>),
}

impl VideoTranscode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, VideoTranscode::Disabled)
    }
}

/// Caller-supplied transcoder arguments
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TranscodeSpec {
    /// Arguments placed before the session description input
    #[serde(default)]
    pub input: Vec<String>,
    #[serde(default)]
    pub video: VideoTranscode,
    #[serde(default)]
    pub audio: Vec<String>,
    #[serde(default)]
    pub output: Vec<String>,
}

impl TranscodeSpec {
    /// Full transcoder command line, reading the document from stdin
    pub fn process_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-protocol_whitelist",
            "pipe,udp,rtp,file,crypto",
            "-f",
            "sdp",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();

        args.extend(self.input.iter().cloned());
        args.extend(["-i".to_string(), "pipe:".to_string()]);
        args.extend(self.audio.iter().cloned());
        match &self.video {
            VideoTranscode::Disabled => args.push("-vn".to_string()),
            VideoTranscode::Default => {}
            VideoTranscode::Custom(video) => args.extend(video.iter().cloned()),
        }
        args.extend(self.output.iter().cloned());
        args
    }
}

/// Called with the exit code when the process exits on its own
pub type ExitCallback = Box<dyn FnOnce(Option<i32>) + Send>;

/// Everything needed to start a transcoder
pub struct TranscodeLaunch {
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// Prefix for the process's log lines
    pub label: String,
    pub on_exit: ExitCallback,
}

/// A running transcoder
#[async_trait]
pub trait TranscodeProcess: Send + Sync {
    /// Write `text` to the process input and close it
    async fn write_input(&self, text: &str) -> SessionResult<()>;

    /// Stop the process. The exit callback is not invoked.
    fn stop(&self);
}

/// Starts transcoder processes
pub trait TranscodeLauncher: Send + Sync {
    fn launch(&self, launch: TranscodeLaunch) -> SessionResult<Arc<dyn TranscodeProcess>>;
}

/// Launches the transcoder as a child process
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegLauncher;

impl TranscodeLauncher for FfmpegLauncher {
    fn launch(&self, launch: TranscodeLaunch) -> SessionResult<Arc<dyn TranscodeProcess>> {
        let TranscodeLaunch {
            binary,
            args,
            label,
            on_exit,
        } = launch;

        debug!(label = %label, binary = %binary.display(), args = ?args, "Spawning transcoder");

        let mut child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SessionError::Transcode(format!("Failed to spawn {}: {}", binary.display(), e))
            })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_output(stderr, label.clone()));
        }

        let stop = OnceSignal::new();
        let process = Arc::new(FfmpegProcess {
            stdin: Mutex::new(child.stdin.take()),
            label: label.clone(),
            stop,
        });
        tokio::spawn(supervise(child, process.stop.listener(), on_exit, label));

        Ok(process)
    }
}

/// Handle to a spawned ffmpeg child
pub struct FfmpegProcess {
    stdin: Mutex<Option<ChildStdin>>,
    label: String,
    stop: OnceSignal,
}

#[async_trait]
impl TranscodeProcess for FfmpegProcess {
    async fn write_input(&self, text: &str) -> SessionResult<()> {
        let stdin = self.stdin.lock().await.take();
        let Some(mut stdin) = stdin else {
            return Err(SessionError::Transcode(format!(
                "{}: input already closed",
                self.label
            )));
        };

        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|e| SessionError::Transcode(format!("{}: write failed: {}", self.label, e)))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| SessionError::Transcode(format!("{}: close failed: {}", self.label, e)))?;
        Ok(())
    }

    fn stop(&self) {
        if self.stop.fire() {
            debug!(label = %self.label, "Stopping transcoder");
        }
    }
}

async fn supervise(mut child: Child, stop: OnceListener, on_exit: ExitCallback, label: String) {
    tokio::select! {
        status = child.wait() => {
            let code = status.ok().and_then(|s| s.code());
            warn!(label = %label, code = ?code, "Transcoder exited");
            on_exit(code);
        }
        _ = stop.wait() => {
            if let Err(e) = child.kill().await {
                debug!(label = %label, error = %e, "Transcoder already gone");
            }
            info!(label = %label, "Transcoder stopped");
        }
    }
}

async fn log_output(stderr: ChildStderr, label: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(label = %label, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_disabled_video_adds_vn() {
        let spec = TranscodeSpec {
            input: strings(&["-analyzeduration", "0"]),
            video: VideoTranscode::Disabled,
            audio: strings(&["-acodec", "aac"]),
            output: strings(&["-f", "adts", "pipe:1"]),
        };

        assert_eq!(
            spec.process_args(),
            strings(&[
                "-hide_banner",
                "-protocol_whitelist",
                "pipe,udp,rtp,file,crypto",
                "-f",
                "sdp",
                "-analyzeduration",
                "0",
                "-i",
                "pipe:",
                "-acodec",
                "aac",
                "-vn",
                "-f",
                "adts",
                "pipe:1",
            ])
        );
        assert!(!spec.video.is_enabled());
    }

    #[test]
    fn test_custom_video_args_follow_audio() {
        let spec = TranscodeSpec {
            video: VideoTranscode::Custom(strings(&["-vcodec", "copy"])),
            audio: strings(&["-acodec", "copy"]),
            output: strings(&["out.mkv"]),
            ..Default::default()
        };
        let args = spec.process_args();
        assert_eq!(
            &args[args.len() - 5..],
            &strings(&["-acodec", "copy", "-vcodec", "copy", "out.mkv"])[..]
        );
    }

    #[test]
    fn test_default_video_adds_nothing() {
        let spec = TranscodeSpec {
            output: strings(&["out.mp4"]),
            ..Default::default()
        };
        let args = spec.process_args();
        assert!(!args.contains(&"-vn".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        assert!(spec.video.is_enabled());
    }

    #[test]
    fn test_spec_from_json() {
        let spec: TranscodeSpec =
            serde_json::from_str(r#"{"video": "disabled", "output": ["out.aac"]}"#).unwrap();
        assert_eq!(spec.video, VideoTranscode::Disabled);

        let spec: TranscodeSpec =
            serde_json::from_str(r#"{"video": {"custom": ["-vcodec", "copy"]}}"#).unwrap();
        assert_eq!(spec.video, VideoTranscode::Custom(strings(&["-vcodec", "copy"])));
    }

    #[cfg(unix)]
    fn launch_with(
        binary: &str,
        args: &[&str],
        on_exit: impl FnOnce(Option<i32>) + Send + 'static,
    ) -> Arc<dyn TranscodeProcess> {
        FfmpegLauncher
            .launch(TranscodeLaunch {
                binary: PathBuf::from(binary),
                args: strings(args),
                label: binary.to_string(),
                on_exit: Box::new(on_exit),
            })
            .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_input_is_closed_after_document() {
        let (exited, exit_code) = oneshot::channel();
        let process = launch_with("/bin/cat", &[], move |code| {
            let _ = exited.send(code);
        });

        process.write_input("v=0\n").await.unwrap();

        // cat only exits once its input is closed
        let code = timeout(Duration::from_secs(5), exit_code)
            .await
            .expect("exit callback")
            .unwrap();
        assert_eq!(code, Some(0));
        assert!(matches!(
            process.write_input("v=0\n").await,
            Err(SessionError::Transcode(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unexpected_exit_reports_code() {
        let (exited, exit_code) = oneshot::channel();
        let _process = launch_with("/bin/sh", &["-c", "exit 3"], move |code| {
            let _ = exited.send(code);
        });

        let code = timeout(Duration::from_secs(5), exit_code)
            .await
            .expect("exit callback")
            .unwrap();
        assert_eq!(code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_without_exit_callback() {
        let exits = Arc::new(AtomicUsize::new(0));
        let counter = exits.clone();
        let process = launch_with("/bin/sleep", &["30"], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        process.stop();
        process.stop();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(exits.load(Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stopped_process_no_longer_reads_input() {
        let exits = Arc::new(AtomicUsize::new(0));
        let counter = exits.clone();
        let process = launch_with("/bin/cat", &[], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        process.stop();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // The reader is gone, so the pipe is broken
        assert!(matches!(
            process.write_input("v=0\n").await,
            Err(SessionError::Transcode(_))
        ));
        assert_eq!(exits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_launch() {
        let result = FfmpegLauncher.launch(TranscodeLaunch {
            binary: PathBuf::from("/nonexistent/transcoder-binary"),
            args: Vec::new(),
            label: "test".to_string(),
            on_exit: Box::new(|_| {}),
        });
        assert!(matches!(result, Err(SessionError::Transcode(_))));
    }
}
