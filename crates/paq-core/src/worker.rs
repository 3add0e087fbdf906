//! Worker: owns one method subprocess and its protocol stream.
//!
//! A worker is spawned lazily for a queue and starts out in a handshake
//! state: it accepts no requests until the method's 100 Capabilities message
//! has been decoded, which happens through the same event-loop reads as
//! every other message. It writes 6xx requests to the child's stdin and
//! decodes the child's stdout through the message codec. Semantic handling
//! of decoded messages lives in the scheduler's dispatcher; the worker only
//! tracks which requests are in flight.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{AcquireError, Result};
use crate::item::{FetchItem, ItemId};
use crate::method::{method_path, MethodConfig};
use crate::protocol::{self, Message, MessageReader};

const READ_CHUNK: usize = 4096;

/// What a readiness poll of one worker produced.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Complete messages decoded from the stream, in arrival order.
    Messages(Vec<Message>),
    /// The subprocess closed its stdout (exit or crash).
    Closed,
}

#[derive(Debug)]
pub struct Worker {
    pub access: String,
    pub config: Arc<MethodConfig>,
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    reader: MessageReader,
    /// Requests sent but not yet answered with 201/400, oldest first.
    in_flight: VecDeque<(ItemId, String)>,
    /// Messages decoded during the handshake that follow the Capabilities
    /// message; surfaced by the next `read_event`.
    pending: VecDeque<Message>,
    /// Last time the subprocess produced any output; drives stall detection
    /// (and, while still handshaking, the startup timeout).
    pub last_activity: Instant,
    /// Set once the Capabilities handshake completed; no requests are sent
    /// before that.
    ready: bool,
}

impl Worker {
    /// Spawn the helper for `access` without waiting for its handshake.
    /// The worker starts not-ready; the scheduler feeds it the decoded 100
    /// Capabilities message via [`Worker::apply_capabilities`].
    pub fn spawn(access: &str, methods_dir: &Path) -> Result<Worker> {
        let path = method_path(methods_dir, access)?;
        tracing::debug!(access, method = %path.display(), "starting method");

        let mut child = Command::new(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        // stdin/stdout are piped above, so these cannot be None
        let stdin = child.stdin.take().ok_or_else(|| AcquireError::MethodStartup {
            access: access.to_string(),
            reason: "no stdin pipe".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| AcquireError::MethodStartup {
            access: access.to_string(),
            reason: "no stdout pipe".to_string(),
        })?;

        Ok(Worker {
            access: access.to_string(),
            config: Arc::new(MethodConfig::from_capabilities(access, &Message::new(100, ""))),
            child,
            stdin,
            stdout,
            reader: MessageReader::new(),
            in_flight: VecDeque::new(),
            pending: VecDeque::new(),
            last_activity: Instant::now(),
            ready: false,
        })
    }

    /// Spawn the helper and drive the Capabilities handshake to completion
    /// before returning. Only for use outside a running event loop (the
    /// capability probe); the loop itself uses [`Worker::spawn`] and treats
    /// the handshake as an ordinary stream message.
    pub async fn start(
        access: &str,
        methods_dir: &Path,
        options: &BTreeMap<String, String>,
        startup_timeout: Duration,
    ) -> Result<Worker> {
        let mut worker = Worker::spawn(access, methods_dir)?;

        let caps = tokio::time::timeout(startup_timeout, worker.await_capabilities())
            .await
            .map_err(|_| AcquireError::MethodStartup {
                access: access.to_string(),
                reason: "timed out waiting for Capabilities".to_string(),
            })??;
        worker.apply_capabilities(&caps);

        if worker.config.send_config {
            worker.send_configuration(options).await?;
        }
        Ok(worker)
    }

    /// Complete the handshake with a decoded 100 Capabilities message; the
    /// worker accepts requests from here on.
    pub fn apply_capabilities(&mut self, caps: &Message) {
        self.config = Arc::new(MethodConfig::from_capabilities(self.access.clone(), caps));
        self.ready = true;
    }

    /// Whether the Capabilities handshake has completed.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Read until the first complete message arrives; it must be 100.
    async fn await_capabilities(&mut self) -> Result<Message> {
        loop {
            match self.read_event().await {
                WorkerEvent::Closed => {
                    return Err(AcquireError::MethodStartup {
                        access: self.access.clone(),
                        reason: "exited before sending Capabilities".to_string(),
                    })
                }
                WorkerEvent::Messages(mut msgs) => {
                    let first = msgs.remove(0);
                    if first.code != protocol::CAPABILITIES {
                        return Err(AcquireError::MethodStartup {
                            access: self.access.clone(),
                            reason: format!("first message was {} not 100", first.code),
                        });
                    }
                    self.pending.extend(msgs);
                    return Ok(first);
                }
            }
        }
    }

    /// Serialize and send a 600 fetch request; the item joins the in-flight
    /// set until the method answers with 201 or 400.
    pub async fn send(&mut self, id: ItemId, item: &FetchItem) -> std::io::Result<()> {
        let mut msg = Message::new(protocol::URI_ACQUIRE, "URI Acquire")
            .with("URI", &item.uri)
            .with("FileName", item.dest.to_string_lossy());
        if let Some(lm) = item.last_modified {
            msg.push("Last-Modified", lm.to_rfc2822());
        }
        if item.resume_point > 0 {
            msg.push("Resume-Point", item.resume_point.to_string());
        }
        if let Some(cap) = item.maximum_size {
            msg.push("Maximum-Size", cap.to_string());
        }
        for h in item.expected_hashes.iter() {
            msg.push(format!("Expected-{}", h.kind.field_name()), &h.hex);
        }
        self.write_message(&msg).await?;
        self.in_flight.push_back((id, item.uri.clone()));
        Ok(())
    }

    /// Push the flattened configuration tree (601). Sent once at startup for
    /// methods advertising `Send-Config`.
    pub async fn send_configuration(
        &mut self,
        options: &BTreeMap<String, String>,
    ) -> std::io::Result<()> {
        let mut msg = Message::new(protocol::CONFIGURATION, "Configuration");
        for (k, v) in options {
            msg.push("Config-Item", format!("{k}={v}"));
        }
        self.write_message(&msg).await
    }

    /// Answer a 402 with whatever credentials the configuration holds.
    pub async fn send_auth_credentials(
        &mut self,
        site: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> std::io::Result<()> {
        let mut msg =
            Message::new(protocol::AUTH_CREDENTIALS, "Authorization Credentials").with("Site", site);
        if let Some(user) = user {
            msg.push("User", user);
        }
        if let Some(password) = password {
            msg.push("Password", password);
        }
        self.write_message(&msg).await
    }

    /// Acknowledge a 403 media prompt. `failed = true` tells the method the
    /// user declined the change.
    pub async fn send_media_changed(&mut self, media: &str, failed: bool) -> std::io::Result<()> {
        let msg = Message::new(protocol::MEDIA_CHANGED, "Media Changed")
            .with("Media", media)
            .with("Failed", if failed { "true" } else { "false" });
        self.write_message(&msg).await
    }

    async fn write_message(&mut self, msg: &Message) -> std::io::Result<()> {
        self.stdin.write_all(&msg.encode()).await?;
        self.stdin.flush().await
    }

    /// Wait for subprocess output and decode it. Returns only once at least
    /// one complete message is available (or the stream closed); partial
    /// fragments stay buffered across calls. Cancellation-safe: every await
    /// point is one of the reads, and each read's bytes land in the codec
    /// buffer before the next await, so cancelling between reads loses
    /// nothing.
    pub async fn read_event(&mut self) -> WorkerEvent {
        if !self.pending.is_empty() {
            return WorkerEvent::Messages(self.pending.drain(..).collect());
        }
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = match self.stdout.read(&mut chunk).await {
                Ok(0) => return WorkerEvent::Closed,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(access = %self.access, "method stream error: {e}");
                    return WorkerEvent::Closed;
                }
            };
            self.last_activity = Instant::now();
            self.reader.extend(&chunk[..n]);

            let mut msgs = Vec::new();
            for decoded in self.reader.drain() {
                match decoded {
                    Ok(m) => msgs.push(m),
                    // a single malformed message is a diagnostic, not a
                    // stream failure
                    Err(e) => tracing::warn!(access = %self.access, "protocol error: {e}"),
                }
            }
            if !msgs.is_empty() {
                return WorkerEvent::Messages(msgs);
            }
        }
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Item matching a URI the method just reported on.
    pub fn find_in_flight(&self, uri: &str) -> Option<ItemId> {
        self.in_flight
            .iter()
            .find(|(_, u)| u == uri)
            .map(|(id, _)| *id)
    }

    /// Retire an in-flight request, freeing pipeline capacity.
    pub fn retire(&mut self, uri: &str) -> Option<ItemId> {
        let pos = self.in_flight.iter().position(|(_, u)| u == uri)?;
        self.in_flight.remove(pos).map(|(id, _)| id)
    }

    /// Strip the whole in-flight set (worker-wide failure path).
    pub fn take_in_flight(&mut self) -> Vec<ItemId> {
        self.in_flight.drain(..).map(|(id, _)| id).collect()
    }

    /// Best-effort subprocess termination.
    pub fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(access = %self.access, "kill failed (already gone?): {e}");
        }
    }

    /// Seconds since the subprocess last produced output.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // kill_on_drop covers the child; this is just for the log trail
        tracing::debug!(access = %self.access, "worker shut down");
    }
}
