//! `/ws/term`: an interactive shell on a pseudo-terminal, bridged to one
//! WebSocket.
//!
//! Inbound frames starting with the 4 bytes `size` carry a JSON
//! `{"cols":N,"rows":M}` resize and are never written to the shell; any other
//! frame is keystrokes and goes to the pty verbatim. Pty output goes back as
//! binary frames of at most [`CHUNK`] bytes.
//!
//! Teardown is always: forwarding stopped, child reaped, then pty closed,
//! then socket closed. Output still queued when the client leaves is dropped.

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use serde::Deserialize;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;

pub const CHUNK: usize = 256;
const RESIZE_PREFIX: &[u8] = b"size";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Resize(TermSize),
    Input(&'a [u8]),
}

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("couldn't open pseudoterminal: {0}")]
    Open(String),
    #[error("couldn't start shell {shell}: {reason}")]
    Spawn { shell: String, reason: String },
    #[error("malformed resize message: {0}")]
    BadResize(#[from] serde_json::Error),
    #[error("couldn't resize pseudoterminal: {0}")]
    Resize(String),
    #[error("shell still running after {0:?}")]
    StillRunning(Duration),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub fn classify_frame(data: &[u8]) -> Result<Frame<'_>, PtyError> {
    match data.strip_prefix(RESIZE_PREFIX) {
        Some(json) => Ok(Frame::Resize(serde_json::from_slice(json)?)),
        None => Ok(Frame::Input(data)),
    }
}

/// The process side of a terminal session.
pub trait ShellPty: Send + 'static {
    fn write_input(&mut self, data: &[u8]) -> io::Result<()>;
    fn resize(&mut self, size: TermSize) -> Result<(), PtyError>;
    /// Asks the shell to exit and waits up to `grace` for it to be reaped.
    fn wait_graceful(&mut self, grace: Duration) -> Result<(), PtyError>;
    /// Forced termination; returns once the child is reaped.
    fn kill(&mut self) -> Result<(), PtyError>;
    /// Releases the pty handles. Only called after the child is reaped.
    fn close(&mut self);
}

pub struct PortableShell {
    master: Option<Box<dyn MasterPty + Send>>,
    input: Option<PtyInput>,
    child: Box<dyn Child + Send + Sync>,
}

/// Keystrokes queued for a writer thread, so a full pty buffer blocks that
/// thread rather than the runtime.
pub struct PtyInput {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

pub fn spawn_input_writer<W: Write + Send + 'static>(mut writer: W) -> PtyInput {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    thread::spawn(move || {
        while let Some(data) = rx.blocking_recv() {
            if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                debug!("pty write ended: {e}");
                break;
            }
        }
    });
    PtyInput { tx }
}

impl PtyInput {
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pty writer gone"))
    }
}

/// Spawns `shell` on a fresh 80x24 pty. The receiver yields its output in
/// chunks of at most [`CHUNK`] bytes and closes at EOF.
pub fn spawn_shell(shell: &str) -> Result<(PortableShell, mpsc::Receiver<Vec<u8>>), PtyError> {
    let pair = native_pty_system()
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| PtyError::Open(e.to_string()))?;

    let mut cmd = CommandBuilder::new(shell);
    cmd.env("TERM", "xterm-256color");
    if let Ok(home) = std::env::var("HOME") {
        cmd.cwd(home);
    }
    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| PtyError::Spawn {
            shell: shell.to_string(),
            reason: e.to_string(),
        })?;
    // only the child may hold the slave, so EOF follows its exit
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| PtyError::Open(e.to_string()))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| PtyError::Open(e.to_string()))?;

    let (tx, rx) = mpsc::channel(64);
    thread::spawn(move || pump_pty_output(reader, tx));
    info!("started shell {shell} with PID {:?}", child.process_id());

    Ok((
        PortableShell {
            master: Some(pair.master),
            input: Some(spawn_input_writer(writer)),
            child,
        },
        rx,
    ))
}

/// Blocking read loop: one message per read, no coalescing.
pub fn pump_pty_output<R: Read>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // EIO once the shell is gone
            Err(e) => {
                debug!("pty read ended: {e}");
                break;
            }
        }
    }
}

impl ShellPty for PortableShell {
    fn write_input(&mut self, data: &[u8]) -> io::Result<()> {
        self.input
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pty closed"))?
            .send(data)
    }

    fn resize(&mut self, size: TermSize) -> Result<(), PtyError> {
        let master = self
            .master
            .as_ref()
            .ok_or_else(|| PtyError::Resize("pty closed".into()))?;
        master
            .resize(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Resize(e.to_string()))
    }

    fn wait_graceful(&mut self, grace: Duration) -> Result<(), PtyError> {
        if self.child.try_wait()?.is_none() {
            // best effort; a dead reader side is fine here
            let _ = self.write_input(b"\x03exit\n");
        }
        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.child.try_wait()? {
                debug!("shell exited with {status:?}");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PtyError::StillRunning(grace));
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn kill(&mut self) -> Result<(), PtyError> {
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }

    fn close(&mut self) {
        self.input.take();
        self.master.take();
    }
}

async fn input_pump<P, R>(pty: &mut P, stream: &mut R)
where
    P: ShellPty,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        let data = match msg {
            Ok(Message::Text(t)) => t.into_bytes(),
            Ok(Message::Binary(b)) => b,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!("couldn't get data from client: {e}");
                break;
            }
        };
        match classify_frame(&data) {
            Ok(Frame::Resize(size)) => {
                debug!("resizing pty to {}x{}", size.cols, size.rows);
                if let Err(e) = pty.resize(size) {
                    warn!("{e}");
                }
            }
            Ok(Frame::Input(bytes)) => {
                if let Err(e) = pty.write_input(bytes) {
                    warn!("couldn't write to pty: {e}");
                    break;
                }
            }
            Err(e) => warn!("dropping message: {e}"),
        }
    }
}

async fn output_pump<S>(mut output: mpsc::Receiver<Vec<u8>>, sink: &mut S)
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    while let Some(chunk) = output.recv().await {
        if let Err(e) = sink.send(Message::Binary(chunk)).await {
            debug!("couldn't send pty output: {e}");
            break;
        }
    }
}

fn reap<P: ShellPty>(pty: &mut P, grace: Duration) {
    if let Err(e) = pty.wait_graceful(grace) {
        warn!("couldn't gracefully stop shell, killing: {e}");
        if let Err(e) = pty.kill() {
            warn!("couldn't kill shell: {e}");
        }
    }
}

/// Bridges `pty` and the socket until either side ends, then tears down in
/// order: stop forwarding, reap, close pty, close socket.
///
/// Stopping forwarding drops the output receiver; the reader thread sees the
/// closed channel on its next read and exits, so it is never joined.
pub async fn run_bridge<P, S, R>(
    pty: P,
    output: mpsc::Receiver<Vec<u8>>,
    mut sink: S,
    mut stream: R,
    grace: Duration,
) where
    P: ShellPty,
    S: Sink<Message, Error = axum::Error> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut pty = pty;
    {
        let input = input_pump(&mut pty, &mut stream);
        let output = output_pump(output, &mut sink);
        tokio::pin!(input, output);
        tokio::select! {
            biased;
            _ = &mut input => debug!("terminal client went away"),
            _ = &mut output => debug!("shell output ended"),
        }
        // the unfinished pump is dropped here, before the shell is reaped
    }

    match tokio::task::spawn_blocking(move || {
        reap(&mut pty, grace);
        pty
    })
    .await
    {
        Ok(mut pty) => pty.close(),
        Err(e) => warn!("shell reaper failed: {e}"),
    }

    if let Err(e) = sink.close().await {
        debug!("terminal socket already closed: {e}");
    }
    info!("closed terminal");
}

/// Entry point for an upgraded `/ws/term` connection.
pub async fn serve_terminal<S, R>(mut sink: S, stream: R, config: &AgentConfig)
where
    S: Sink<Message, Error = axum::Error> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    match spawn_shell(&config.shell) {
        Ok((pty, output)) => run_bridge(pty, output, sink, stream, config.terminal_grace).await,
        Err(e) => {
            warn!("{e}");
            let _ = sink.close().await;
        }
    }
}
