//! External process supervision with streamed output.
//!
//! stdout and stderr are drained by two reader tasks into one channel, so the
//! child never stalls on a full pipe, and each line reaches the caller as soon
//! as it is read. Only a short tail is retained for error reporting.

use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};

/// Number of trailing output lines kept for `MigrateError::Process`.
pub const TAIL_LINES: usize = 20;

const REDACTED: &str = "********";

/// A command line plus environment. Secret values live only in the
/// environment and are never part of the rendered command line.
#[derive(Clone, Default)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    secrets: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Set an environment variable whose value must never appear in output.
    pub fn secret_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.secrets.push(value.clone());
        }
        self.envs.push((key.into(), value));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Value of an environment variable set on this command.
    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace every secret value in `line`.
    ///
    /// A match is only replaced when it is not part of a longer word, so a
    /// password such as `postgres` does not mask `postgres_copy`.
    pub fn redact(&self, line: &str) -> String {
        let mut out = line.to_string();
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = redact_token(&out, secret);
            }
        }
        out
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn redact_token(line: &str, secret: &str) -> String {
    let starts_word = secret.chars().next().map_or(false, is_word_char);
    let ends_word = secret.chars().last().map_or(false, is_word_char);

    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    let mut prev: Option<char> = None;
    while let Some(pos) = rest.find(secret) {
        let before = rest[..pos].chars().last().or(prev);
        let after = rest[pos + secret.len()..].chars().next();
        let bounded = !(starts_word && before.map_or(false, is_word_char))
            && !(ends_word && after.map_or(false, is_word_char));

        if bounded {
            out.push_str(&rest[..pos]);
            out.push_str(REDACTED);
            prev = secret.chars().last();
            rest = &rest[pos + secret.len()..];
        } else {
            // Step one char past the rejected match start
            let step = pos + rest[pos..].chars().next().map_or(1, char::len_utf8);
            out.push_str(&rest[..step]);
            prev = rest[..step].chars().last();
            rest = &rest[step..];
        }
    }
    out.push_str(rest);
    out
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", self.redact(arg))?;
            } else {
                write!(f, " {}", self.redact(arg))?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.envs.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ToolCommand")
            .field("command", &self.to_string())
            .field("env", &env_keys)
            .finish()
    }
}

/// Run `command` to completion, passing each output line to `on_line`.
///
/// Fails with `ToolMissing` if the program cannot be found, `Process` on a
/// non-zero exit and `Cancelled` if `cancel` fires first, in which case the
/// child is killed.
pub async fn run<F>(command: &ToolCommand, mut on_line: F, cancel: &CancellationToken) -> Result<()>
where
    F: FnMut(String),
{
    debug!("Spawning: {}", command);

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MigrateError::ToolMissing(command.program.clone()),
            _ => MigrateError::Io(e),
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MigrateError::Io(std::io::Error::other("stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| MigrateError::Io(std::io::Error::other("stderr not captured")))?;

    let (tx, mut rx) = mpsc::channel::<String>(256);
    let readers = [
        tokio::spawn(forward_lines(stdout, tx.clone())),
        tokio::spawn(forward_lines(stderr, tx)),
    ];

    let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
    loop {
        let line = tokio::select! {
            line = rx.recv() => line,
            _ = cancel.cancelled() => {
                abort(&mut child, &readers, command).await;
                return Err(MigrateError::Cancelled);
            }
        };

        let Some(line) = line else { break };
        let line = command.redact(&line);
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line.clone());
        on_line(line);
    }

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            abort(&mut child, &readers, command).await;
            return Err(MigrateError::Cancelled);
        }
    };

    if status.success() {
        debug!("{} exited successfully", command.program);
        Ok(())
    } else {
        Err(MigrateError::Process {
            program: command.program.clone(),
            exit_code: status.code(),
            tail: tail.into_iter().collect(),
        })
    }
}

async fn abort(
    child: &mut tokio::process::Child,
    readers: &[tokio::task::JoinHandle<()>],
    command: &ToolCommand,
) {
    warn!("Cancelling {}", command.program);
    if let Err(e) = child.kill().await {
        warn!("Failed to kill {}: {}", command.program, e);
    }
    for reader in readers {
        reader.abort();
    }
}

/// Read `reader` line by line into `tx`. Invalid UTF-8 is replaced rather
/// than ending the stream.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if tx.send(line.to_string()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Output stream closed with error: {}", e);
                break;
            }
        }
    }
}
