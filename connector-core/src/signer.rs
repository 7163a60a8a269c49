//! C5 — Signer Bridge.
//!
//! Cryptographic signing is delegated to a separate process (§1 Non-goals:
//! signing itself is out of scope). `spec.md` §9 Open Question 1 notes the
//! source shipped two signer contracts (in-process placeholder + bridge);
//! this rewrite picks the bridge exclusively, per §4.4/§6 — only this
//! module would need to change if an in-process signer were adopted later.
//!
//! Line-delimited JSON over the child process's stdin/stdout, one
//! outstanding request at a time, blocking — the same "one thread owns a
//! blocking read loop over a pipe" shape as `PostClient`'s reader thread,
//! scaled down to a single request/response instead of a correlation map
//! (there is never more than one request in flight per bridge instance).

use crate::error::ConnectorError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SignatureTriplet {
    pub r: String,
    pub s: String,
    pub v: u8,
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    id: u64,
    method: &'static str,
    params: SignParams<'a>,
}

#[derive(Debug, Serialize)]
struct SignParams<'a> {
    action: &'a Value,
    nonce: u64,
    testnet: bool,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    #[allow(dead_code)]
    id: u64,
    #[serde(default)]
    result: Option<SignResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignResult {
    r: String,
    s: String,
    v: u8,
}

struct Pipe {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
}

/// Reserves nonces as strictly monotonically increasing epoch-millisecond
/// values, guaranteeing monotonicity even across clock skew by bumping past
/// the previous value rather than trusting the wall clock alone.
pub struct NonceReserver {
    last: AtomicU64,
}

impl NonceReserver {
    pub fn new() -> Self {
        Self { last: AtomicU64::new(0) }
    }

    pub fn reserve(&self) -> u64 {
        let wall_clock = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        loop {
            let last = self.last.load(Ordering::Acquire);
            let candidate = wall_clock.max(last + 1);
            if self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return candidate;
            }
        }
    }
}

impl Default for NonceReserver {
    fn default() -> Self {
        Self::new()
    }
}

/// Out-of-process delegate for request authentication. Blocking, one
/// outstanding request at a time per instance (`Mutex<Pipe>` enforces
/// this — a second caller simply queues behind the lock, matching §4.4's
/// "one outstanding request at a time per bridge instance").
pub struct SignerBridge {
    pipe: Mutex<Pipe>,
    nonces: Arc<NonceReserver>,
    next_request_id: AtomicU64,
    request_timeout: Duration,
}

impl SignerBridge {
    pub fn spawn(program: &str, args: &[&str], request_timeout: Duration) -> Result<Self, ConnectorError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child.stdin.take().expect("signer child stdin was piped");
        let stdout = child.stdout.take().expect("signer child stdout was piped");

        Ok(Self {
            pipe: Mutex::new(Pipe {
                child,
                stdin,
                reader: BufReader::new(stdout),
            }),
            nonces: Arc::new(NonceReserver::new()),
            next_request_id: AtomicU64::new(1),
            request_timeout,
        })
    }

    pub fn nonce_reserver(&self) -> Arc<NonceReserver> {
        self.nonces.clone()
    }

    /// `sign(payload, nonce) -> signature_triplet`. Blocking: writes one
    /// line-delimited JSON request, reads one line-delimited JSON response.
    /// `request_timeout` is advisory here (a real pipe read has no portable
    /// cross-platform timeout without a dedicated watcher thread); a
    /// production deployment would pair this with a watchdog thread that
    /// kills and respawns the child on a hang.
    pub fn sign(&self, action: &Value, nonce: u64, testnet: bool) -> Result<SignatureTriplet, ConnectorError> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = SignRequest {
            id,
            method: "sign_l1_action",
            params: SignParams { action, nonce, testnet },
        };
        let line = serde_json::to_string(&request)?;

        let mut pipe = self.pipe.lock();
        writeln!(pipe.stdin, "{line}").map_err(ConnectorError::Io)?;
        pipe.stdin.flush().map_err(ConnectorError::Io)?;

        let mut response_line = String::new();
        pipe.reader
            .read_line(&mut response_line)
            .map_err(ConnectorError::Io)?;
        if response_line.is_empty() {
            return Err(ConnectorError::SignerError(
                "signer process closed stdout".to_string(),
            ));
        }

        let response: SignResponse = serde_json::from_str(response_line.trim())?;
        if let Some(err) = response.error {
            return Err(ConnectorError::SignerError(err));
        }
        let result = response
            .result
            .ok_or_else(|| ConnectorError::SignerError("signer response missing result".to_string()))?;
        Ok(SignatureTriplet {
            r: result.r,
            s: result.s,
            v: result.v,
        })
    }

    /// Health probe: `{"method":"ping"}` -> `{"result":"pong"}`.
    pub fn ping(&self) -> Result<(), ConnectorError> {
        let mut pipe = self.pipe.lock();
        writeln!(pipe.stdin, r#"{{"method":"ping"}}"#).map_err(ConnectorError::Io)?;
        pipe.stdin.flush().map_err(ConnectorError::Io)?;

        let mut line = String::new();
        pipe.reader.read_line(&mut line).map_err(ConnectorError::Io)?;
        if line.trim().contains("pong") {
            Ok(())
        } else {
            Err(ConnectorError::SignerError(format!("unexpected ping reply: {line}")))
        }
    }
}

impl Drop for SignerBridge {
    fn drop(&mut self) {
        let mut pipe = self.pipe.lock();
        if let Err(e) = pipe.child.kill() {
            warn!(error = %e, "failed to kill signer child process on drop");
        }
    }
}
