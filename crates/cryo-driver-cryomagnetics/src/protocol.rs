//! Echo-framed query protocol engine.
//!
//! Cryomagnetics instruments do weird things with their wire interface.
//! A command is written, terminated; the device echoes the command back,
//! terminated; the answer follows, terminated again. There is no length
//! prefix and no distinct end-of-message byte, so the only framing
//! available is textual: match the echo against the command we just sent
//! and treat whatever follows, up to the trailing terminator, as the
//! answer.
//!
//! Two consequences drive the design here:
//!
//! - Reads are bounded by a conservatively sized `max_frame` rather than a
//!   delimiter. The constant differs per device generation (the LM-510
//!   answers fit in 140 bytes, the 4G needs up to 1000) and is explicit
//!   configuration, never a guess buried in a driver.
//! - Interleaving two queries on one transport would make echo matching
//!   ambiguous, so each engine serializes exchanges through the async
//!   mutex that owns its port. The lock belongs to the engine instance;
//!   engines for different devices proceed independently.
//!
//! Terminators also differ by generation: the LM-510 accepts commands
//! terminated `\r` and frames response segments with `\r\n`, while the 4G
//! takes `\r\n`, echoes with `\r\r\n`, and terminates the answer `\r\n`.

use std::time::Duration;

use cryo_core::error::{CryoError, CryoResult};
use cryo_core::serial::{drain_serial_buffer, SharedPort};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Per-device framing configuration.
#[derive(Debug, Clone)]
pub struct Framing {
    /// Appended to outgoing commands.
    pub write_terminator: &'static str,
    /// Terminates the echoed command inside the response.
    pub echo_terminator: &'static str,
    /// Terminates the device's answer at the end of the response.
    pub answer_terminator: &'static str,
    /// Upper bound on the response size. The protocol has no reliable
    /// length delimiting, so this must cover the longest expected answer.
    pub max_frame: usize,
    /// Quiet window after which a partially received frame is considered
    /// complete.
    pub read_timeout: Duration,
    /// Overall deadline for one command/response exchange.
    pub exchange_timeout: Duration,
}

impl Framing {
    /// Framing for the LM-510 generation.
    ///
    /// Commands end `\r`; echo and answer segments end `\r\n`. The longest
    /// documented answer is well under 140 bytes.
    pub fn lm510() -> Self {
        Self {
            write_terminator: "\r",
            echo_terminator: "\r\n",
            answer_terminator: "\r\n",
            max_frame: 140,
            read_timeout: Duration::from_millis(100),
            exchange_timeout: Duration::from_secs(2),
        }
    }

    /// Framing for the 4G power supply generation.
    ///
    /// Commands end `\r\n`; the echo ends `\r\r\n` and the answer `\r\n`.
    /// Sweep status answers can run long, hence the larger frame bound.
    pub fn model_4g() -> Self {
        Self {
            write_terminator: "\r\n",
            echo_terminator: "\r\r\n",
            answer_terminator: "\r\n",
            max_frame: 1000,
            read_timeout: Duration::from_millis(100),
            exchange_timeout: Duration::from_secs(2),
        }
    }
}

/// Extract the device's answer from an echo-delimited frame.
///
/// Returns `Ok(None)` when the echo matched but nothing followed it, a
/// valid outcome for commands that produce no answer. Callers that demand
/// an answer convert `None` into [`CryoError::NoResponse`].
pub fn parse_frame(
    device: &str,
    command: &str,
    raw: &str,
    framing: &Framing,
) -> CryoResult<Option<String>> {
    let no_echo = || CryoError::NoEchoedCommand {
        device: device.to_string(),
        command: command.to_string(),
    };

    let echo_end = raw.find(framing.echo_terminator).ok_or_else(no_echo)?;
    let echoed = &raw[..echo_end];
    if echoed != command {
        tracing::debug!(
            device,
            command,
            echoed,
            "echo mismatch, framing desynchronized"
        );
        return Err(no_echo());
    }

    let rest = &raw[echo_end + framing.echo_terminator.len()..];
    match rest.strip_suffix(framing.answer_terminator) {
        Some(answer) if !answer.is_empty() => Ok(Some(answer.to_string())),
        _ => Ok(None),
    }
}

/// Performs atomic command/response exchanges with one physical device.
///
/// The engine exclusively owns its transport handle; the port mutex is the
/// per-device query lock. Queries against the same engine block each
/// other, queries against different engines do not.
pub struct QueryEngine {
    port: SharedPort,
    framing: Framing,
    device: String,
}

impl QueryEngine {
    pub fn new(port: SharedPort, framing: Framing, device: impl Into<String>) -> Self {
        Self {
            port,
            framing,
            device: device.into(),
        }
    }

    /// The device label used in errors and log lines.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Perform an exchange whose answer is mandatory.
    pub async fn query(&self, command: &str) -> CryoResult<String> {
        match self.query_optional(command).await? {
            Some(answer) => Ok(answer),
            None => Err(CryoError::NoResponse {
                device: self.device.clone(),
                command: command.to_string(),
            }),
        }
    }

    /// Perform an exchange whose answer may legitimately be absent
    /// (set-style commands echo without answering).
    pub async fn query_optional(&self, command: &str) -> CryoResult<Option<String>> {
        let raw = self.exchange(command).await?;
        tracing::debug!(device = %self.device, command, raw = ?raw, "received frame");
        parse_frame(&self.device, command, &raw, &self.framing)
    }

    /// Write the command and read the raw response window while holding
    /// the device lock.
    async fn exchange(&self, command: &str) -> CryoResult<String> {
        let framing = &self.framing;
        let mut port = self.port.lock().await;

        // Leftovers from a previous, possibly timed-out exchange would be
        // mistaken for this command's echo.
        let discarded = drain_serial_buffer(&mut *port, 10).await;
        if discarded > 0 {
            tracing::debug!(device = %self.device, discarded, "flushed stale bytes");
        }

        let outbound = format!("{}{}", command, framing.write_terminator);
        port.write_all(outbound.as_bytes()).await?;
        tracing::debug!(device = %self.device, command, "sent command");

        let deadline = tokio::time::Instant::now() + framing.exchange_timeout;
        let mut buf: Vec<u8> = Vec::with_capacity(framing.max_frame.min(256));
        let mut chunk = [0u8; 256];

        loop {
            if buf.len() >= framing.max_frame {
                break;
            }

            match tokio::time::timeout(framing.read_timeout, port.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    if buf.is_empty() {
                        return Err(CryoError::Transport(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!("connection to '{}' closed", self.device),
                        )));
                    }
                    break;
                }
                Ok(Ok(n)) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if self.frame_complete(&buf) {
                        break;
                    }
                }
                Ok(Err(e)) => return Err(CryoError::Transport(e)),
                Err(_) => {
                    // Quiet window elapsed. With data in hand the frame is
                    // over; with none, keep waiting until the deadline.
                    if !buf.is_empty() {
                        break;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(CryoError::Timeout {
                            device: self.device.clone(),
                            command: command.to_string(),
                        });
                    }
                }
            }
        }

        buf.truncate(framing.max_frame);
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// A frame is recognisably complete once it holds an echo segment, at
    /// least one byte after it, and a trailing answer terminator. Echo-only
    /// frames (optional answers) never satisfy this and are closed by the
    /// quiet window instead.
    fn frame_complete(&self, buf: &[u8]) -> bool {
        let framing = &self.framing;
        let echo_term = framing.echo_terminator.as_bytes();
        let answer_term = framing.answer_terminator.as_bytes();

        let Some(echo_pos) = buf
            .windows(echo_term.len())
            .position(|window| window == echo_term)
        else {
            return false;
        };

        let after_echo = echo_pos + echo_term.len();
        buf.len() > after_echo + answer_term.len()
            && buf.ends_with(answer_term)
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("device", &self.device)
            .field("framing", &self.framing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryo_core::serial::{wrap_shared, DynSerial};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn engine_with_host(framing: Framing) -> (QueryEngine, DuplexStream) {
        let (host, device) = tokio::io::duplex(1024);
        let port = wrap_shared(Box::new(device) as DynSerial);
        (QueryEngine::new(port, framing, "test-device"), host)
    }

    /// Echo back every command read from the engine, answering with
    /// `answer_for(cmd)`. Commands producing an empty answer are echoed
    /// without an answer segment.
    async fn respond(
        host: &mut DuplexStream,
        framing: &Framing,
        answer_for: impl Fn(&str) -> String,
    ) {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        let write_term = framing.write_terminator.as_bytes();
        loop {
            host.read_exact(&mut byte).await.unwrap();
            buf.push(byte[0]);
            if buf.ends_with(write_term) {
                break;
            }
        }
        buf.truncate(buf.len() - write_term.len());
        let command = String::from_utf8(buf).unwrap();
        let answer = answer_for(&command);
        let mut frame = format!("{}{}", command, framing.echo_terminator);
        if !answer.is_empty() {
            frame.push_str(&answer);
            frame.push_str(framing.answer_terminator);
        }
        host.write_all(frame.as_bytes()).await.unwrap();
    }

    #[test]
    fn parse_extracts_answer() {
        let framing = Framing::lm510();
        // For all commands c: parse(c, c + term + answer + term) == answer
        let answer = parse_frame("dev", "UNITS?", "UNITS?\r\nA\r\n", &framing).unwrap();
        assert_eq!(answer.as_deref(), Some("A"));
    }

    #[test]
    fn parse_rejects_mismatched_echo() {
        let framing = Framing::lm510();
        let err = parse_frame("dev", "UNITS?", "IOUT?\r\n42.0A\r\n", &framing).unwrap_err();
        assert!(matches!(err, CryoError::NoEchoedCommand { .. }));
    }

    #[test]
    fn parse_rejects_missing_terminator() {
        let framing = Framing::lm510();
        let err = parse_frame("dev", "UNITS?", "UNITS?A", &framing).unwrap_err();
        assert!(matches!(err, CryoError::NoEchoedCommand { .. }));
    }

    #[test]
    fn parse_echo_only_frame_is_no_answer() {
        let framing = Framing::lm510();
        let answer = parse_frame("dev", "CHAN 2", "CHAN 2\r\n", &framing).unwrap();
        assert_eq!(answer, None);
    }

    #[test]
    fn parse_4g_framing() {
        let framing = Framing::model_4g();
        let answer = parse_frame("dev", "IOUT?", "IOUT?\r\r\n87.424A\r\n", &framing).unwrap();
        assert_eq!(answer.as_deref(), Some("87.424A"));

        // Echo-only 4G frame: a set command with nothing to report.
        let answer = parse_frame("dev", "UNITS A", "UNITS A\r\r\n", &framing).unwrap();
        assert_eq!(answer, None);
    }

    #[tokio::test]
    async fn query_round_trip() {
        let framing = Framing::lm510();
        let (engine, mut host) = engine_with_host(framing.clone());

        let responder = tokio::spawn(async move {
            respond(&mut host, &framing, |_| "A".to_string()).await;
        });

        let answer = engine.query("UNITS?").await.unwrap();
        assert_eq!(answer, "A");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn optional_query_accepts_echo_only() {
        let framing = Framing::lm510();
        let (engine, mut host) = engine_with_host(framing.clone());

        let responder = tokio::spawn(async move {
            respond(&mut host, &framing, |_| String::new()).await;
        });

        let answer = engine.query_optional("CHAN 2").await.unwrap();
        assert_eq!(answer, None);
        responder.await.unwrap();

        // The same frame is an error when an answer is demanded.
        let framing = Framing::lm510();
        let (engine, mut host) = engine_with_host(framing.clone());
        let responder = tokio::spawn(async move {
            respond(&mut host, &framing, |_| String::new()).await;
        });
        let err = engine.query("CHAN?").await.unwrap_err();
        assert!(matches!(err, CryoError::NoResponse { .. }));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        let mut framing = Framing::lm510();
        framing.read_timeout = Duration::from_millis(10);
        framing.exchange_timeout = Duration::from_millis(50);
        let (engine, _host) = engine_with_host(framing);

        let err = engine.query("UNITS?").await.unwrap_err();
        assert!(matches!(err, CryoError::Timeout { .. }));
    }

    #[tokio::test]
    async fn concurrent_queries_never_interleave() {
        let framing = Framing::lm510();
        let (engine, mut host) = engine_with_host(framing.clone());
        let engine = Arc::new(engine);

        const QUERIES: usize = 8;

        // One responder services all exchanges sequentially; the per-device
        // lock must keep each echo/answer pair intact.
        let responder_framing = framing.clone();
        let responder = tokio::spawn(async move {
            for _ in 0..QUERIES {
                respond(&mut host, &responder_framing, |cmd| format!("ans-{cmd}")).await;
            }
        });

        let mut handles = Vec::new();
        for i in 0..QUERIES {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let command = format!("Q{i}");
                let answer = engine.query(&command).await.unwrap();
                (command, answer)
            }));
        }

        for handle in handles {
            let (command, answer) = handle.await.unwrap();
            assert_eq!(answer, format!("ans-{command}"));
        }
        responder.await.unwrap();
    }
}
