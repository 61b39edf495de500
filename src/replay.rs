//! Replay session: paced chunked writes and framed response reads.
//!
//! A session is one connection and one linear pass over the payload script.
//! Payloads go out verbatim in bounded chunks with a pacing delay between
//! them; after each payload exactly one response frame is read back, sized by
//! the length field of its header. Responses that fail to decode are reported
//! and kept as raw bytes, not treated as session failures.

use crate::capture::Payload;
use crate::config::Config;
use crate::frame::{self, Ack, Frame, FrameError, HEADER_LEN};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Tunables for one replay session.
#[derive(Debug, Clone)]
pub struct ReplaySettings {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    pub read_timeout: Duration,
}

impl ReplaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_delay: config.chunk_delay(),
            read_timeout: config.read_timeout(),
        }
    }
}

/// Outcome of one replayed payload.
#[derive(Debug)]
pub struct PhaseReport {
    pub name: String,
    pub bytes_sent: usize,
    pub chunks: usize,
    /// Raw response bytes, exactly one frame's worth.
    pub response: Vec<u8>,
    /// Decoded acknowledgement, when the response was one.
    pub ack: Option<Ack>,
}

/// Replay session errors
#[derive(Debug)]
pub enum ProbeError {
    Connect(String, std::io::Error),
    ConnectTimeout(String),
    Write { phase: String, source: std::io::Error },
    Read { phase: String, source: std::io::Error },
    ReadTimeout { phase: String },
    /// The response header cannot bound a read (bad magic or absurd length)
    Framing { phase: String, source: FrameError },
    Shutdown(std::io::Error),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Connect(target, e) => {
                write!(f, "Failed to connect to '{}': {}", target, e)
            }
            ProbeError::ConnectTimeout(target) => {
                write!(f, "Timed out connecting to '{}'", target)
            }
            ProbeError::Write { phase, source } => {
                write!(f, "Write failed during phase '{}': {}", phase, source)
            }
            ProbeError::Read { phase, source } => {
                write!(f, "Read failed during phase '{}': {}", phase, source)
            }
            ProbeError::ReadTimeout { phase } => {
                write!(f, "Timed out waiting for a response in phase '{}'", phase)
            }
            ProbeError::Framing { phase, source } => {
                write!(f, "Unreadable response header in phase '{}': {}", phase, source)
            }
            ProbeError::Shutdown(e) => write!(f, "Failed to shut down connection: {}", e),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProbeError::Connect(_, e)
            | ProbeError::Write { source: e, .. }
            | ProbeError::Read { source: e, .. }
            | ProbeError::Shutdown(e) => Some(e),
            ProbeError::Framing { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Connect to the configured target and run the payload script.
pub async fn run(config: &Config, payloads: &[Payload]) -> Result<Vec<PhaseReport>, ProbeError> {
    info!(target = %config.target, phases = payloads.len(), "Connecting");

    let mut stream = timeout(config.connect_timeout(), TcpStream::connect(&config.target))
        .await
        .map_err(|_| ProbeError::ConnectTimeout(config.target.clone()))?
        .map_err(|e| ProbeError::Connect(config.target.clone(), e))?;

    let settings = ReplaySettings::from_config(config);
    let reports = run_session(&mut stream, payloads, &settings).await?;

    stream.shutdown().await.map_err(ProbeError::Shutdown)?;
    info!("Closed connection");

    Ok(reports)
}

/// Run the payload script over an already-connected stream.
pub async fn run_session<S>(
    stream: &mut S,
    payloads: &[Payload],
    settings: &ReplaySettings,
) -> Result<Vec<PhaseReport>, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reports = Vec::with_capacity(payloads.len());
    for payload in payloads {
        reports.push(run_phase(stream, payload, settings).await?);
    }
    Ok(reports)
}

/// Send one payload chunked and paced, then read the response frame.
async fn run_phase<S>(
    stream: &mut S,
    payload: &Payload,
    settings: &ReplaySettings,
) -> Result<PhaseReport, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let chunks = payload.bytes.len().div_ceil(settings.chunk_size);

    for (i, chunk) in payload.bytes.chunks(settings.chunk_size).enumerate() {
        debug!(
            phase = %payload.name,
            chunk = i + 1,
            of = chunks,
            bytes = chunk.len(),
            "Writing chunk"
        );
        stream.write_all(chunk).await.map_err(|e| ProbeError::Write {
            phase: payload.name.clone(),
            source: e,
        })?;
        stream.flush().await.map_err(|e| ProbeError::Write {
            phase: payload.name.clone(),
            source: e,
        })?;

        // no pacing after the final chunk
        if i + 1 < chunks {
            sleep(settings.chunk_delay).await;
        }
    }

    info!(
        phase = %payload.name,
        bytes = payload.bytes.len(),
        chunks,
        "Payload sent, waiting for response"
    );

    let response = read_frame_bytes(stream, settings.read_timeout, &payload.name).await?;
    let ack = inspect_response(&payload.name, &response);

    Ok(PhaseReport {
        name: payload.name.clone(),
        bytes_sent: payload.bytes.len(),
        chunks,
        response,
        ack,
    })
}

/// Read exactly one frame, using the header's length field to bound the read.
async fn read_frame_bytes<S>(
    stream: &mut S,
    read_timeout: Duration,
    phase: &str,
) -> Result<Vec<u8>, ProbeError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_exact_timed(stream, &mut header, read_timeout, phase).await?;

    let total = frame::frame_len(&header).map_err(|e| ProbeError::Framing {
        phase: phase.to_string(),
        source: e,
    })?;

    let mut raw = vec![0u8; total];
    raw[..HEADER_LEN].copy_from_slice(&header);
    read_exact_timed(stream, &mut raw[HEADER_LEN..], read_timeout, phase).await?;

    Ok(raw)
}

async fn read_exact_timed<S>(
    stream: &mut S,
    buf: &mut [u8],
    read_timeout: Duration,
    phase: &str,
) -> Result<(), ProbeError>
where
    S: AsyncRead + Unpin,
{
    match timeout(read_timeout, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(ProbeError::Read {
            phase: phase.to_string(),
            source: e,
        }),
        Err(_) => Err(ProbeError::ReadTimeout {
            phase: phase.to_string(),
        }),
    }
}

/// Decode and log a response; a malformed one is reported, not fatal.
fn inspect_response(phase: &str, response: &[u8]) -> Option<Ack> {
    let frame = match Frame::decode(response) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(phase, error = %err, bytes = ?response, "Response did not decode as a frame");
            return None;
        }
    };

    match frame.decode_ack() {
        Ok(ack) => {
            let clock = ack
                .datetime()
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| format!("unix {}", ack.timestamp));
            info!(
                phase,
                message_type = ?frame.message_type,
                sequence = frame.sequence,
                server_clock = %clock,
                heartbeat_interval = ack.heartbeat_interval,
                "Acknowledgement received"
            );
            Some(ack)
        }
        Err(err) => {
            warn!(
                phase,
                message_type = ?frame.message_type,
                error = %err,
                "Response frame is not an acknowledgement"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{self, HEARTBEAT, TELEMETRY};
    use tokio::net::TcpListener;

    fn settings() -> ReplaySettings {
        ReplaySettings {
            chunk_size: 100,
            chunk_delay: Duration::from_millis(1),
            read_timeout: Duration::from_secs(1),
        }
    }

    fn payload(name: &str, bytes: &[u8]) -> Payload {
        Payload {
            name: name.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    async fn ack_frames(socket: &mut TcpStream, count: usize, timestamp: u32) {
        for _ in 0..count {
            let mut header = [0u8; HEADER_LEN];
            socket.read_exact(&mut header).await.unwrap();
            let total = frame::frame_len(&header).unwrap();
            let mut raw = vec![0u8; total];
            raw[..HEADER_LEN].copy_from_slice(&header);
            socket.read_exact(&mut raw[HEADER_LEN..]).await.unwrap();

            let request = Frame::decode(&raw).unwrap();
            let ack = request.ack(timestamp).unwrap();
            socket.write_all(&ack.encode().unwrap()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_default_script_against_ack_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            ack_frames(&mut socket, 2, 1684481933).await;
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let script = capture::default_script();
        let reports = run_session(&mut stream, &script, &settings()).await.unwrap();
        server.await.unwrap();

        assert_eq!(reports.len(), 2);
        for report in &reports {
            assert_eq!(report.response.len(), 23);
            let ack = report.ack.as_ref().unwrap();
            assert_eq!(ack.timestamp, 1684481933);
            assert_eq!(ack.heartbeat_interval, 120);
        }
        assert_eq!(reports[0].name, "heartbeat");
        assert_eq!(reports[0].bytes_sent, HEARTBEAT.len());
        assert_eq!(reports[0].chunks, 1);
        assert_eq!(reports[1].name, "telemetry");
        assert_eq!(reports[1].bytes_sent, TELEMETRY.len());
        assert_eq!(reports[1].chunks, 2);
    }

    #[tokio::test]
    async fn test_exact_write_sequence_for_heartbeat() {
        let request = Frame::decode(HEARTBEAT).unwrap();
        let ack_bytes = request.ack(1684481933).unwrap().encode().unwrap();

        let mut mock = tokio_test::io::Builder::new()
            .write(HEARTBEAT)
            .read(&ack_bytes)
            .build();

        let script = vec![payload("heartbeat", HEARTBEAT)];
        let reports = run_session(&mut mock, &script, &settings()).await.unwrap();

        assert_eq!(reports[0].ack.unwrap().timestamp, 1684481933);
    }

    #[tokio::test]
    async fn test_telemetry_split_into_bounded_chunks() {
        let request = Frame::decode(TELEMETRY).unwrap();
        let ack_bytes = request.ack(1684481933).unwrap().encode().unwrap();

        // 164 bytes at chunk size 100: one full chunk, then the 64-byte rest
        let mut mock = tokio_test::io::Builder::new()
            .write(&TELEMETRY[..100])
            .write(&TELEMETRY[100..])
            .read(&ack_bytes)
            .build();

        let script = vec![payload("telemetry", TELEMETRY)];
        let reports = run_session(&mut mock, &script, &settings()).await.unwrap();

        assert_eq!(reports[0].chunks, 2);
        assert!(reports[0].ack.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_response_is_reported_not_fatal() {
        let request = Frame::decode(HEARTBEAT).unwrap();
        let mut ack_bytes = request.ack(1684481933).unwrap().encode().unwrap().to_vec();
        let idx = ack_bytes.len() - 2;
        ack_bytes[idx] = ack_bytes[idx].wrapping_add(1);

        let mut mock = tokio_test::io::Builder::new()
            .write(HEARTBEAT)
            .read(&ack_bytes)
            .build();

        let script = vec![payload("heartbeat", HEARTBEAT)];
        let reports = run_session(&mut mock, &script, &settings()).await.unwrap();

        assert!(reports[0].ack.is_none());
        assert_eq!(reports[0].response, ack_bytes);
    }

    #[tokio::test]
    async fn test_echoed_request_is_not_an_ack() {
        let mut mock = tokio_test::io::Builder::new()
            .write(HEARTBEAT)
            .read(HEARTBEAT)
            .build();

        let script = vec![payload("heartbeat", HEARTBEAT)];
        let reports = run_session(&mut mock, &script, &settings()).await.unwrap();

        assert!(reports[0].ack.is_none());
        assert_eq!(reports[0].response, HEARTBEAT);
    }

    #[tokio::test]
    async fn test_read_timeout_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // swallow the request, then stall without answering or closing
            let mut sink = vec![0u8; HEARTBEAT.len()];
            socket.read_exact(&mut sink).await.unwrap();
            sleep(Duration::from_millis(500)).await;
            drop(socket);
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let script = vec![payload("heartbeat", HEARTBEAT)];
        let mut fast = settings();
        fast.read_timeout = Duration::from_millis(50);

        let err = run_session(&mut stream, &script, &fast).await.unwrap_err();
        assert!(matches!(err, ProbeError::ReadTimeout { .. }));
        drop(server);
    }

    #[tokio::test]
    async fn test_response_without_frame_magic_aborts() {
        let garbage = [0x00u8; HEADER_LEN];

        let mut mock = tokio_test::io::Builder::new()
            .write(HEARTBEAT)
            .read(&garbage)
            .build();

        let script = vec![payload("heartbeat", HEARTBEAT)];
        let err = run_session(&mut mock, &script, &settings()).await.unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Framing {
                source: FrameError::BadMagic(0x00),
                ..
            }
        ));
    }
}
