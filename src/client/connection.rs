//! Socket ownership: opening TCP/TLS streams and shuttling bytes.
//!
//! The stream is split into a reader task and a writer task. Both run on the
//! caller's runtime and talk to the client through unbounded channels, so the
//! client never awaits a socket outside the handshake: sends are queue pushes
//! and receives drain whatever the reader task has already delivered.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::error::{ConnectionError, ProtocolError};
use crate::update::Update;
use crate::wire::Decoder;

const READ_CHUNK: usize = 8 * 1024;

/// Anything the transport can run over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedStream = Box<dyn Stream>;

/// Events from the reader and writer tasks.
#[derive(Debug)]
pub(crate) enum Inbound {
    Data(Vec<u8>),
    Closed,
    Failed(io::Error),
}

/// What one non-blocking drain produced.
#[derive(Debug, Default)]
pub(crate) struct Drained {
    pub updates: Vec<Update>,
    pub lost: Option<String>,
}

/// Open a TCP connection to `host:port`, wrapped in TLS when `secure`.
pub async fn open(
    host: &str,
    port: u16,
    secure: bool,
    accept_invalid_certs: bool,
) -> Result<BoxedStream, ConnectionError> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|source| ConnectionError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    let mut failure = None;
    let mut tcp = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(source) => {
                debug!(%addr, error = %source, "connect attempt failed");
                failure = Some(ConnectionError::Connect { addr, source });
            }
        }
    }
    let tcp = match (tcp, failure) {
        (Some(stream), _) => stream,
        (None, Some(err)) => return Err(err),
        (None, None) => {
            return Err(ConnectionError::NoAddress {
                host: host.to_string(),
            })
        }
    };
    let _ = tcp.set_nodelay(true);

    if !secure {
        return Ok(Box::new(tcp));
    }

    let connector = TlsConnector::from(Arc::new(tls_config(accept_invalid_certs)?));
    let name = ServerName::try_from(host.to_string()).map_err(|_| {
        ConnectionError::InvalidServerName {
            host: host.to_string(),
        }
    })?;
    let tls = connector
        .connect(name, tcp)
        .await
        .map_err(|source| ConnectionError::Tls {
            host: host.to_string(),
            source,
        })?;
    Ok(Box::new(tls))
}

fn tls_config(accept_invalid_certs: bool) -> Result<ClientConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;
    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    } else {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(config)
}

/// Verifier for servers with self-signed certificates. Signatures are still
/// checked; the chain of trust is not.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// A live byte stream plus the decoder for what it delivers.
#[derive(Debug)]
pub(crate) struct Transport {
    peer: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    stash: VecDeque<Inbound>,
    decoder: Decoder,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Transport {
    /// Take ownership of `stream` and start its reader and writer tasks.
    pub fn spawn(stream: BoxedStream, peer: impl Into<String>, max_frame: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (event_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, frame_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(read_half, event_tx.clone()));
        let writer = tokio::spawn(write_loop(write_half, frame_rx, event_tx));

        Self {
            peer: peer.into(),
            outbound,
            inbound,
            stash: VecDeque::new(),
            decoder: Decoder::new(max_frame),
            reader,
            writer,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue an encoded frame. Fails only if the writer task has stopped.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), String> {
        self.outbound
            .send(frame)
            .map_err(|_| format!("writer for {} has stopped", self.peer))
    }

    /// Decode everything currently available without waiting.
    pub fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        loop {
            let event = match self.stash.pop_front() {
                Some(event) => event,
                None => match self.inbound.try_recv() {
                    Ok(event) => event,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        drained.lost.get_or_insert_with(|| "transport tasks stopped".into());
                        break;
                    }
                },
            };
            match event {
                Inbound::Data(bytes) => self.decoder.push(&bytes),
                Inbound::Closed => {
                    drained.lost = Some(format!("{} closed the connection", self.peer));
                    break;
                }
                Inbound::Failed(e) => {
                    drained.lost = Some(format!("I/O error on {}: {}", self.peer, e));
                    break;
                }
            }
        }

        let (updates, fatal) = self.decoder.drain();
        drained.updates = updates;
        if let Some(e) = fatal {
            warn!(peer = %self.peer, error = %e, "unrecoverable framing error");
            drained.lost.get_or_insert_with(|| e.to_string());
        }
        drained
    }

    /// Wait until [`Transport::drain`] has something to report.
    pub async fn readable(&mut self) {
        if !self.stash.is_empty() || self.decoder.has_frame() {
            return;
        }
        let event = self.inbound.recv().await.unwrap_or(Inbound::Closed);
        self.stash.push_back(event);
    }

    /// Wait for the next complete update; used while authenticating.
    /// Bad frames are skipped. Remaining frames stay buffered.
    pub async fn next_update(&mut self) -> Result<Update, String> {
        loop {
            while let Some(result) = self.decoder.next_update() {
                match result {
                    Ok(update) => return Ok(update),
                    Err(e @ ProtocolError::FrameTooLarge { .. }) => return Err(e.to_string()),
                    Err(e) => warn!(peer = %self.peer, error = %e, "skipping bad frame"),
                }
            }
            let event = match self.stash.pop_front() {
                Some(event) => event,
                None => self.inbound.recv().await.unwrap_or(Inbound::Closed),
            };
            match event {
                Inbound::Data(bytes) => self.decoder.push(&bytes),
                Inbound::Closed => return Err(format!("{} closed the connection", self.peer)),
                Inbound::Failed(e) => return Err(format!("I/O error on {}: {}", self.peer, e)),
            }
        }
    }

    /// Stop reading and let the writer flush what is queued, then shut down.
    pub fn close(self) {
        self.reader.abort();
        drop(self.outbound);
        debug!(peer = %self.peer, "transport closed");
        // The writer exits on its own once the queue is drained.
        drop(self.writer);
    }
}

async fn read_loop(mut reader: ReadHalf<BoxedStream>, events: mpsc::UnboundedSender<Inbound>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = events.send(Inbound::Closed);
                break;
            }
            Ok(n) => {
                if events.send(Inbound::Data(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = events.send(Inbound::Failed(e));
                break;
            }
        }
    }
}

async fn write_loop(
    mut writer: WriteHalf<BoxedStream>,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<Inbound>,
) {
    while let Some(frame) = frames.recv().await {
        let result = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            let _ = events.send(Inbound::Failed(e));
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::Kind;
    use crate::wire::{encode, DEFAULT_MAX_FRAME};

    #[tokio::test]
    async fn drains_frames_and_reports_close() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);
        let mut transport = Transport::spawn(Box::new(client_side), "test", DEFAULT_MAX_FRAME);

        let mut bytes = encode(&Update::new(Kind::Ping).with_id(1));
        bytes.extend(encode(&Update::new(Kind::Pong).with_id(2)));
        server_side.write_all(&bytes).await.unwrap();

        let mut seen = Vec::new();
        while seen.len() < 2 {
            transport.readable().await;
            let drained = transport.drain();
            assert!(drained.lost.is_none());
            seen.extend(drained.updates.into_iter().map(|u| u.kind()));
        }
        assert_eq!(seen, vec![Kind::Ping, Kind::Pong]);

        drop(server_side);
        transport.readable().await;
        let drained = transport.drain();
        assert!(drained.updates.is_empty());
        assert!(drained.lost.unwrap().contains("closed"));
    }

    #[tokio::test]
    async fn queued_frames_reach_the_peer() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);
        let transport = Transport::spawn(Box::new(client_side), "test", DEFAULT_MAX_FRAME);

        let frame = encode(&Update::new(Kind::Ping).with_id(9));
        transport.send(frame.clone()).unwrap();
        transport.close();

        let mut received = Vec::new();
        server_side.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn empty_drain_is_not_an_error() {
        let (client_side, _server_side) = tokio::io::duplex(64);
        let mut transport = Transport::spawn(Box::new(client_side), "test", DEFAULT_MAX_FRAME);
        let drained = transport.drain();
        assert!(drained.updates.is_empty());
        assert!(drained.lost.is_none());
    }
}
