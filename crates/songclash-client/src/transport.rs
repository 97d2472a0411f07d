//! QUIC transport for the client.
//!
//! A thin frame pump: protocol logic stays in the Sans-IO [`Client`]. One
//! bidirectional stream carries all intents in order; the server pushes
//! events on a single unidirectional stream.
//!
//! [`Client`]: crate::Client

use std::{net::SocketAddr, sync::Arc, time::Instant};

use bytes::BytesMut;
use songclash_core::{Connection, ConnectionAction, ConnectionConfig};
use songclash_proto::{ALPN_PROTOCOL, Frame, FrameHeader};
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error
    #[error("stream error: {0}")]
    Stream(String),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Handle to a connected transport.
///
/// Frames are exchanged via the channels; internal tasks do the QUIC I/O.
pub struct ConnectedTransport {
    /// Send frames to the server
    pub to_server: mpsc::Sender<Frame>,
    /// Receive frames from the server
    pub from_server: mpsc::Receiver<Frame>,
    abort: tokio::task::AbortHandle,
}

impl ConnectedTransport {
    /// Stop the connection tasks.
    pub fn stop(&self) {
        self.abort.abort();
    }
}

/// Connect to a Songclash server and initiate the handshake.
///
/// The Hello frame carrying the identity token goes out through the session
/// state machine before the pump starts; the HelloReply arrives on
/// `from_server` for the application's [`Client`] to absorb.
///
/// [`Client`]: crate::Client
pub async fn connect(
    server_addr: &str,
    token: &str,
) -> Result<ConnectedTransport, TransportError> {
    let addr: SocketAddr = server_addr
        .parse()
        .map_err(|e| TransportError::Connection(format!("invalid address: {e}")))?;

    let mut endpoint = quinn::Endpoint::client(
        "0.0.0.0:0".parse().map_err(|e| TransportError::Connection(format!("bind: {e}")))?,
    )
    .map_err(|e| TransportError::Connection(format!("endpoint creation failed: {e}")))?;
    endpoint.set_default_client_config(insecure_client_config()?);

    let connection = endpoint
        .connect(addr, "localhost")
        .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?
        .await
        .map_err(|e| TransportError::Connection(format!("connection failed: {e}")))?;

    let (to_server_tx, to_server_rx) = mpsc::channel::<Frame>(32);
    let (from_server_tx, from_server_rx) = mpsc::channel::<Frame>(32);

    // Session-layer handshake lives in the core state machine
    let mut session = Connection::new(Instant::now(), ConnectionConfig::default());
    let hello_actions = session
        .send_hello(Some(token.to_string()), Instant::now())
        .map_err(|e| TransportError::Protocol(e.to_string()))?;

    for action in hello_actions {
        if let ConnectionAction::SendFrame(frame) = action {
            to_server_tx
                .send(frame)
                .await
                .map_err(|e| TransportError::Stream(format!("hello enqueue failed: {e}")))?;
        }
    }

    let handle = tokio::spawn(run_connection(connection, to_server_rx, from_server_tx));

    Ok(ConnectedTransport {
        to_server: to_server_tx,
        from_server: from_server_rx,
        abort: handle.abort_handle(),
    })
}

/// Bridge between the channels and QUIC streams.
async fn run_connection(
    connection: quinn::Connection,
    mut to_server: mpsc::Receiver<Frame>,
    from_server: mpsc::Sender<Frame>,
) {
    // All intents go on one ordered bidirectional stream
    let Ok((mut send, _recv)) = connection.open_bi().await else {
        return;
    };

    // The server pushes events on one unidirectional stream
    let conn_recv = connection.clone();
    let recv_task = tokio::spawn(async move {
        let Ok(mut recv) = conn_recv.accept_uni().await else {
            return;
        };

        loop {
            match read_frame(&mut recv).await {
                Ok(Some(frame)) => {
                    if from_server.send(frame).await.is_err() {
                        break;
                    }
                },
                // Clean end or a broken stream both surface to the caller
                // as a closed from_server channel
                Ok(None) | Err(_) => break,
            }
        }
    });

    while let Some(frame) = to_server.recv().await {
        let mut buf = Vec::with_capacity(frame.encoded_len());
        if frame.encode(&mut buf).is_err() {
            continue;
        }
        if send.write_all(&buf).await.is_err() {
            break;
        }
    }

    recv_task.abort();
}

/// Read one length-framed frame. `None` on clean end of stream.
async fn read_frame(recv: &mut quinn::RecvStream) -> Result<Option<Frame>, TransportError> {
    let mut buf = BytesMut::zeroed(FrameHeader::SIZE);

    if recv.read_exact(&mut buf).await.is_err() {
        return Ok(None);
    }

    let payload_size = FrameHeader::from_bytes(&buf)
        .map_err(|e| TransportError::Protocol(e.to_string()))?
        .payload_size() as usize;

    if payload_size > 0 {
        buf.resize(FrameHeader::SIZE + payload_size, 0);
        if recv.read_exact(&mut buf[FrameHeader::SIZE..]).await.is_err() {
            return Ok(None);
        }
    }

    Frame::decode(&buf).map(Some).map_err(|e| TransportError::Protocol(e.to_string()))
}

/// Client config that accepts any certificate.
///
/// Development only: production deployments must verify the server
/// certificate against a trusted CA.
fn insecure_client_config() -> Result<quinn::ClientConfig, TransportError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();

    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let mut config = quinn::ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| TransportError::Connection(format!("TLS config: {e}")))?,
    ));

    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(
        std::time::Duration::from_secs(30)
            .try_into()
            .ok(),
    );
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate (insecure).
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
