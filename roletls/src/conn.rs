//! A byte stream that authenticates its peer on first use.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, OnceCell};
use tokio_rustls::TlsStream;
use tracing::debug;

use crate::error::Error;
use crate::gci::{Signer, Verifier};
use crate::handshake;
use crate::identity::Arn;

/// Verified identity of the remote end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMetadata {
    pub account_id: String,
    /// The caller ARN STS attested for the peer, normally an assumed-role
    /// ARN.
    pub role: Arn,
}

/// Which half of the hello exchange this connection performs.
pub(crate) enum Side {
    Client { remote_host: String },
    Server,
}

/// An authenticated, encrypted byte stream.
///
/// The handshake runs at most once: the first of [`handshake`], [`read`],
/// or [`write`] to be called triggers it, concurrent callers wait on the
/// same outcome, and the result (success or failure) is cached. After a
/// success, reads and writes delegate to the TLS stream and [`peer`]
/// reports the verified identity; after a failure, every operation replays
/// the cached error.
///
/// Handles are cheap to clone and share one underlying connection.
/// Dropping the future of an in-flight handshake aborts it and poisons the
/// connection for all handles.
///
/// [`handshake`]: Connection::handshake
/// [`read`]: Connection::read
/// [`write`]: Connection::write
/// [`peer`]: Connection::peer
pub struct Connection<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Connection<S> {
    fn clone(&self) -> Self {
        Connection {
            shared: self.shared.clone(),
        }
    }
}

impl<S> fmt::Debug for Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer())
            .finish_non_exhaustive()
    }
}

struct Shared<S> {
    /// The raw stream, consumed by whichever caller runs the handshake.
    raw: Mutex<Option<S>>,
    outcome: OnceCell<Result<PeerMetadata, Arc<Error>>>,
    read_half: Mutex<Option<ReadHalf<TlsStream<S>>>>,
    write_half: Mutex<Option<WriteHalf<TlsStream<S>>>>,
    side: Side,
    signer: Arc<dyn Signer>,
    verifier: Arc<dyn Verifier>,
    handshake_timeout: Option<Duration>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(
        stream: S,
        side: Side,
        signer: Arc<dyn Signer>,
        verifier: Arc<dyn Verifier>,
        handshake_timeout: Option<Duration>,
    ) -> Self {
        Connection {
            shared: Arc::new(Shared {
                raw: Mutex::new(Some(stream)),
                outcome: OnceCell::new(),
                read_half: Mutex::new(None),
                write_half: Mutex::new(None),
                side,
                signer,
                verifier,
                handshake_timeout,
            }),
        }
    }

    /// Run the hello exchange and TLS handshake if they have not happened
    /// yet. Idempotent: later calls return the cached outcome.
    pub async fn handshake(&self) -> Result<(), Error> {
        let outcome = self
            .shared
            .outcome
            .get_or_init(|| self.run_handshake())
            .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(reason) => Err(Error::HandshakeRejected {
                reason: reason.clone(),
            }),
        }
    }

    async fn run_handshake(&self) -> Result<PeerMetadata, Arc<Error>> {
        let Some(stream) = self.shared.raw.lock().await.take() else {
            // A previous initializer was cancelled after consuming the
            // stream; the connection is unusable.
            return Err(Arc::new(Error::HandshakeInterrupted));
        };

        let exchange = async {
            match &self.shared.side {
                Side::Client { remote_host } => {
                    handshake::client(
                        stream,
                        self.shared.signer.as_ref(),
                        self.shared.verifier.as_ref(),
                        remote_host,
                    )
                    .await
                }
                Side::Server => {
                    handshake::server(
                        stream,
                        self.shared.signer.as_ref(),
                        self.shared.verifier.as_ref(),
                    )
                    .await
                }
            }
        };

        let result = match self.shared.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .unwrap_or(Err(Error::HandshakeTimeout)),
            None => exchange.await,
        };

        match result {
            Ok((tls_stream, peer)) => {
                let (read_half, write_half) = tokio::io::split(tls_stream);
                *self.shared.read_half.lock().await = Some(read_half);
                *self.shared.write_half.lock().await = Some(write_half);
                Ok(peer)
            }
            Err(err) => {
                debug!(error = %err, "handshake failed");
                Err(Arc::new(err))
            }
        }
    }

    /// Identity of the verified peer. `None` until a handshake succeeds.
    pub fn peer(&self) -> Option<PeerMetadata> {
        match self.shared.outcome.get() {
            Some(Ok(peer)) => Some(peer.clone()),
            _ => None,
        }
    }

    /// Read decrypted bytes, running the handshake first if needed.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.handshake().await?;
        let mut guard = self.shared.read_half.lock().await;
        match guard.as_mut() {
            Some(read_half) => read_half.read(buf).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection read half is gone",
            )),
        }
    }

    /// Write bytes through the encrypted stream, running the handshake
    /// first if needed.
    pub async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.handshake().await?;
        let mut guard = self.shared.write_half.lock().await;
        match guard.as_mut() {
            Some(write_half) => write_half.write(buf).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection write half is gone",
            )),
        }
    }

    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.handshake().await?;
        let mut guard = self.shared.write_half.lock().await;
        match guard.as_mut() {
            Some(write_half) => write_half.write_all(buf).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection write half is gone",
            )),
        }
    }

    pub async fn flush(&self) -> io::Result<()> {
        self.handshake().await?;
        let mut guard = self.shared.write_half.lock().await;
        match guard.as_mut() {
            Some(write_half) => write_half.flush().await,
            None => Ok(()),
        }
    }

    /// Send a TLS close-notify and shut down the underlying stream's write
    /// side.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.handshake().await?;
        let mut guard = self.shared.write_half.lock().await;
        match guard.as_mut() {
            Some(write_half) => write_half.shutdown().await,
            None => Ok(()),
        }
    }
}
