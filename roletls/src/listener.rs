//! Inbound authenticated connections.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aws_config::SdkConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::conn::{Connection, Side};
use crate::error::Error;
use crate::gci::{MatchesAny, SigV4Signer, SigV4Verifier, Signer, Verifier};
use crate::identity::Role;

/// Accepts connections and authenticates each client against the allowed
/// IAM roles.
///
/// [`accept`](Listener::accept) returns immediately; the handshake runs on
/// a background task so a client that stalls mid-handshake cannot block
/// the accept loop. Handshake failures are cached on the connection and
/// surface on its first read or write.
pub struct Listener {
    inner: TcpListener,
    pub signer: Arc<dyn Signer>,
    pub verifier: Arc<dyn Verifier>,
    /// Bounds the whole handshake (framing, STS verification, TLS).
    pub handshake_timeout: Option<Duration>,
}

impl Listener {
    /// Wrap a bound TCP listener using the default AWS credential chain,
    /// accepting only clients running as one of `allowed_client_roles`.
    pub async fn new(inner: TcpListener, allowed_client_roles: Vec<Role>) -> Result<Listener, Error> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::from_sdk_config(inner, &config, allowed_client_roles)
    }

    /// Wrap a bound TCP listener using an already-loaded AWS config.
    pub fn from_sdk_config(
        inner: TcpListener,
        config: &SdkConfig,
        allowed_client_roles: Vec<Role>,
    ) -> Result<Listener, Error> {
        let signer = SigV4Signer::from_sdk_config(config)?;
        let verifier = SigV4Verifier::new(Arc::new(MatchesAny::new(allowed_client_roles)));
        Ok(Self::with_parts(inner, Arc::new(signer), Arc::new(verifier)))
    }

    /// Assemble a listener from explicit parts, overriding the signer or
    /// verifier.
    pub fn with_parts(
        inner: TcpListener,
        signer: Arc<dyn Signer>,
        verifier: Arc<dyn Verifier>,
    ) -> Listener {
        Listener {
            inner,
            signer,
            verifier,
            handshake_timeout: None,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept one connection. The server handshake is kicked off in the
    /// background; any failure is cached and replayed on the connection's
    /// first read or write.
    pub async fn accept(&self) -> Result<(Connection<TcpStream>, SocketAddr), Error> {
        let (stream, peer_addr) = self.inner.accept().await?;
        let conn = self.wrap(stream);

        let background = conn.clone();
        tokio::spawn(async move {
            if let Err(err) = background.handshake().await {
                // Cached on the connection; logged so failures are not
                // invisible when the caller never touches the stream.
                debug!(peer = %peer_addr, error = %err, "background handshake failed");
            }
        });

        Ok((conn, peer_addr))
    }

    /// Upgrade an accepted stream directly, driving the server handshake
    /// to completion before returning.
    pub async fn upgrade<S>(&self, stream: S) -> Result<Connection<S>, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let conn = self.wrap(stream);
        conn.handshake().await?;
        Ok(conn)
    }

    /// Wrap a stream without driving the handshake.
    pub fn wrap<S>(&self, stream: S) -> Connection<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        Connection::new(
            stream,
            Side::Server,
            self.signer.clone(),
            self.verifier.clone(),
            self.handshake_timeout,
        )
    }
}
