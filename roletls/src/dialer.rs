//! Outbound authenticated connections.

use std::sync::Arc;
use std::time::Duration;

use aws_config::SdkConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::conn::{Connection, Side};
use crate::error::Error;
use crate::gci::{MatchesAny, SigV4Signer, SigV4Verifier, Signer, Verifier};
use crate::identity::Role;

/// Establishes outbound connections whose server has proven one of the
/// allowed IAM role identities.
///
/// A successful [`dial`](Dialer::dial) implies an authenticated peer; the
/// handshake runs eagerly before the connection is returned.
pub struct Dialer {
    pub signer: Arc<dyn Signer>,
    pub verifier: Arc<dyn Verifier>,
    /// Bounds the whole handshake (framing, STS verification, TLS).
    pub handshake_timeout: Option<Duration>,
}

impl Dialer {
    /// Build a dialer from the default AWS credential chain, accepting only
    /// servers running as one of `allowed_server_roles`.
    pub async fn new(allowed_server_roles: Vec<Role>) -> Result<Dialer, Error> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::from_sdk_config(&config, allowed_server_roles)
    }

    /// Build a dialer from an already-loaded AWS config.
    pub fn from_sdk_config(
        config: &SdkConfig,
        allowed_server_roles: Vec<Role>,
    ) -> Result<Dialer, Error> {
        let signer = SigV4Signer::from_sdk_config(config)?;
        let verifier = SigV4Verifier::new(Arc::new(MatchesAny::new(allowed_server_roles)));
        Ok(Self::with_parts(Arc::new(signer), Arc::new(verifier)))
    }

    /// Assemble a dialer from explicit parts, overriding the signer or
    /// verifier.
    pub fn with_parts(signer: Arc<dyn Signer>, verifier: Arc<dyn Verifier>) -> Dialer {
        Dialer {
            signer,
            verifier,
            handshake_timeout: None,
        }
    }

    /// Dial `addr` over TCP and complete the handshake before returning.
    ///
    /// The server's leaf certificate must cover the peer IP we actually
    /// connected to.
    pub async fn dial(&self, addr: &str) -> Result<Connection<TcpStream>, Error> {
        let stream = TcpStream::connect(addr).await?;
        let remote_host = stream.peer_addr()?.ip().to_string();
        debug!(%addr, %remote_host, "dialed raw connection");
        self.upgrade(stream, &remote_host).await
    }

    /// Upgrade an already-connected stream, driving the handshake to
    /// completion. `remote_host` is what the server's certificate must
    /// cover and what SNI is set to.
    pub async fn upgrade<S>(&self, stream: S, remote_host: &str) -> Result<Connection<S>, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let conn = self.wrap(stream, remote_host);
        conn.handshake().await?;
        Ok(conn)
    }

    /// Wrap a stream without driving the handshake; it runs lazily on
    /// first I/O instead.
    pub fn wrap<S>(&self, stream: S, remote_host: &str) -> Connection<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        Connection::new(
            stream,
            Side::Client {
                remote_host: remote_host.to_string(),
            },
            self.signer.clone(),
            self.verifier.clone(),
            self.handshake_timeout,
        )
    }
}
