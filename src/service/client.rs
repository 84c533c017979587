use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

use crate::config::ClientConfig;
use crate::core::codec::CommandCodec;
use crate::core::command::Command;
use crate::error::{ProtocolError, Result};
use crate::protocol::account::AccountIdentity;
use crate::protocol::handshake;
use crate::utils::crypto::PublicKeyBytes;
use crate::utils::timeout::with_timeout_error;

/// Game client side of a session.
///
/// Reads the server hello on connect, so the server key is known before any
/// login is sent.
pub struct Client<S = TcpStream> {
    framed: Framed<S, CommandCodec>,
    server_key: PublicKeyBytes,
    config: ClientConfig,
}

impl Client<TcpStream> {
    /// Connect to `config.address`
    #[instrument(skip(config), fields(address = %config.address))]
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let stream = with_timeout_error(
            async {
                TcpStream::connect(&config.address)
                    .await
                    .map_err(ProtocolError::transport)
            },
            config.connection_timeout,
        )
        .await?;
        stream.set_nodelay(true).map_err(ProtocolError::transport)?;
        Self::from_stream(stream, config.clone()).await
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream and wait for the server hello
    pub async fn from_stream(stream: S, config: ClientConfig) -> Result<Self> {
        let mut framed = Framed::new(stream, CommandCodec::default());

        let hello = with_timeout_error(next_command(&mut framed), config.response_timeout).await?;
        let server_key = handshake::parse_server_hello(&hello)?;
        debug!("Received server hello");

        Ok(Self {
            framed,
            server_key,
            config,
        })
    }

    pub fn server_key(&self) -> &PublicKeyBytes {
        &self.server_key
    }

    /// Send LOGIN with the identity sealed to the server key
    pub async fn login(&mut self, identity: &AccountIdentity) -> Result<()> {
        let login = handshake::seal_login(&self.server_key, identity)?;
        self.send(login).await
    }

    /// Send LOGIN with the identity in the clear
    pub async fn login_plain(&mut self, identity: &AccountIdentity) -> Result<()> {
        let login = handshake::plain_login(identity)?;
        self.send(login).await
    }

    pub async fn send(&mut self, command: Command) -> Result<()> {
        self.framed.send(command).await.map_err(ProtocolError::into_transport)
    }

    /// Write bytes straight to the stream, bypassing framing
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await.map_err(ProtocolError::transport)?;
        stream.flush().await.map_err(ProtocolError::transport)
    }

    /// Next command from the server, within `response_timeout`
    pub async fn recv(&mut self) -> Result<Command> {
        with_timeout_error(next_command(&mut self.framed), self.config.response_timeout).await
    }

    /// Send and wait for the next command
    pub async fn request(&mut self, command: Command) -> Result<Command> {
        self.send(command).await?;
        self.recv().await
    }

    /// Shut down the write side and drop the connection
    pub async fn close(mut self) -> Result<()> {
        self.framed.close().await
    }
}

async fn next_command<S>(framed: &mut Framed<S, CommandCodec>) -> Result<Command>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(Ok(frame)) => frame.parse(),
        Some(Err(e)) => Err(e.into_transport()),
        None => Err(ProtocolError::ConnectionClosed),
    }
}
