//! TBBOX TCP session: connect, login, send, retry and reconnect.
//!
//! TBBOX accepts a single client at a time and ignores commands until a
//! login frame was received on the connection. Login is therefore folded
//! into `connect()`, and callers above this module only ever see an
//! authenticated session or an error.
//!
//! Retries use fixed delays. The device lives on the local network and a
//! quick recovery matters more than backing off.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::consts;
use crate::error::SessionError;
use crate::payload::CommandPayload;

/// Opens byte streams to the device.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    async fn connect(&self) -> io::Result<Self::Stream>;

    /// Human readable peer, for logs.
    fn target(&self) -> String;
}

/// Plain TCP to `host:port`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn target(&self) -> String {
        self.addr.clone()
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    /// Bound for writing a whole command.
    pub io_timeout: Duration,
    /// Bound for the diagnostic read after a command.
    pub response_timeout: Duration,
    pub connect_retries: u32,
    pub connect_retry_delay: Duration,
    pub send_retries: u32,
    pub send_retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: consts::DEFAULT_CONNECT_TIMEOUT,
            io_timeout: consts::DEFAULT_IO_TIMEOUT,
            response_timeout: consts::DEFAULT_RESPONSE_TIMEOUT,
            connect_retries: consts::DEFAULT_CONNECT_RETRIES,
            connect_retry_delay: consts::DEFAULT_CONNECT_RETRY_DELAY,
            send_retries: consts::DEFAULT_SEND_RETRIES,
            send_retry_delay: consts::DEFAULT_SEND_RETRY_DELAY,
        }
    }
}

impl From<&DeviceConfig> for SessionConfig {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            io_timeout: config.io_timeout(),
            response_timeout: config.response_timeout(),
            connect_retries: config.connect_retries,
            connect_retry_delay: config.connect_retry_delay(),
            send_retries: config.send_retries,
            send_retry_delay: config.send_retry_delay(),
        }
    }
}

/// Connection state. Ordered: later states imply the earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
}

pub struct DeviceSession<C: Connector> {
    connector: C,
    config: SessionConfig,
    login: CommandPayload,
    /// At most one live stream.
    stream: Option<C::Stream>,
    state: SessionState,
}

impl DeviceSession<TcpConnector> {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            TcpConnector::new(config.addr()),
            config.login.clone(),
            SessionConfig::from(config),
        )
    }
}

impl<C: Connector> DeviceSession<C> {
    pub fn new(connector: C, login: CommandPayload, config: SessionConfig) -> Self {
        info!("Device session for {}", connector.target());
        Self {
            connector,
            config,
            login,
            stream: None,
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a fresh connection and log in. Any previous connection is closed
    /// first. A failed login counts as a failed attempt.
    #[tracing::instrument(skip(self), fields(target = %self.connector.target()))]
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        let retries = self.config.connect_retries;

        for attempt in 1..=retries {
            if self.stream.is_some() {
                self.close().await;
            }

            self.state = SessionState::Connecting;
            info!("Connecting to device (attempt {}/{})", attempt, retries);

            match timeout(self.config.connect_timeout, self.connector.connect()).await {
                Ok(Ok(stream)) => {
                    self.stream = Some(stream);
                    self.state = SessionState::Connected;
                    info!("Connected to device");

                    match self.login().await {
                        Ok(()) => return Ok(()),
                        Err(err) => {
                            error!("{} (attempt {}/{})", err, attempt, retries);
                            self.close().await;
                        }
                    }
                }
                Ok(Err(err)) => {
                    self.state = SessionState::Disconnected;
                    error!("Connection error: {} (attempt {}/{})", err, attempt, retries);
                }
                Err(_) => {
                    self.state = SessionState::Disconnected;
                    error!(
                        "Connection timed out after {:?} (attempt {}/{})",
                        self.config.connect_timeout, attempt, retries
                    );
                }
            }

            if attempt < retries {
                info!("Reconnecting in {:?}", self.config.connect_retry_delay);
                sleep(self.config.connect_retry_delay).await;
            }
        }

        error!("Unable to connect to device ({} attempts)", retries);
        Err(SessionError::ConnectFailed { attempts: retries })
    }

    /// Send the login frame. TBBOX does not acknowledge it; a complete write
    /// counts as success.
    pub async fn login(&mut self) -> Result<(), SessionError> {
        if self.state < SessionState::Connected || self.stream.is_none() {
            error!("Login requires an open connection");
            return Err(SessionError::NotConnected);
        }

        self.state = SessionState::Authenticating;
        info!("Logging in to device");

        let login = self.login.clone();
        match self.send_raw(&login).await {
            Ok(()) if self.stream.is_none() => {
                Err(SessionError::AuthFailed("connection closed by device".to_string()))
            }
            Ok(()) => {
                self.state = SessionState::Authenticated;
                info!("Logged in to device");
                Ok(())
            }
            Err(err) => Err(SessionError::AuthFailed(err.to_string())),
        }
    }

    /// Write one payload and glance at whatever TBBOX answers. Any I/O
    /// failure drops the connection. So does a device that closed its end:
    /// the write still counts, the next command reconnects first.
    pub async fn send_raw(&mut self, payload: &CommandPayload) -> Result<(), SessionError> {
        let Some(stream) = self.stream.as_mut() else {
            error!("No connection to device");
            return Err(SessionError::NotConnected);
        };
        let bytes = payload.to_bytes()?;

        match exchange(stream, &bytes, &self.config).await {
            Ok(Peer::Open) => {
                debug!("TX->TBBOX: {:?}", payload);
                Ok(())
            }
            Ok(Peer::Closed) => {
                debug!("TX->TBBOX: {:?}", payload);
                warn!("Device closed the connection");
                self.stream = None;
                self.state = SessionState::Disconnected;
                Ok(())
            }
            Err(err) => {
                error!("Error while sending command {:?}: {}", payload, err);
                self.stream = None;
                self.state = SessionState::Disconnected;
                Err(err)
            }
        }
    }

    /// Deliver a command, reconnecting when needed. A failed reconnect ends
    /// the attempt loop right away.
    pub async fn send_command(
        &mut self,
        payload: &CommandPayload,
        max_retry: u32,
    ) -> Result<(), SessionError> {
        for attempt in 1..=max_retry {
            if !self.is_authenticated() {
                warn!("Not connected to device, reconnecting");
                if let Err(err) = self.connect().await {
                    error!("Reconnect failed: {}", err);
                    return Err(err);
                }
            }

            match self.send_raw(payload).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < max_retry => {
                    warn!(
                        "Command send failed: {}. Retrying (attempt {}/{})",
                        err,
                        attempt + 1,
                        max_retry
                    );
                    sleep(self.config.send_retry_delay).await;
                }
                Err(err) => {
                    warn!("Command send failed: {}", err);
                }
            }
        }

        error!("Command not delivered ({} attempts)", max_retry);
        Err(SessionError::SendFailed { attempts: max_retry })
    }

    /// Close the connection. Safe to call in any state.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            match timeout(self.config.io_timeout, stream.shutdown()).await {
                Ok(Ok(())) => info!("Closed connection to device"),
                Ok(Err(err)) => warn!("Error while closing device connection: {}", err),
                Err(_) => warn!("Timed out while closing device connection"),
            }
        }
        self.state = SessionState::Disconnected;
    }
}

/// What the diagnostic read saw of the other end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Peer {
    Open,
    /// EOF: TBBOX hung up (idle timeout, restart).
    Closed,
}

async fn exchange<S>(stream: &mut S, bytes: &[u8], config: &SessionConfig) -> Result<Peer, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let write = async {
        stream.write_all(bytes).await?;
        stream.flush().await
    };
    match timeout(config.io_timeout, write).await {
        Ok(result) => result?,
        Err(_) => return Err(SessionError::Timeout(config.io_timeout)),
    }

    // The answer is only logged; silence is fine.
    let mut buf = [0u8; consts::RESPONSE_BUFFER_SIZE];
    match timeout(config.response_timeout, stream.read(&mut buf)).await {
        Ok(Ok(0)) => {
            debug!("No response from device, connection closed");
            return Ok(Peer::Closed);
        }
        Ok(Ok(count)) => debug!("TBBOX->RX: {} bytes: {}", count, hex::encode(&buf[..count])),
        Ok(Err(err)) => return Err(err.into()),
        Err(_) => debug!("No response within {:?}", config.response_timeout),
    }
    Ok(Peer::Open)
}
