use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt as _;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::client::{ExchangeLock, Options};
use crate::protocol::{CommandCode, DEFAULT_PORT, FrameError, LuxtronikCodec};
use crate::register_table::{Family, TableError};

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("`{0}` is not a valid controller address")]
    InvalidEndpoint(String),
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("connecting to `{0}` did not complete within {1:?}")]
    DialTimeout(String, Duration),
    #[error("not connected to the controller")]
    NotConnected,
    #[error("could not send out the {1} request")]
    Send(#[source] FrameError, CommandCode),
    #[error("could not read the {1} response")]
    Receive(#[source] FrameError, CommandCode),
    #[error("the controller closed the connection while a {0} response was pending")]
    ConnectionClosed(CommandCode),
    #[error("the {0} exchange did not complete within {1:?}")]
    Timeout(CommandCode, Duration),
    #[error("could not shut down the connection")]
    Shutdown(#[source] std::io::Error),
    #[error("{0} is not a write command")]
    NotAWrite(CommandCode),
    #[error("safe mode is enabled, refusing to send {0}")]
    SafeMode(CommandCode),
    #[error("a {table} table cannot be filled by a {requested} read")]
    WrongFamily { requested: Family, table: Family },
    #[error("could not store the {1} response")]
    Table(#[source] TableError, Family),
}

/// Gets called with the freshly dialed socket, e.g. to configure keep-alive.
pub type ConnectCallback = Arc<dyn Fn(&TcpStream) + Send + Sync>;

pub(crate) type ControllerIo = Framed<TcpStream, LuxtronikCodec>;

/// `host[:port]` of a controller. The port defaults to [`DEFAULT_PORT`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(address: SocketAddr) -> Self {
        Self::new(address.ip().to_string(), address.port())
    }
}

impl std::str::FromStr for Endpoint {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(address) = s.parse::<SocketAddr>() {
            return Ok(address.into());
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::new(ip.to_string(), DEFAULT_PORT));
        }
        let (host, port) = match s.rsplit_once(':') {
            None => (s, DEFAULT_PORT),
            Some((host, port)) => {
                let port = port.parse().map_err(|_| Error::InvalidEndpoint(s.to_string()))?;
                (host, port)
            }
        };
        if host.is_empty() || host.contains(':') {
            return Err(Error::InvalidEndpoint(s.to_string()));
        }
        Ok(Self::new(host, port))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            f.write_fmt(format_args!("[{}]:{}", self.host, self.port))
        } else {
            f.write_fmt(format_args!("{}:{}", self.host, self.port))
        }
    }
}

/// Owner of the single TCP stream to a controller.
pub struct Connection {
    endpoint: Endpoint,
    dial_timeout: Duration,
    on_connect: Option<ConnectCallback>,
    io: Option<ControllerIo>,
}

impl Connection {
    pub fn new(
        endpoint: Endpoint,
        dial_timeout: Option<Duration>,
        on_connect: Option<ConnectCallback>,
    ) -> Self {
        let dial_timeout = dial_timeout.filter(|t| !t.is_zero()).unwrap_or(DEFAULT_DIAL_TIMEOUT);
        Self { endpoint, dial_timeout, on_connect, io: None }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.io.is_some()
    }

    /// Dial the controller unless a stream is already open.
    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.io.is_some() {
            return Ok(());
        }
        let address = self.endpoint.to_string();
        info!(message = "connecting...", address);
        let dial = async {
            let addresses = tokio::net::lookup_host(&address)
                .await
                .map_err(|e| Error::LookupHost(e, address.clone()))?
                .collect::<Vec<_>>();
            debug!(message = "resolved", ?addresses);
            TcpStream::connect(&*addresses)
                .await
                .map_err(|e| Error::Connect(e, address.clone()))
        };
        let socket = tokio::time::timeout(self.dial_timeout, dial)
            .await
            .map_err(|_| Error::DialTimeout(address.clone(), self.dial_timeout))??;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        if let Some(on_connect) = &self.on_connect {
            on_connect(&socket);
        }
        info!(message = "connected", address);
        self.io = Some(Framed::new(socket, LuxtronikCodec::default()));
        Ok(())
    }

    /// Shut the stream down. Does nothing if there is no stream.
    pub async fn close(&mut self) -> Result<(), Error> {
        let Some(io) = self.io.take() else {
            return Ok(());
        };
        info!(message = "closing", address = %self.endpoint);
        io.into_inner().shutdown().await.map_err(Error::Shutdown)
    }

    pub(crate) fn io(&mut self) -> Result<&mut ControllerIo, Error> {
        self.io.as_mut().ok_or(Error::NotConnected)
    }

    /// Drop a stream whose framing can no longer be trusted.
    pub(crate) fn discard(&mut self) {
        if self.io.take().is_some() {
            warn!(
                message = "dropping the connection after a failed exchange",
                address = %self.endpoint
            );
        }
    }
}

#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    /// Address of the heat pump controller as `host` or `host:port`.
    #[arg(long, short = 'a', env = "LUXTRONIK_ADDRESS")]
    address: Endpoint,

    /// Give up connecting to the controller after this long.
    #[arg(long, default_value = "60s")]
    dial_timeout: humantime::Duration,

    /// Consider a request failed if its response isn't complete after this long.
    ///
    /// The connection is dropped afterwards, as the stream is no longer in a known state.
    #[arg(long, default_value = "10s")]
    exchange_timeout: humantime::Duration,

    /// Allow commands that change controller parameters.
    ///
    /// Without this flag the client runs in safe mode and refuses to send any write command.
    #[arg(long)]
    allow_writes: bool,

    /// Expect the controller to echo every parameter write and consume that echo.
    #[arg(long)]
    acknowledged_writes: bool,
}

impl Args {
    pub fn endpoint(&self) -> &Endpoint {
        &self.address
    }

    pub fn options(&self) -> Options {
        Options {
            dial_timeout: Some(*self.dial_timeout),
            exchange_timeout: Some(*self.exchange_timeout),
            safe_mode: !self.allow_writes,
            acknowledged_writes: self.acknowledged_writes,
            on_connect: None,
            exchange_lock: ExchangeLock::process_wide(),
        }
    }
}
