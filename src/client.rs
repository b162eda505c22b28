use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::connection::{ConnectCallback, Connection, Endpoint, Error};
use crate::protocol::{CommandCode, Request, Response};
use crate::register_table::{Family, RegisterTable};

pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Serializes request/response exchanges.
///
/// Controllers misbehave when command streams interleave, so every exchange holds this lock from
/// the moment its request is encoded until its response is decoded. Clients sharing a lock never
/// have more than one exchange in flight between them, even when they talk to different
/// controllers.
#[derive(Clone, Debug)]
pub struct ExchangeLock(Arc<Mutex<()>>);

impl ExchangeLock {
    /// A lock shared with nobody else.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(())))
    }

    /// The lock shared by every client in this process that does not bring its own.
    pub fn process_wide() -> Self {
        static PROCESS_WIDE: OnceLock<ExchangeLock> = OnceLock::new();
        PROCESS_WIDE.get_or_init(ExchangeLock::new).clone()
    }

    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().await
    }

    pub fn is_shared_with(&self, other: &ExchangeLock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Refuses write commands before they are encoded, so that nothing reaches a live device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SafeMode(bool);

impl SafeMode {
    pub const ENABLED: Self = Self(true);
    pub const DISABLED: Self = Self(false);

    pub fn is_enabled(self) -> bool {
        self.0
    }

    pub fn check(self, code: CommandCode) -> Result<(), Error> {
        if self.0 && code.is_write() {
            warn!(message = "write blocked by safe mode", %code);
            return Err(Error::SafeMode(code));
        }
        Ok(())
    }
}

impl From<bool> for SafeMode {
    fn from(enabled: bool) -> Self {
        Self(enabled)
    }
}

#[derive(Clone)]
pub struct Options {
    /// Defaults to [`crate::connection::DEFAULT_DIAL_TIMEOUT`] when unset or zero.
    pub dial_timeout: Option<Duration>,
    /// Deadline for one complete exchange. `None` waits forever.
    pub exchange_timeout: Option<Duration>,
    pub safe_mode: bool,
    /// Wait for a `[3002, value]` echo after every parameter write.
    ///
    /// Off by default: parameter writes are send-only and the caller re-reads to observe the
    /// result. Turn this on for firmware that answers writes, or the unread echo will break the
    /// next exchange.
    pub acknowledged_writes: bool,
    pub on_connect: Option<ConnectCallback>,
    pub exchange_lock: ExchangeLock,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dial_timeout: None,
            exchange_timeout: Some(DEFAULT_EXCHANGE_TIMEOUT),
            safe_mode: false,
            acknowledged_writes: false,
            on_connect: None,
            exchange_lock: ExchangeLock::process_wide(),
        }
    }
}

/// Client for a single controller.
pub struct Client {
    connection: Connection,
    lock: ExchangeLock,
    safe_mode: SafeMode,
    acknowledged_writes: bool,
    exchange_timeout: Option<Duration>,
}

async fn within<T>(
    limit: Option<Duration>,
    code: CommandCode,
    work: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    match limit {
        None => work.await,
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .unwrap_or_else(|_| Err(Error::Timeout(code, limit))),
    }
}

impl Client {
    pub fn new(endpoint: Endpoint, options: Options) -> Self {
        let Options {
            dial_timeout,
            exchange_timeout,
            safe_mode,
            acknowledged_writes,
            on_connect,
            exchange_lock,
        } = options;
        Self {
            connection: Connection::new(endpoint, dial_timeout, on_connect),
            lock: exchange_lock,
            safe_mode: safe_mode.into(),
            acknowledged_writes,
            exchange_timeout,
        }
    }

    /// Parse `host[:port]` and create a client for it.
    pub fn with_address(address: &str, options: Options) -> Result<Self, Error> {
        Ok(Self::new(address.parse()?, options))
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.connection.endpoint()
    }

    pub fn safe_mode(&self) -> SafeMode {
        self.safe_mode
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn connect(&mut self) -> Result<(), Error> {
        self.connection.connect().await
    }

    pub async fn close(&mut self) -> Result<(), Error> {
        self.connection.close().await
    }

    pub async fn read_parameters(&mut self, table: &mut RegisterTable) -> Result<(), Error> {
        self.read_family(Family::Parameters, table).await
    }

    pub async fn read_calculations(&mut self, table: &mut RegisterTable) -> Result<(), Error> {
        self.read_family(Family::Calculations, table).await
    }

    pub async fn read_visibilities(&mut self, table: &mut RegisterTable) -> Result<(), Error> {
        self.read_family(Family::Visibilities, table).await
    }

    async fn read_family(
        &mut self,
        requested: Family,
        table: &mut RegisterTable,
    ) -> Result<(), Error> {
        if table.family() != requested {
            return Err(Error::WrongFamily { requested, table: table.family() });
        }
        self.read_from_controller(table).await
    }

    /// Read the table's family from the controller and store the values in `table`.
    ///
    /// On any failure the table keeps its previous values.
    pub async fn read_from_controller(&mut self, table: &mut RegisterTable) -> Result<(), Error> {
        let family = table.family();
        let response = self.exchange(Request::read(family.read_command())).await?;
        if let Some(status) = response.status {
            trace!(message = "calculation status", status);
        }
        table.set_raw_values(&response.values).map_err(|e| Error::Table(e, family))?;
        debug!(
            message = "stored a read",
            %family,
            count = response.values.len(),
            changed = table.changed().count()
        );
        Ok(())
    }

    /// Set a single parameter on the controller.
    ///
    /// This does not read the parameter back; use [`Client::read_parameters`] to observe the
    /// value the controller actually accepted.
    pub async fn write_parameter(&mut self, id: i32, value: i32) -> Result<(), Error> {
        self.write_parameters(&[(id, value)]).await
    }

    /// Set several parameters with one `[3002, id0, value0, id1, value1, ...]` frame.
    ///
    /// With [`Options::acknowledged_writes`] every pair is sent as its own frame instead, and its
    /// echo is consumed before the next one goes out.
    pub async fn write_parameters(&mut self, pairs: &[(i32, i32)]) -> Result<(), Error> {
        self.safe_mode.check(CommandCode::ParametersWrite)?;
        if pairs.is_empty() {
            return Ok(());
        }
        if !self.acknowledged_writes {
            self.send(Request::write_parameters(pairs)).await?;
            debug!(message = "parameters written", ?pairs);
            return Ok(());
        }
        for &(id, value) in pairs {
            let response = self.exchange(Request::write_parameter(id, value)).await?;
            debug!(message = "parameter written", id, value, acknowledged = ?response.values);
        }
        Ok(())
    }

    /// Send `[code, values...]` without consuming any response.
    ///
    /// Only write commands are accepted; a read sent this way would leave its response on the
    /// stream.
    pub async fn write(&mut self, code: CommandCode, values: &[i32]) -> Result<(), Error> {
        if !code.is_write() {
            return Err(Error::NotAWrite(code));
        }
        self.safe_mode.check(code)?;
        self.send(Request::new(code, values.to_vec())).await
    }

    async fn send(&mut self, request: Request) -> Result<(), Error> {
        let code = request.code;
        let _guard = self.lock.acquire().await;
        let io = self.connection.io()?;
        debug!(message = "sending", %code, payload = ?request.payload);
        let result = within(self.exchange_timeout, code, async {
            io.send(&request).await.map_err(|e| Error::Send(e, code))
        })
        .await;
        if result.is_err() {
            self.connection.discard();
        }
        result
    }

    async fn exchange(&mut self, request: Request) -> Result<Response, Error> {
        let code = request.code;
        let _guard = self.lock.acquire().await;
        let io = self.connection.io()?;
        if !io.read_buffer().is_empty() {
            warn!(message = "discarding stale bytes", count = io.read_buffer().len());
            io.read_buffer_mut().clear();
        }
        io.codec_mut().await_response(code);
        debug!(message = "exchange", %code, payload = ?request.payload);
        let result = within(self.exchange_timeout, code, async {
            io.send(&request).await.map_err(|e| Error::Send(e, code))?;
            match io.next().await {
                Some(Ok(response)) => Ok(response),
                Some(Err(e)) => Err(Error::Receive(e, code)),
                None => Err(Error::ConnectionClosed(code)),
            }
        })
        .await;
        if result.is_err() {
            self.connection.discard();
        }
        result
    }
}
