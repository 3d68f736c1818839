//! Client for the privileged companion process running on the device.
//!
//! Every request is a 12 byte header (4 byte ASCII command and the payload
//! length as 8 lowercase hex digits) followed by a JSON payload. Responses
//! use the same header with a `GOOD` or `FAIL` status in place of the
//! command, and a failed response body is always `{"err": "..."}`.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::adb::Adb;
use crate::command::quote;
use crate::config::CompanionSettings;
use crate::model::{ComponentDescriptor, ComponentName, ComponentType, EnabledState};

const HEX_BYTES: &[u8; 16] = b"0123456789abcdef";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("server error: {0}")]
    ServerError(String),

    #[error("io error: {0}")]
    IO(io::Error),

    #[error("the server returned an invalid response")]
    InvalidResponse,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("the companion did not answer in time")]
    Timeout,

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            // Read timeouts surface as WouldBlock on unix
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::IO(value),
        }
    }
}

impl From<Error> for crate::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Timeout => Self::Timeout("companion request".into()),
            Error::IO(e) => Self::IO(e),
            e => Self::Generic(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

impl Error {
    /// Whether the connection can't be trusted for another request
    fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::IO(_) | Self::InvalidResponse | Self::Connect(_) | Self::Timeout
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("failed to connect to {addr}:{port}: {err}")]
    ConnectFailed {
        addr: String,
        port: u16,
        err: io::Error,
    },

    #[error("companion {0} is not running")]
    NotRunning(String),

    #[error("failed to forward port {0}: {1}")]
    ForwardFailed(u16, String),
}

pub const fn pack(a: char, b: char, c: char, d: char) -> u32 {
    (((a as u32) & 0xFF) << 24)
        | (((b as u32) & 0xFF) << 16)
        | (((c as u32) & 0xFF) << 8)
        | ((d as u32) & 0xFF)
}

#[repr(u32)]
#[derive(Debug, Clone, Copy)]
pub enum Command {
    Ping = pack('p', 'i', 'n', 'g'),
    SetComponent = pack('c', 'm', 'p', 's'),
    GetComponent = pack('c', 'm', 'p', 'g'),
    ListComponents = pack('c', 'm', 'p', 'l'),
}

#[repr(u32)]
enum Status {
    Ok = pack('G', 'O', 'O', 'D'),
    Fail = pack('F', 'A', 'I', 'L'),
}

impl Status {
    fn from_bytes(bytes: [u8; 4]) -> Result<Self> {
        let as_u32 = u32::from_be_bytes(bytes);
        if as_u32 == (Status::Ok as u32) {
            return Ok(Status::Ok);
        } else if as_u32 == (Status::Fail as u32) {
            return Ok(Status::Fail);
        }
        Err(Error::InvalidResponse)
    }
}

fn encode_header(into: &mut [u8; 12], cmd: u32, payload_len: u32) {
    let mut idx = 0;
    let mut shift = 28;
    for b in cmd.to_be_bytes() {
        into[idx] = b;
        idx += 1;
    }
    for _ in 0..8 {
        let sel = (payload_len >> shift) & 0xF;
        into[idx] = HEX_BYTES[sel as usize];
        shift -= 4;
        idx += 1;
    }
}

#[cfg_attr(test, derive(Debug))]
#[derive(Deserialize)]
struct ServerError {
    err: String,
}

#[derive(Serialize)]
struct ComponentRequest<'a> {
    package: &'a str,
    class: &'a str,
    #[serde(rename = "type")]
    kind: ComponentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
}

impl<'a> ComponentRequest<'a> {
    fn new(component: &'a ComponentName, enabled: Option<bool>) -> Self {
        Self {
            package: &component.package,
            class: &component.class,
            kind: component.kind,
            enabled,
        }
    }
}

#[derive(Serialize)]
struct ListRequest<'a> {
    package: &'a str,
    #[serde(rename = "type")]
    kind: ComponentType,
}

#[derive(Deserialize)]
struct PingResponse {
    version: String,
}

#[derive(Deserialize)]
struct EnabledResponse {
    enabled: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedComponent {
    name: String,
    #[serde(default)]
    exported: bool,
    #[serde(default)]
    enabled_state: EnabledState,
    #[serde(default)]
    running: bool,
}

#[derive(Deserialize)]
struct ListResponse {
    components: Vec<ListedComponent>,
}

/// Anything the client can talk over
pub trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}

/// A single connection to the companion
pub struct CompanionClient {
    stream: Box<dyn Stream>,
}

impl CompanionClient {
    pub fn new(stream: Box<dyn Stream>) -> Self {
        Self { stream }
    }

    /// Connect over TCP. Every read and write on the connection gives up
    /// after `timeout`.
    pub fn connect(
        addr: &str,
        port: u16,
        timeout: Duration,
    ) -> std::result::Result<Self, ConnectError> {
        let ip = addr
            .parse::<Ipv4Addr>()
            .map_err(|_| ConnectError::InvalidAddress(addr.to_string()))?;
        let addr = SocketAddr::new(ip.into(), port);
        let failed = |err| ConnectError::ConnectFailed {
            addr: addr.ip().to_string(),
            port,
            err,
        };
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(failed)?;
        stream.set_read_timeout(Some(timeout)).map_err(failed)?;
        stream.set_write_timeout(Some(timeout)).map_err(failed)?;
        Ok(Self::new(Box::new(stream)))
    }

    pub fn ping(&mut self) -> Result<String> {
        let res: PingResponse = self.transact(Command::Ping, &serde_json::json!({}))?;
        Ok(res.version)
    }

    pub fn set_component_enabled(&mut self, component: &ComponentName, enabled: bool) -> Result<()> {
        self.send_command(
            Command::SetComponent,
            &ComponentRequest::new(component, Some(enabled)),
        )?;
        Ok(())
    }

    pub fn component_enabled(&mut self, component: &ComponentName) -> Result<bool> {
        let res: EnabledResponse = self.transact(
            Command::GetComponent,
            &ComponentRequest::new(component, None),
        )?;
        Ok(res.enabled)
    }

    /// Every declared component of the given kind, as the platform knows it
    pub fn list_components(
        &mut self,
        package: &str,
        kind: ComponentType,
    ) -> Result<Vec<ComponentDescriptor>> {
        let res: ListResponse =
            self.transact(Command::ListComponents, &ListRequest { package, kind })?;
        Ok(res
            .components
            .into_iter()
            .map(|it| ComponentDescriptor {
                package_name: package.into(),
                name: crate::model::resolve_class_name(package, &it.name),
                kind,
                exported: it.exported,
                enabled_state: it.enabled_state,
                is_running: kind == ComponentType::Service && it.running,
            })
            .collect())
    }

    pub fn send_command<T: Serialize + ?Sized>(
        &mut self,
        cmd: Command,
        payload: &T,
    ) -> Result<String> {
        let serialized = serde_json::to_string(payload)?;
        let as_bytes = serialized.as_bytes();
        let len = u32::try_from(as_bytes.len())
            .map_err(|_| Error::InvalidInput("payload too large".into()))?;
        let mut header = [0u8; 12];
        encode_header(&mut header, cmd as u32, len);
        log::debug!("sending header {:?}", header);
        self.stream.write_all(header.as_slice())?;
        log::debug!("sending payload: {}", serialized);
        self.stream.write_all(as_bytes)?;
        self.stream.flush()?;
        self.read_response()
    }

    pub fn transact<T: Serialize + ?Sized, R: DeserializeOwned>(
        &mut self,
        cmd: Command,
        payload: &T,
    ) -> Result<R> {
        let res = self.send_command(cmd, payload)?;
        serde_json::from_str(&res).map_err(|e| {
            log::error!("error decoding response {}: {:?}", res, e);
            Error::InvalidResponse
        })
    }

    fn read_response(&mut self) -> Result<String> {
        let mut header = [0u8; 12];
        self.stream.read_exact(header.as_mut_slice())?;
        log::trace!("header: {:?}", header);
        let stat = Status::from_bytes([header[0], header[1], header[2], header[3]])?;

        let len_str = std::str::from_utf8(&header[4..]).map_err(|e| {
            log::error!("getting len str {:?} {:?}", &header[4..], e);
            Error::InvalidResponse
        })?;
        let len = u32::from_str_radix(len_str, 16).map_err(|e| {
            log::error!("parsing len str {} {:?}", len_str, e);
            Error::InvalidResponse
        })?;

        log::trace!("reading {} bytes from server", len);
        let mut raw = vec![0u8; len as usize];
        self.stream.read_exact(&mut raw)?;
        let data = String::from_utf8(raw).map_err(|_| Error::InvalidResponse)?;

        if let Status::Fail = stat {
            let err: ServerError = serde_json::from_str(&data).map_err(|e| {
                log::error!("error response {} wasn't valid {:?}", data, e);
                Error::InvalidResponse
            })?;
            return Err(Error::ServerError(err.err));
        }
        log::debug!("json response: {}", data);
        Ok(data)
    }
}

/// Opens new connections to the companion
pub trait CompanionConnect: Send + Sync {
    fn connect(&self) -> std::result::Result<CompanionClient, ConnectError>;
}

/// Connects through an `adb forward` of the companion's port, after checking
/// the companion process is alive
pub struct AdbCompanionConnect {
    adb: Arc<dyn Adb>,
    package: String,
    port: u16,
    timeout: Duration,
}

impl AdbCompanionConnect {
    pub fn new(adb: Arc<dyn Adb>, settings: &CompanionSettings) -> Self {
        Self {
            adb,
            package: settings.package.clone(),
            port: settings.port,
            timeout: settings.timeout,
        }
    }

    fn is_running(&self) -> bool {
        match self.adb.checked_shell(&format!("pidof {}", quote(&self.package))) {
            Ok(out) => out.ok() && !out.stdout_utf8_lossy().trim().is_empty(),
            Err(e) => {
                log::debug!("pidof {} failed: {}", self.package, e);
                false
            }
        }
    }
}

impl CompanionConnect for AdbCompanionConnect {
    fn connect(&self) -> std::result::Result<CompanionClient, ConnectError> {
        if !self.is_running() {
            return Err(ConnectError::NotRunning(self.package.clone()));
        }
        let out = self
            .adb
            .forward_tcp_port(self.port, self.port)
            .map_err(|e| ConnectError::ForwardFailed(self.port, e.to_string()))?;
        if !out.ok() {
            return Err(ConnectError::ForwardFailed(
                self.port,
                out.stderr_utf8_lossy().trim().to_string(),
            ));
        }
        CompanionClient::connect("127.0.0.1", self.port, self.timeout)
    }
}

/// A lazily opened, shared connection. Requests are serialized over the one
/// connection and a connection that failed or timed out is dropped and
/// reopened by the next request. The connection's timeouts bound how long
/// a request holds the lock.
pub struct Companion {
    connector: Box<dyn CompanionConnect>,
    client: Mutex<Option<CompanionClient>>,
}

impl Companion {
    pub fn new(connector: Box<dyn CompanionConnect>) -> Self {
        Self {
            connector,
            client: Mutex::new(None),
        }
    }

    pub fn from_adb(adb: Arc<dyn Adb>, settings: &CompanionSettings) -> Self {
        Self::new(Box::new(AdbCompanionConnect::new(adb, settings)))
    }

    pub fn with_client<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut CompanionClient) -> Result<R>,
    {
        let mut guard = self
            .client
            .lock()
            .map_err(|_| Error::InvalidInput("companion connection lock poisoned".into()))?;
        if guard.is_none() {
            *guard = Some(self.connector.connect()?);
        }
        let client = match guard.as_mut() {
            Some(v) => v,
            None => return Err(Error::InvalidResponse),
        };
        let res = f(client);
        if let Err(e) = &res {
            if e.is_connection_error() {
                log::debug!("dropping companion connection after: {}", e);
                *guard = None;
            }
        }
        res
    }

    pub fn ping(&self) -> Result<String> {
        self.with_client(|c| c.ping())
    }
}
