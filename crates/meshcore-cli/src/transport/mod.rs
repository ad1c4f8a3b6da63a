//! Transport capability.
//!
//! A [`Connector`] opens a link to the radio and returns a [`Transport`]
//! for sending. Inbound frames are pushed to a [`FrameSink`] from the
//! transport's own task, independently of whatever the executor is doing.

use std::fmt;
use std::sync::Arc;

use crate::error::{ConnectError, LinkError};

mod stream;

pub use stream::{StreamConnector, StreamTransport};

/// Receiver of inbound frames.
pub trait FrameSink: Send + Sync {
    /// One complete, unframed device frame.
    fn on_frame(&self, frame: &[u8]);

    /// The link dropped underneath us. Not called for a local close.
    fn on_closed(&self, reason: &str);
}

/// An open link to the radio.
pub trait Transport: Send {
    /// Send one command payload. The transport adds its own framing.
    fn send(&mut self, payload: &[u8]) -> Result<(), LinkError>;

    /// Whether the link is still up.
    fn is_connected(&self) -> bool;

    /// Close the link. Idempotent.
    fn close(&mut self);

    /// Human-readable description, for logs.
    fn describe(&self) -> String;
}

/// Opens links. Called again on reconnect.
pub trait Connector: Send {
    /// Open a link whose inbound frames are delivered to `sink`.
    fn connect(&mut self, sink: Arc<dyn FrameSink>) -> Result<Box<dyn Transport>, ConnectError>;

    /// Human-readable description of the target.
    fn describe(&self) -> String;
}

/// Where the radio is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Companion exposed over TCP (WiFi firmware or a bridge).
    Tcp {
        /// Host name or address.
        host: String,
        /// Port.
        port: u16,
    },
    /// USB serial device.
    Serial {
        /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
        path: String,
        /// Baud rate.
        baud: u32,
    },
    /// BLE address.
    Ble(String),
}

impl Target {
    /// Parse a target given as `host`, `host:port`, a device path or a BLE
    /// address.
    pub fn parse(s: &str, default_port: u16, default_baud: u32) -> Result<Target, ConnectError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConnectError::InvalidTarget(s.to_string()));
        }
        if is_ble_address(s) {
            return Ok(Target::Ble(s.to_string()));
        }
        if s.starts_with('/') || s.to_ascii_uppercase().starts_with("COM") {
            return Ok(Target::Serial {
                path: s.to_string(),
                baud: default_baud,
            });
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConnectError::InvalidTarget(s.to_string()))?;
                Ok(Target::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            Some(_) => Err(ConnectError::InvalidTarget(s.to_string())),
            None => Ok(Target::Tcp {
                host: s.to_string(),
                port: default_port,
            }),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Target::Serial { path, .. } => f.write_str(path),
            Target::Ble(address) => f.write_str(address),
        }
    }
}

/// Six colon-separated hex octets.
fn is_ble_address(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}
