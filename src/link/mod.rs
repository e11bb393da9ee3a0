//! Port handle boundary: the abstract duplex byte stream the stress engine
//! drives, plus the two backends that produce it.
//!
//! The engine never touches a device directly. It asks a [`PortOpener`] for a
//! [`PortHandle`] by name and only ever calls `write`, `read` and `close` on
//! it. [`serial::SerialOpener`] talks to real devices through the
//! `serialport` crate; [`loopback::LoopbackOpener`] wires named ports together
//! in memory and can inject faults.

pub mod loopback;
pub mod serial;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{Backend, LinkConfig, PortsConfig};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("I/O error on port {port}: {source}")]
    Io {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("port {port} is closed")]
    Closed { port: String },

    #[error("blocking I/O task for port {port} failed: {reason}")]
    Worker { port: String, reason: String },
}

impl LinkError {
    pub fn io(port: &str, source: std::io::Error) -> Self {
        LinkError::Io {
            port: port.to_string(),
            source,
        }
    }
}

pub type LinkResult<T> = Result<T, LinkError>;

/// Settings every port in a campaign is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub xonxoff: bool,
}

impl LinkSettings {
    pub fn new(baud: u32, link: &LinkConfig) -> Self {
        Self {
            baud,
            read_timeout: Duration::from_millis(link.read_timeout_ms),
            write_timeout: Duration::from_millis(link.write_timeout_ms),
            xonxoff: link.xonxoff,
        }
    }
}

/// An opened duplex byte stream.
///
/// A handle is owned by exactly one task. `close` must be called once on
/// every exit path; calling it again is a no-op.
#[async_trait::async_trait]
pub trait PortHandle: Send {
    /// Name the port was opened under.
    fn name(&self) -> &str;

    /// Write the whole buffer, returning the number of bytes written.
    async fn write(&mut self, bytes: &[u8]) -> LinkResult<usize>;

    /// Read whatever is available, at most `max` bytes and at least one.
    ///
    /// Returns an empty vector when nothing arrived within `timeout`. A
    /// timeout is not an error.
    async fn read(&mut self, max: usize, timeout: Duration) -> LinkResult<Vec<u8>>;

    /// Release the underlying device.
    async fn close(&mut self);
}

/// Opens named ports.
#[async_trait::async_trait]
pub trait PortOpener: Send + Sync {
    async fn open(&self, name: &str, settings: &LinkSettings) -> LinkResult<Box<dyn PortHandle>>;
}

/// Opener for the configured backend. The loopback backend wires `dut[i]` to
/// `aux[i]`.
pub fn opener_for(ports: &PortsConfig) -> Arc<dyn PortOpener> {
    match ports.backend {
        Backend::Serial => Arc::new(serial::SerialOpener),
        Backend::Loopback => Arc::new(loopback::LoopbackOpener::with_topology(
            &ports.dut,
            &ports.aux,
        )),
    }
}

/// A DUT port and the AUX port that should receive everything it sends.
pub struct PortPair {
    pub dut_name: String,
    pub aux_name: String,
    pub dut: Box<dyn PortHandle>,
    pub aux: Box<dyn PortHandle>,
}

impl PortPair {
    /// Open both ends of a pair. If the AUX side fails the already-opened DUT
    /// handle is closed before the error is returned.
    pub async fn open(
        opener: &dyn PortOpener,
        dut_name: &str,
        aux_name: &str,
        settings: &LinkSettings,
    ) -> LinkResult<Self> {
        tracing::debug!(port = dut_name, "opening DUT port");
        let mut dut = opener.open(dut_name, settings).await?;
        tracing::debug!(port = aux_name, "opening AUX port");
        let aux = match opener.open(aux_name, settings).await {
            Ok(aux) => aux,
            Err(e) => {
                dut.close().await;
                return Err(e);
            }
        };
        tracing::debug!(dut = dut_name, aux = aux_name, "port pair opened");

        Ok(Self {
            dut_name: dut_name.to_string(),
            aux_name: aux_name.to_string(),
            dut,
            aux,
        })
    }

    pub async fn close(mut self) {
        self.dut.close().await;
        self.aux.close().await;
    }
}
