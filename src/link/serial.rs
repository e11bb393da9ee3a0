//! Physical serial devices via the `serialport` crate.
//!
//! `serialport` is blocking, so every call runs on tokio's blocking pool. The
//! device is moved into the blocking closure and handed back afterwards, which
//! keeps a single owner at all times.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{FlowControl, SerialPort};
use tracing::debug;

use super::{LinkError, LinkResult, LinkSettings, PortHandle, PortOpener};

/// Opens real serial devices (`/dev/tty*`, `COM*`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

#[async_trait::async_trait]
impl PortOpener for SerialOpener {
    async fn open(&self, name: &str, settings: &LinkSettings) -> LinkResult<Box<dyn PortHandle>> {
        let path = name.to_string();
        let s = *settings;
        let flow = if s.xonxoff {
            FlowControl::Software
        } else {
            FlowControl::None
        };

        let opened = tokio::task::spawn_blocking(move || {
            serialport::new(&path, s.baud)
                .timeout(s.read_timeout)
                .flow_control(flow)
                .open()
        })
        .await
        .map_err(|e| LinkError::Worker {
            port: name.to_string(),
            reason: e.to_string(),
        })?;

        let port = opened.map_err(|e| LinkError::Open {
            port: name.to_string(),
            reason: e.to_string(),
        })?;

        debug!(port = name, baud = s.baud, xonxoff = s.xonxoff, "serial port opened");

        Ok(Box::new(SerialPortHandle {
            name: name.to_string(),
            port: Some(port),
            write_timeout: s.write_timeout,
        }))
    }
}

pub struct SerialPortHandle {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    write_timeout: Duration,
}

impl SerialPortHandle {
    /// Run a blocking operation against the device on the blocking pool.
    async fn with_port<T, F>(&mut self, op: F) -> LinkResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn SerialPort>) -> std::io::Result<T> + Send + 'static,
    {
        let mut port = self.port.take().ok_or_else(|| LinkError::Closed {
            port: self.name.clone(),
        })?;

        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut port);
            (port, result)
        })
        .await
        .map_err(|e| LinkError::Worker {
            port: self.name.clone(),
            reason: e.to_string(),
        })?;

        self.port = Some(port);
        result.map_err(|e| LinkError::io(&self.name, e))
    }
}

#[async_trait::async_trait]
impl PortHandle for SerialPortHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, bytes: &[u8]) -> LinkResult<usize> {
        let data = bytes.to_vec();
        let timeout = self.write_timeout;
        self.with_port(move |port| {
            port.set_timeout(timeout)?;
            port.write_all(&data)?;
            Ok(data.len())
        })
        .await
    }

    async fn read(&mut self, max: usize, timeout: Duration) -> LinkResult<Vec<u8>> {
        self.with_port(move |port| {
            port.set_timeout(timeout)?;
            let waiting = port.bytes_to_read()? as usize;
            let mut buf = vec![0u8; waiting.clamp(1, max.max(1))];
            match port.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    Ok(buf)
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn close(&mut self) {
        if let Some(port) = self.port.take() {
            drop(port);
            debug!(port = self.name.as_str(), "serial port closed");
        }
    }
}
