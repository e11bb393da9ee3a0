//! In-memory null-modem backend.
//!
//! [`LoopbackOpener`] connects named ports in pairs. Bytes written on one end
//! are delivered, in order, to reads on the other end. Faults can be scheduled
//! per port and per open (the Nth time a port is opened is the Nth session it
//! takes part in), which lets a campaign be scripted end to end without
//! hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use super::{LinkError, LinkResult, LinkSettings, PortHandle, PortOpener};

// ---------------------------------------------------------------------------
// Fault
// ---------------------------------------------------------------------------

/// A misbehaviour injected into one port for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `open` fails.
    FailOpen,
    /// The Nth `write` call (1-based) fails with an I/O error.
    FailWrite { on_call: usize },
    /// The Nth `read` call (1-based) fails with an I/O error.
    FailRead { on_call: usize },
    /// Every Nth byte written by this port is lost on the wire.
    DropEvery(u64),
    /// Adjacent chunks written by this port arrive in swapped order.
    SwapChunks,
    /// Reads on this port never return data.
    Silent,
    /// The Nth `write` call (1-based) panics inside the owning task.
    PanicOnWrite { on_call: usize },
}

// ---------------------------------------------------------------------------
// Shared wiring state
// ---------------------------------------------------------------------------

type Chunk = Vec<u8>;

/// One direction of a link. Each end takes its half when opened; a half that
/// has already been taken is replaced by a fresh channel so every session
/// starts on a clean wire.
#[derive(Default)]
struct Wire {
    tx: Option<UnboundedSender<Chunk>>,
    rx: Option<UnboundedReceiver<Chunk>>,
}

#[derive(Default)]
struct Wiring {
    peers: HashMap<String, String>,
    /// Keyed by (writer, reader).
    wires: HashMap<(String, String), Wire>,
    opens: HashMap<String, usize>,
    faults: HashMap<(String, usize), Fault>,
}

impl Wiring {
    fn take_tx(&mut self, from: &str, to: &str) -> UnboundedSender<Chunk> {
        let wire = self
            .wires
            .entry((from.to_string(), to.to_string()))
            .or_default();
        if let Some(tx) = wire.tx.take() {
            return tx;
        }
        let (tx, rx) = unbounded_channel();
        *wire = Wire { tx: None, rx: Some(rx) };
        tx
    }

    fn take_rx(&mut self, from: &str, to: &str) -> UnboundedReceiver<Chunk> {
        let wire = self
            .wires
            .entry((from.to_string(), to.to_string()))
            .or_default();
        if let Some(rx) = wire.rx.take() {
            return rx;
        }
        let (tx, rx) = unbounded_channel();
        *wire = Wire { tx: Some(tx), rx: None };
        rx
    }
}

type CloseCounts = Arc<Mutex<HashMap<String, usize>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// LoopbackOpener
// ---------------------------------------------------------------------------

/// Opens in-memory ports connected by [`LoopbackOpener::link`].
#[derive(Clone, Default)]
pub struct LoopbackOpener {
    wiring: Arc<Mutex<Wiring>>,
    closes: CloseCounts,
}

impl LoopbackOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an opener that links `dut[i]` with `aux[i]`.
    pub fn with_topology(dut: &[String], aux: &[String]) -> Self {
        let opener = Self::new();
        for (d, a) in dut.iter().zip(aux) {
            opener.link(d, a);
        }
        opener
    }

    /// Connect two ports with a null-modem wire.
    pub fn link(&self, a: &str, b: &str) {
        let mut wiring = lock(&self.wiring);
        wiring.peers.insert(a.to_string(), b.to_string());
        wiring.peers.insert(b.to_string(), a.to_string());
    }

    /// Schedule `fault` for the `session`-th open (1-based) of `port`.
    pub fn inject(&self, port: &str, session: usize, fault: Fault) {
        lock(&self.wiring)
            .faults
            .insert((port.to_string(), session), fault);
    }

    /// Number of times `port` has been opened.
    pub fn open_count(&self, port: &str) -> usize {
        lock(&self.wiring).opens.get(port).copied().unwrap_or(0)
    }

    /// Number of times a handle for `port` has been closed.
    pub fn close_count(&self, port: &str) -> usize {
        lock(&self.closes).get(port).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl PortOpener for LoopbackOpener {
    async fn open(&self, name: &str, settings: &LinkSettings) -> LinkResult<Box<dyn PortHandle>> {
        let mut wiring = lock(&self.wiring);

        let peer = wiring
            .peers
            .get(name)
            .cloned()
            .ok_or_else(|| LinkError::Open {
                port: name.to_string(),
                reason: "no loopback link configured".to_string(),
            })?;

        let session = {
            let count = wiring.opens.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let fault = wiring.faults.get(&(name.to_string(), session)).copied();

        if fault == Some(Fault::FailOpen) {
            return Err(LinkError::Open {
                port: name.to_string(),
                reason: "injected open failure".to_string(),
            });
        }

        let tx = wiring.take_tx(name, &peer);
        let rx = wiring.take_rx(&peer, name);

        debug!(port = name, peer = peer.as_str(), session, baud = settings.baud, ?fault, "loopback port opened");

        Ok(Box::new(LoopbackPort {
            name: name.to_string(),
            tx: Some(tx),
            rx: Some(rx),
            pending: VecDeque::new(),
            fault,
            writes: 0,
            reads: 0,
            bytes_written: 0,
            held: None,
            closed: false,
            closes: self.closes.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// LoopbackPort
// ---------------------------------------------------------------------------

pub struct LoopbackPort {
    name: String,
    tx: Option<UnboundedSender<Chunk>>,
    rx: Option<UnboundedReceiver<Chunk>>,
    pending: VecDeque<u8>,
    fault: Option<Fault>,
    writes: usize,
    reads: usize,
    bytes_written: u64,
    held: Option<Chunk>,
    closed: bool,
    closes: CloseCounts,
}

impl LoopbackPort {
    fn closed_error(&self) -> LinkError {
        LinkError::Closed {
            port: self.name.clone(),
        }
    }

    fn injected(&self, what: &str) -> LinkError {
        LinkError::io(
            &self.name,
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, format!("injected {what} failure")),
        )
    }

    fn deliver(&self, chunk: Chunk) {
        if chunk.is_empty() {
            return;
        }
        // A wire with nobody listening swallows bytes, like a real line.
        if let Some(tx) = &self.tx {
            let _ = tx.send(chunk);
        }
    }

    fn drain_pending(&mut self, max: usize) -> Vec<u8> {
        let n = max.max(1).min(self.pending.len());
        self.pending.drain(..n).collect()
    }
}

#[async_trait::async_trait]
impl PortHandle for LoopbackPort {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, bytes: &[u8]) -> LinkResult<usize> {
        if self.closed {
            return Err(self.closed_error());
        }
        self.writes += 1;

        let mut chunk = Vec::with_capacity(bytes.len());
        match self.fault {
            Some(Fault::FailWrite { on_call }) if on_call == self.writes => {
                return Err(self.injected("write"));
            }
            Some(Fault::PanicOnWrite { on_call }) if on_call == self.writes => {
                panic!("injected panic writing to {}", self.name);
            }
            Some(Fault::DropEvery(n)) if n > 0 => {
                for &b in bytes {
                    self.bytes_written += 1;
                    if self.bytes_written % n != 0 {
                        chunk.push(b);
                    }
                }
            }
            _ => chunk.extend_from_slice(bytes),
        }

        if self.fault == Some(Fault::SwapChunks) {
            match self.held.take() {
                None => self.held = Some(chunk),
                Some(previous) => {
                    self.deliver(chunk);
                    self.deliver(previous);
                }
            }
        } else {
            self.deliver(chunk);
        }

        Ok(bytes.len())
    }

    async fn read(&mut self, max: usize, timeout: Duration) -> LinkResult<Vec<u8>> {
        if self.closed {
            return Err(self.closed_error());
        }
        self.reads += 1;

        match self.fault {
            Some(Fault::FailRead { on_call }) if on_call == self.reads => {
                return Err(self.injected("read"));
            }
            Some(Fault::Silent) => {
                tokio::time::sleep(timeout).await;
                return Ok(Vec::new());
            }
            _ => {}
        }

        if !self.pending.is_empty() {
            return Ok(self.drain_pending(max));
        }

        let received = match self.rx.as_mut() {
            Some(rx) => tokio::time::timeout(timeout, rx.recv()).await,
            None => return Err(self.closed_error()),
        };

        match received {
            Ok(Some(chunk)) => {
                self.pending.extend(chunk);
                if let Some(rx) = self.rx.as_mut() {
                    while let Ok(more) = rx.try_recv() {
                        self.pending.extend(more);
                    }
                }
                Ok(self.drain_pending(max))
            }
            Ok(None) => {
                // Peer hung up; the line just goes quiet.
                tokio::time::sleep(timeout).await;
                Ok(Vec::new())
            }
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(held) = self.held.take() {
            self.deliver(held);
        }
        self.tx = None;
        self.rx = None;
        *lock(&self.closes).entry(self.name.clone()).or_insert(0) += 1;
        debug!(port = self.name.as_str(), "loopback port closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
