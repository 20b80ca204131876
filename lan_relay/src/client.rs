// TCP driver for the client role, with automatic reconnect.
//
// One actor thread owns the connection. It loops:
//
//   connect -> announce -> pump until the link drops -> wait -> connect ...
//
// until the application disconnects on purpose. While connected, a reader
// thread forwards every inbound frame as `ClientEvent::Received`, tagged with
// the session handle of the connection it belongs to, so frames or closes
// from a previous connection that arrive late are recognized and dropped.
//
// All engine calls happen on the actor thread. The engine sits behind a
// `Mutex` only so `Relay` can read the local ID, phase and roster.
//
// Frame writes carry the configured write timeout, so a server that stops
// reading counts as a write failure instead of wedging the actor.
//
// Unintended drops (server gone, write failure, refused connect) always lead
// to another attempt after `reconnect_delay`; there is no attempt limit. An
// intentional disconnect sets the `intentional` flag before waking the actor,
// so a drop racing with it never schedules a retry.

use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lan_relay_protocol::{SessionHandle, decode_batch, encode_batch, read_frame, write_frame};
use tracing::{debug, error, info, warn};

use crate::client_engine::ClientEngine;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::event::{RelayEvent, emit_all};

enum ClientEvent {
    /// An application send, already encoded.
    Send { bytes: Vec<u8> },
    Disconnect,
    Received { session: SessionHandle, bytes: Vec<u8> },
    Closed { session: SessionHandle },
}

/// Whether the actor should try again after a connection ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Retry,
    Stop,
}

/// Control handle for a running client. Dropping it disconnects.
pub(crate) struct ClientHandle {
    engine: Arc<Mutex<ClientEngine>>,
    intentional: Arc<AtomicBool>,
    tx: Sender<ClientEvent>,
    actor: Option<JoinHandle<()>>,
}

impl ClientHandle {
    /// Start connecting to `addr` as `desired`. Returns immediately; the
    /// outcome arrives as `RelayEvent::Connected` (or not at all while the
    /// server is unreachable).
    pub(crate) fn start(
        desired: String,
        addr: SocketAddr,
        config: &RelayConfig,
        events: Sender<RelayEvent>,
    ) -> Self {
        let engine = Arc::new(Mutex::new(ClientEngine::new(desired)));
        let intentional = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let actor = ClientActor {
            addr,
            connect_timeout: config.connect_timeout(),
            reconnect_delay: config.reconnect_delay(),
            write_timeout: config.write_timeout(),
            engine: engine.clone(),
            intentional: intentional.clone(),
            tx: tx.clone(),
            rx,
            events,
        };
        let actor = thread::spawn(move || actor.run());

        Self {
            engine,
            intentional,
            tx,
            actor: Some(actor),
        }
    }

    pub(crate) fn engine(&self) -> MutexGuard<'_, ClientEngine> {
        lock(&self.engine)
    }

    /// Queue an encoded batch for the server.
    pub(crate) fn send(&self, bytes: Vec<u8>) -> Result<(), RelayError> {
        if !self.engine().is_connected() {
            warn!(role = "client", "not connected, dropping outbound message");
            return Err(RelayError::NotConnected);
        }
        self.tx
            .send(ClientEvent::Send { bytes })
            .map_err(|_| RelayError::WorkerGone)
    }

    /// Close the connection and wait until the transport is down. No
    /// reconnect follows.
    pub(crate) fn disconnect(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.intentional.store(true, Ordering::SeqCst);
        let _ = self.tx.send(ClientEvent::Disconnect);
        if let Some(handle) = self.actor.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(engine: &Mutex<ClientEngine>) -> MutexGuard<'_, ClientEngine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

fn reader_loop(mut reader: BufReader<TcpStream>, session: SessionHandle, tx: Sender<ClientEvent>) {
    loop {
        match read_frame(&mut reader) {
            Ok(bytes) => {
                if tx.send(ClientEvent::Received { session, bytes }).is_err() {
                    return;
                }
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    debug!(role = "client", %session, error = %e, "read from server failed");
                }
                let _ = tx.send(ClientEvent::Closed { session });
                return;
            }
        }
    }
}

struct ClientActor {
    addr: SocketAddr,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    write_timeout: Duration,
    engine: Arc<Mutex<ClientEngine>>,
    intentional: Arc<AtomicBool>,
    tx: Sender<ClientEvent>,
    rx: Receiver<ClientEvent>,
    events: Sender<RelayEvent>,
}

impl ClientActor {
    fn run(self) {
        let mut attempt: u64 = 0;
        while !self.intentional.load(Ordering::SeqCst) {
            attempt += 1;
            let flow = match TcpStream::connect_timeout(&self.addr, self.connect_timeout) {
                Ok(stream) => {
                    attempt = 0;
                    self.run_connection(stream)
                }
                Err(e) => {
                    warn!(role = "client", addr = %self.addr, attempt, error = %e, "connect failed");
                    lock(&self.engine).on_transport_error();
                    Flow::Retry
                }
            };
            if flow == Flow::Stop || self.wait_before_retry() == Flow::Stop {
                break;
            }
            info!(role = "client", addr = %self.addr, "reconnecting");
        }

        let events = lock(&self.engine).on_disconnected();
        emit_all(&self.events, events);
        info!(role = "client", addr = %self.addr, "client stopped");
    }

    /// Drive one established connection until it ends.
    fn run_connection(&self, stream: TcpStream) -> Flow {
        if let Err(e) = stream.set_write_timeout(Some(self.write_timeout)) {
            warn!(role = "client", addr = %self.addr, error = %e, "failed to set write timeout");
            return Flow::Retry;
        }
        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!(role = "client", addr = %self.addr, error = %e, "failed to clone server stream");
                return Flow::Retry;
            }
        };
        let _ = stream.set_nodelay(true);

        let session = SessionHandle::new();
        let tx = self.tx.clone();
        let reader = thread::spawn(move || reader_loop(BufReader::new(reader_stream), session, tx));
        let mut writer = BufWriter::new(stream);

        let (announce, events) = lock(&self.engine).on_connected(session);
        debug!(role = "client", addr = %self.addr, %session, "announcing");
        emit_all(&self.events, events);
        match encode_batch(&[announce]) {
            Ok(bytes) => self.write(&mut writer, &bytes),
            Err(e) => error!(role = "client", error = %e, "failed to encode announcement"),
        }

        let flow = loop {
            match self.rx.recv() {
                Ok(ClientEvent::Send { bytes }) => self.write(&mut writer, &bytes),
                Ok(ClientEvent::Disconnect) | Err(_) => break Flow::Stop,
                Ok(ClientEvent::Received { session: from, bytes }) if from == session => {
                    match decode_batch(&bytes) {
                        Ok(messages) => {
                            // Emit under the lock so readers never see the
                            // new state without its events queued.
                            let mut engine = lock(&self.engine);
                            let events = engine.process_batch(messages);
                            emit_all(&self.events, events);
                        }
                        Err(e) => warn!(role = "client", error = %e, "dropping undecodable batch"),
                    }
                }
                Ok(ClientEvent::Closed { session: from }) if from == session => {
                    info!(role = "client", addr = %self.addr, "connection to server lost");
                    break Flow::Retry;
                }
                Ok(ClientEvent::Received { .. } | ClientEvent::Closed { .. }) => {
                    debug!(role = "client", "stale event from a previous connection");
                }
            }
        };

        // Shutting the socket down unblocks the reader.
        let _ = writer.get_ref().shutdown(Shutdown::Both);
        let _ = reader.join();
        let events = lock(&self.engine).on_disconnected();
        emit_all(&self.events, events);
        flow
    }

    fn write(&self, writer: &mut BufWriter<TcpStream>, bytes: &[u8]) {
        if let Err(e) = write_frame(writer, bytes) {
            error!(role = "client", addr = %self.addr, error = %e, "write to server failed, dropping connection");
            lock(&self.engine).on_transport_error();
            // The reader sees the shutdown and reports the close.
            let _ = writer.get_ref().shutdown(Shutdown::Both);
        }
    }

    /// Sleep out the reconnect delay, staying responsive to a disconnect.
    fn wait_before_retry(&self) -> Flow {
        let deadline = Instant::now() + self.reconnect_delay;
        loop {
            if self.intentional.load(Ordering::SeqCst) {
                return Flow::Stop;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Flow::Retry;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(ClientEvent::Disconnect) | Err(RecvTimeoutError::Disconnected) => {
                    return Flow::Stop;
                }
                Ok(ClientEvent::Send { .. }) => {
                    warn!(role = "client", "not connected, dropping outbound message");
                }
                Ok(ClientEvent::Received { .. } | ClientEvent::Closed { .. }) => {}
                Err(RecvTimeoutError::Timeout) => return Flow::Retry,
            }
        }
    }
}
