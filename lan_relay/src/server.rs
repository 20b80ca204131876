// TCP driver for the server role.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread**: non-blocking `accept()` polled against the
//   `running` flag. Each accepted stream becomes `ServerEvent::NewConnection`.
//   A fatal accept error becomes `ServerEvent::ListenerFailed` (the server's
//   OnError) and ends the thread.
// - **Reader threads** (one per session): `read_frame()` in a loop, each
//   frame forwarded as `ServerEvent::Received`. EOF or a read error sends
//   `ServerEvent::Closed`.
// - **Actor thread**: the only caller into `ServerEngine` and the only writer
//   to session streams. Every transport callback and every application send
//   arrives through the channel, so registry mutations are serialized even
//   though the callbacks come from many threads.
//
// Session writes carry a write timeout. A peer that stops reading fills its
// socket buffer and its next write times out. The actor then drops that
// session and announces the disconnect, so the other sessions and `stop`
// never wait on it.
//
// The engine sits behind a `Mutex` only so `Relay` can read the roster from
// the application thread; the actor is still its sole mutator.
//
// Shutdown: `ServerHandle::stop` clears `running`, wakes the actor with
// `Stop`, and joins both long-lived threads. The actor shuts every session
// socket down on the way out, which unblocks and ends the reader threads. The
// listener is dropped by the time `stop` returns, so the port can be reused
// immediately.

use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lan_relay_protocol::{SessionHandle, decode_batch, encode_batch, read_frame, write_frame};
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::event::{RelayEvent, emit_all};
use crate::server_engine::{ServerEngine, ServerOutput};

/// How often the listener and actor re-check the `running` flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Events funnelled into the actor thread.
enum ServerEvent {
    NewConnection { stream: TcpStream, peer: SocketAddr },
    Received { session: SessionHandle, bytes: Vec<u8> },
    Closed { session: SessionHandle },
    /// An application send, already encoded.
    Multicast { bytes: Vec<u8> },
    ListenerFailed { error: io::Error },
    Stop,
}

/// Control handle for a running server. Dropping it stops the server.
pub(crate) struct ServerHandle {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    engine: Arc<Mutex<ServerEngine>>,
    tx: Sender<ServerEvent>,
    actor: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Take over a bound listener and start serving on it.
    pub(crate) fn start(
        listener: TcpListener,
        write_timeout: Duration,
        events: Sender<RelayEvent>,
    ) -> io::Result<Self> {
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let running = Arc::new(AtomicBool::new(true));
        let engine = Arc::new(Mutex::new(ServerEngine::new()));
        let (tx, rx) = mpsc::channel();

        let listener_thread = {
            let running = running.clone();
            let tx = tx.clone();
            thread::spawn(move || accept_loop(listener, tx, running))
        };

        let actor = ServerActor {
            engine: engine.clone(),
            writers: HashMap::new(),
            write_timeout,
            tx: tx.clone(),
            events,
            running: running.clone(),
        };
        let actor_thread = thread::spawn(move || actor.run(rx));

        Ok(Self {
            addr,
            running,
            engine,
            tx,
            actor: Some(actor_thread),
            listener: Some(listener_thread),
        })
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// False once stopped, including when the listener failed on its own.
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Hand an encoded batch to the actor for delivery to every session.
    pub(crate) fn multicast(&self, bytes: Vec<u8>) -> Result<(), RelayError> {
        self.tx
            .send(ServerEvent::Multicast { bytes })
            .map_err(|_| RelayError::WorkerGone)
    }

    pub(crate) fn roster(&self) -> Vec<String> {
        lock(&self.engine)
            .registry()
            .roster()
            .map(str::to_string)
            .collect()
    }

    /// Stop serving and wait until every thread that owns a socket is gone.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    /// Feed the actor a listener failure, as `accept_loop` does on a fatal
    /// accept error.
    #[cfg(test)]
    pub(crate) fn fail_listener(&self, error: io::Error) {
        let _ = self.tx.send(ServerEvent::ListenerFailed { error });
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.tx.send(ServerEvent::Stop);
        if let Some(handle) = self.actor.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(engine: &Mutex<ServerEngine>) -> MutexGuard<'_, ServerEngine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Listener thread body.
fn accept_loop(listener: TcpListener, tx: Sender<ServerEvent>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(role = "server", %peer, error = %e, "could not make accepted stream blocking, dropping it");
                    continue;
                }
                if tx.send(ServerEvent::NewConnection { stream, peer }).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::ConnectionReset
                ) =>
            {
                debug!(role = "server", error = %e, "transient accept error");
            }
            Err(error) => {
                let _ = tx.send(ServerEvent::ListenerFailed { error });
                break;
            }
        }
    }
}

/// Reader thread body for one session.
fn reader_loop(mut reader: BufReader<TcpStream>, session: SessionHandle, tx: Sender<ServerEvent>) {
    loop {
        match read_frame(&mut reader) {
            Ok(bytes) => {
                if tx.send(ServerEvent::Received { session, bytes }).is_err() {
                    return;
                }
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    debug!(role = "server", %session, error = %e, "session read failed");
                }
                let _ = tx.send(ServerEvent::Closed { session });
                return;
            }
        }
    }
}

struct ServerActor {
    engine: Arc<Mutex<ServerEngine>>,
    writers: HashMap<SessionHandle, BufWriter<TcpStream>>,
    write_timeout: Duration,
    tx: Sender<ServerEvent>,
    events: Sender<RelayEvent>,
    running: Arc<AtomicBool>,
}

impl ServerActor {
    fn run(mut self, rx: Receiver<ServerEvent>) {
        let mut failure = None;
        while self.running.load(Ordering::SeqCst) {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(ServerEvent::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(ServerEvent::ListenerFailed { error }) => {
                    error!(role = "server", error = %error, "listener failed, stopping server");
                    failure = Some(error.to_string());
                    break;
                }
                Ok(event) => self.handle(event),
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
        for (session, writer) in self.writers.drain() {
            if let Err(e) = writer.get_ref().shutdown(Shutdown::Both) {
                debug!(role = "server", %session, error = %e, "session already closed");
            }
        }
        lock(&self.engine).reset();
        info!(role = "server", "server stopped");
        emit_all(&self.events, [RelayEvent::ServerStopped { reason: failure }]);
    }

    fn handle(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::NewConnection { stream, peer } => self.open_session(stream, peer),
            ServerEvent::Received { session, bytes } => self.receive(session, &bytes),
            ServerEvent::Closed { session } => self.close_session(session),
            ServerEvent::Multicast { bytes } => self.broadcast(&bytes),
            ServerEvent::ListenerFailed { .. } | ServerEvent::Stop => {}
        }
    }

    fn open_session(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_write_timeout(Some(self.write_timeout)) {
            warn!(role = "server", %peer, error = %e, "failed to set write timeout, dropping stream");
            return;
        }
        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!(role = "server", %peer, error = %e, "failed to clone accepted stream, dropping it");
                return;
            }
        };
        let _ = stream.set_nodelay(true);

        let session = SessionHandle::new();
        self.writers.insert(session, BufWriter::new(stream));
        let tx = self.tx.clone();
        thread::spawn(move || reader_loop(BufReader::new(reader_stream), session, tx));
        info!(role = "server", %session, %peer, "session opened");
    }

    fn receive(&mut self, session: SessionHandle, bytes: &[u8]) {
        let messages = match decode_batch(bytes) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(role = "server", %session, error = %e, "dropping undecodable batch");
                return;
            }
        };
        debug!(role = "server", %session, count = messages.len(), "inbound batch");
        let out = lock(&self.engine).process_batch(session, messages);
        self.flush(out);
    }

    fn close_session(&mut self, session: SessionHandle) {
        if self.writers.remove(&session).is_none() {
            return;
        }
        let out = lock(&self.engine).session_closed(session);
        self.flush(out);
    }

    /// Deliver one engine output: its events, then its broadcast as a single
    /// batch.
    fn flush(&mut self, out: ServerOutput) {
        emit_all(&self.events, out.events);
        if !out.broadcast.is_empty() {
            match encode_batch(&out.broadcast) {
                Ok(bytes) => self.broadcast(&bytes),
                Err(e) => error!(role = "server", error = %e, "failed to encode outbound batch"),
            }
        }
    }

    /// Write one frame to every session. A session whose write fails or
    /// times out is shut down, then closed once the round is done.
    fn broadcast(&mut self, bytes: &[u8]) {
        let mut failed = Vec::new();
        for (session, writer) in &mut self.writers {
            if let Err(e) = write_frame(writer, bytes) {
                warn!(role = "server", %session, error = %e, "write to session failed, dropping it");
                let _ = writer.get_ref().shutdown(Shutdown::Both);
                failed.push(*session);
            }
        }
        // The reader's own `Closed` arrives later and finds no writer.
        for session in failed {
            self.close_session(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use lan_relay_protocol::{Classification, Message, Origin, Receivers};

    use super::*;

    fn start() -> (ServerHandle, Receiver<RelayEvent>) {
        start_with(Duration::from_secs(5))
    }

    fn start_with(write_timeout: Duration) -> (ServerHandle, Receiver<RelayEvent>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (events_tx, events_rx) = mpsc::channel();
        let handle = ServerHandle::start(listener, write_timeout, events_tx).unwrap();
        (handle, events_rx)
    }

    /// Alphanumeric text that zlib cannot shrink much.
    fn noise(len: usize) -> String {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                ALPHABET[(state % ALPHABET.len() as u64) as usize] as char
            })
            .collect()
    }

    fn wait_for_event(events: &Receiver<RelayEvent>, expected: &RelayEvent) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(event) if event == *expected => return,
                Ok(_) => {}
                Err(_) => panic!("never saw {expected:?}"),
            }
        }
    }

    fn connect(addr: SocketAddr) -> (BufReader<TcpStream>, BufWriter<TcpStream>) {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        (reader, BufWriter::new(stream))
    }

    fn send(writer: &mut BufWriter<TcpStream>, batch: &[Message]) {
        write_frame(writer, &encode_batch(batch).unwrap()).unwrap();
    }

    fn recv(reader: &mut BufReader<TcpStream>) -> Vec<Message> {
        decode_batch(&read_frame(reader).unwrap()).unwrap()
    }

    fn wait_for_roster(handle: &ServerHandle, len: usize) {
        let start = Instant::now();
        while handle.roster().len() != len {
            assert!(start.elapsed() < Duration::from_secs(5), "roster never reached {len}");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn announce_gets_one_reply_batch() {
        let (handle, _events) = start();
        let (mut reader, mut writer) = connect(handle.addr());

        send(&mut writer, &[Message::connection("Alice", "h-1")]);
        let reply = recv(&mut reader);
        let kinds: Vec<_> = reply.iter().map(Message::classification).collect();
        assert_eq!(
            kinds,
            [Classification::ClientOnline, Classification::ClientConnected]
        );
        assert_eq!(handle.roster(), ["Alice"]);
    }

    #[test]
    fn application_multicast_reaches_every_session() {
        let (handle, _events) = start();
        let (mut reader_a, mut writer_a) = connect(handle.addr());
        let (mut reader_b, mut writer_b) = connect(handle.addr());
        send(&mut writer_a, &[Message::connection("A", "h-a")]);
        let _ = recv(&mut reader_a);
        send(&mut writer_b, &[Message::connection("B", "h-b")]);
        let _ = recv(&mut reader_a);
        let _ = recv(&mut reader_b);

        let msg = Message::new(Receivers::AllClients, "news", "hello").stamp(Origin::Server, None);
        handle.multicast(encode_batch(&[msg.clone()]).unwrap()).unwrap();
        assert_eq!(recv(&mut reader_a), [msg.clone()]);
        assert_eq!(recv(&mut reader_b), [msg]);
    }

    #[test]
    fn closed_session_is_announced_and_reported() {
        let (handle, events) = start();
        let (mut reader_a, mut writer_a) = connect(handle.addr());
        let (reader_b, mut writer_b) = connect(handle.addr());
        send(&mut writer_a, &[Message::connection("A", "h-a")]);
        let _ = recv(&mut reader_a);
        send(&mut writer_b, &[Message::connection("B", "h-b")]);
        let _ = recv(&mut reader_a);
        wait_for_roster(&handle, 2);

        drop(writer_b);
        drop(reader_b);
        assert_eq!(recv(&mut reader_a), [Message::client_disconnected("B")]);
        assert_eq!(handle.roster(), ["A"]);

        let seen: Vec<RelayEvent> = events.try_iter().collect();
        assert!(seen.contains(&RelayEvent::PeerDisconnected {
            unique_id: "B".into()
        }));
    }

    #[test]
    fn stalled_session_is_dropped_and_the_server_keeps_serving() {
        let (handle, events) = start_with(Duration::from_millis(200));
        let (mut stuck_reader, mut stuck_writer) = connect(handle.addr());
        send(&mut stuck_writer, &[Message::connection("Stuck", "h-s")]);
        let _ = recv(&mut stuck_reader);

        // Far more than the loopback buffers hold; the peer never reads it.
        let flood = Message::new(Receivers::AllClients, "bulk", noise(4 * 1024 * 1024))
            .stamp(Origin::Server, None);
        let bytes = encode_batch(&[flood]).unwrap();
        for _ in 0..16 {
            handle.multicast(bytes.clone()).unwrap();
        }
        wait_for_event(
            &events,
            &RelayEvent::PeerDisconnected {
                unique_id: "Stuck".into(),
            },
        );

        // The actor is still responsive for everyone else.
        let (mut reader, mut writer) = connect(handle.addr());
        send(&mut writer, &[Message::connection("Alice", "h-1")]);
        let reply = recv(&mut reader);
        assert_eq!(reply.last(), Some(&Message::client_connected("Alice")));
        assert_eq!(handle.roster(), ["Alice"]);

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            handle.stop();
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok(), "stop hung");
        drop(stuck_reader);
    }

    #[test]
    fn listener_failure_stops_the_server_with_a_reason() {
        let (handle, events) = start();
        let (mut reader, mut writer) = connect(handle.addr());
        send(&mut writer, &[Message::connection("Alice", "h-1")]);
        let _ = recv(&mut reader);

        handle.fail_listener(io::Error::other("accept exploded"));
        wait_for_event(
            &events,
            &RelayEvent::ServerStopped {
                reason: Some("accept exploded".into()),
            },
        );

        assert!(!handle.is_running());
        assert!(handle.roster().is_empty());
        let err = read_frame(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        handle.stop();
    }

    #[test]
    fn stop_closes_sessions_and_reports() {
        let (handle, events) = start();
        let (mut reader, mut writer) = connect(handle.addr());
        send(&mut writer, &[Message::connection("Alice", "h-1")]);
        let _ = recv(&mut reader);

        handle.stop();
        let err = read_frame(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(
            events.try_iter().last(),
            Some(RelayEvent::ServerStopped { reason: None })
        );
    }
}
