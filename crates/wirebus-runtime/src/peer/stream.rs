//! Connection-owning session used by the stream transports.
//!
//! [`NetSession`] runs the concurrent recv/send loop pair every stream
//! session shares; the transport-specific connection state is factored into
//! a [`SessionIo`] value ([`StreamIo`] for byte streams, the WebSocket
//! module supplies its own). A small supervisor task waits for both loops,
//! removes the session from its manager and fires the optional end notify.
//!
//! Lifecycle per session:
//!
//! ```text
//! created ──start──▶ running ────error/close────▶ closing ──both loops done──▶ terminated
//!                      │                            ▲
//!                      └───────── close() ──────────┘
//! ```

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Notify;
use tracing::error;

use wirebus_core::error::{Result, TransportError};
use wirebus_core::meta::MessageBox;
use wirebus_core::packet::{read_ltv_packet, write_ltv_packet};
use wirebus_core::pipe::Pipe;
use wirebus_core::sysmsg::{CloseReason, SessionClosed};

use crate::event::{RecvMsgEvent, SendMsgEvent};
use crate::peer::{ContextSet, PeerCore};
use crate::session::{Session, SessionRef};

/// Transport state owned by a [`NetSession`]. Implementations hold the
/// typed connection halves; the transmitter downcasts the session to reach
/// them.
#[async_trait::async_trait]
pub trait SessionIo: Send + Sync + 'static {
    /// Closes the write side; invoked by the send loop after it drains.
    async fn shutdown_write(&self);

    /// Drops the read side; invoked after the recv loop exits. Must not
    /// wait on the write side, which the send loop may still hold.
    async fn release_read(&self);

    /// Drops whatever is left of the connection; invoked on the panic path.
    async fn teardown(&self);
}

// ----------------------------------------------------------------------------
// Byte-stream IO
// ----------------------------------------------------------------------------

/// Connection halves of a split byte stream (TCP, KCP).
pub struct StreamIo<S> {
    reader: tokio::sync::Mutex<Option<ReadHalf<S>>>,
    writer: tokio::sync::Mutex<Option<WriteHalf<S>>>,
}

impl<S> StreamIo<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            reader: tokio::sync::Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn attach(&self, stream: S) {
        let (r, w) = tokio::io::split(stream);
        *self.reader.lock().await = Some(r);
        *self.writer.lock().await = Some(w);
    }

    pub async fn detach(&self) {
        self.reader.lock().await.take();
        self.writer.lock().await.take();
    }
}

#[async_trait::async_trait]
impl<S> SessionIo for StreamIo<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn shutdown_write(&self) {
        if let Some(mut w) = self.writer.lock().await.take() {
            let _ = w.shutdown().await;
        }
    }

    async fn release_read(&self) {
        self.reader.lock().await.take();
    }

    async fn teardown(&self) {
        self.reader.lock().await.take();
        self.writer.lock().await.take();
    }
}

// ----------------------------------------------------------------------------
// NetSession
// ----------------------------------------------------------------------------

/// A session owning one connection through a [`SessionIo`] value.
pub struct NetSession<IO: SessionIo> {
    id: AtomicI64,
    core: Arc<PeerCore>,
    io: IO,
    remote: RwLock<Option<SocketAddr>>,
    send_queue: Pipe<MessageBox>,
    closing: AtomicBool,
    close_notify: Notify,
    end_notify: Mutex<Option<Arc<Notify>>>,
    context: ContextSet,
}

impl<IO: SessionIo> NetSession<IO> {
    pub fn new(core: Arc<PeerCore>, io: IO) -> Arc<Self> {
        Arc::new(Self {
            id: AtomicI64::new(0),
            core,
            io,
            remote: RwLock::new(None),
            send_queue: Pipe::new(),
            closing: AtomicBool::new(false),
            close_notify: Notify::new(),
            end_notify: Mutex::new(None),
            context: ContextSet::new(),
        })
    }

    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn set_remote(&self, remote: Option<SocketAddr>) {
        *self.remote.write().unwrap() = remote;
    }

    /// Registers a notify fired once both loops have finished and the
    /// session left its manager; connectors use this to drive reconnection.
    pub fn set_end_notify(&self, notify: Arc<Notify>) {
        *self.end_notify.lock().unwrap() = Some(notify);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Futures racing a blocking read against local close. Transmitters
    /// select on this so `close()` can unhook a parked recv loop.
    pub async fn closed(&self) {
        self.close_notify.notified().await;
    }

    /// Spawns the recv loop, the send loop and the supervisor. The session
    /// is registered with the manager (assigning the id) before any loop can
    /// observe it.
    pub fn start(self: &Arc<Self>) {
        self.closing.store(false, Ordering::SeqCst);
        self.send_queue.reset();
        // a close from a previous life of this session (connector reuse)
        // may have left an unconsumed permit behind
        let _ = self.close_notify.notified().now_or_never();

        let ses: SessionRef = self.clone();
        self.core.sessions().add(&ses);

        let recv_task = tokio::spawn(Self::recv_loop(self.clone()));
        let send_task = tokio::spawn(Self::send_loop(self.clone()));

        let this = self.clone();
        tokio::spawn(async move {
            let _ = recv_task.await;
            let _ = send_task.await;

            this.core.sessions().remove(this.id());

            let end = this.end_notify.lock().unwrap().clone();
            if let Some(notify) = end {
                notify.notify_one();
            }
        });
    }

    async fn recv_loop(self: Arc<Self>) {
        let ses: SessionRef = self.clone();

        loop {
            let capture = self.core.capture_io_panic();

            let result = if capture {
                match AssertUnwindSafe(self.core.bundle().read_message(&ses))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        // a recv panic is fatal to this session only
                        error!("io panic on recv, session {} closing", self.id());
                        self.io.teardown().await;
                        Err(TransportError::ConnectionClosed.into())
                    }
                }
            } else {
                self.core.bundle().read_message(&ses).await
            };

            match result {
                Ok(msg) => {
                    self.core
                        .bundle()
                        .proc_event(Box::new(RecvMsgEvent::new(ses.clone(), msg)));
                }
                Err(err) => {
                    if !err.is_benign_transport() {
                        error!(
                            "session closed, id: {}, err: {}, remote: {:?}",
                            self.id(),
                            err,
                            self.remote_address()
                        );
                    }

                    // wake the send loop so it can finish and close the socket
                    self.send_queue.add_exit();

                    let reason = if self.is_closing() {
                        CloseReason::Manual
                    } else {
                        CloseReason::Io
                    };
                    self.core.bundle().proc_event(Box::new(RecvMsgEvent::new(
                        ses.clone(),
                        Box::new(SessionClosed { reason }),
                    )));
                    break;
                }
            }
        }

        self.io.release_read().await;
    }

    async fn send_loop(self: Arc<Self>) {
        let ses: SessionRef = self.clone();
        let mut batch: Vec<MessageBox> = Vec::new();

        loop {
            batch.clear();
            let exit = self.send_queue.drain(&mut batch).await;

            for msg in batch.drain(..) {
                let capture = self.core.capture_io_panic();
                let ev = Box::new(SendMsgEvent::new(ses.clone(), msg));

                if capture {
                    // a send panic drops this message only
                    if AssertUnwindSafe(self.core.bundle().send_message(ev))
                        .catch_unwind()
                        .await
                        .is_err()
                    {
                        error!("io panic on send, session {}", self.id());
                    }
                } else {
                    self.core.bundle().send_message(ev).await;
                }
            }

            if exit {
                break;
            }
        }

        self.io.shutdown_write().await;
    }
}

impl<IO: SessionIo> Session for NetSession<IO> {
    fn id(&self) -> i64 {
        self.id.load(Ordering::SeqCst)
    }

    fn set_id(&self, id: i64) {
        self.id.store(id, Ordering::SeqCst);
    }

    fn core(&self) -> &Arc<PeerCore> {
        &self.core
    }

    fn send(&self, msg: MessageBox) {
        if self.is_closing() {
            return;
        }
        self.send_queue.add(msg);
    }

    fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        // unhook a parked read; the recv loop then runs the teardown path
        self.close_notify.notify_one();
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        *self.remote.read().unwrap()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Context storage of a stream session.
impl<IO: SessionIo> NetSession<IO> {
    pub fn context(&self) -> &ContextSet {
        &self.context
    }
}

// ----------------------------------------------------------------------------
// Byte-stream session alias & packet helpers
// ----------------------------------------------------------------------------

/// Session over a split byte stream.
pub type ByteStreamSession<S> = NetSession<StreamIo<S>>;

impl<S> ByteStreamSession<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Reads one LTV packet, racing local close.
    pub async fn read_packet(&self, max_packet_size: usize) -> Result<MessageBox> {
        let mut guard = self.io().reader.lock().await;
        let reader = guard
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;

        tokio::select! {
            result = read_ltv_packet(reader, max_packet_size) => result,
            _ = self.closed() => Err(TransportError::ConnectionClosed.into()),
        }
    }

    /// Writes one LTV packet.
    pub async fn write_packet(&self, msg: &(dyn Any + Send + Sync)) -> Result<()> {
        let mut guard = self.io().writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;
        write_ltv_packet(writer, msg).await
    }
}
