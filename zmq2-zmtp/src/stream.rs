//! Stream connections (TCP and Unix domain sockets).
//!
//! Each connection runs two compio tasks sharing the stream:
//! - the reader feeds received bytes to a [`FrameDecoder`] and hands
//!   complete messages to the [`PeerLink`];
//! - the writer drains a channel of encoded messages, coalescing whatever is
//!   already queued into one `write_all`.
//!
//! The number of messages handed to the writer but not yet written is the
//! busy signal. Once it falls below the socket's busy threshold after a
//! write, an armed connection reports the peer free again.

use bytes::Bytes;
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use compio::runtime::Task;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};
use zmq2_core::endpoint::Endpoint;
use zmq2_core::error::ZmqError;

use crate::codec::{encode_message, CodecError, FrameDecoder};
use crate::connection::{
    ConnectionId, ConnectionState, PeerConnection, PeerLink, SocketEvents, StreamConfig,
};

enum WriterCmd {
    Message(Bytes),
    Close,
}

/// Which of the connection's own tasks is tearing it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Caller {
    Reader,
    Writer,
    Socket,
}

pub(crate) struct StreamConnection {
    link: PeerLink,
    endpoint: Option<Endpoint>,
    decoder: RefCell<FrameDecoder>,
    outbound: flume::Sender<WriterCmd>,
    backlog: Cell<usize>,
    busy_threshold: usize,
    notify_when_free: Cell<bool>,
    state: Cell<ConnectionState>,
    discard: Cell<bool>,
    errored: Cell<bool>,
    reader: RefCell<Option<Task<()>>>,
    writer: RefCell<Option<Task<()>>>,
    this: Weak<StreamConnection>,
}

impl StreamConnection {
    /// Wrap an established stream and start its reader and writer.
    ///
    /// `endpoint` is set for connect-initiated streams. The identity
    /// handshake message is queued immediately.
    pub(crate) fn start<S>(
        id: ConnectionId,
        stream: S,
        socket: &Rc<dyn SocketEvents>,
        endpoint: Option<Endpoint>,
    ) -> Rc<Self>
    where
        S: 'static,
        for<'a> &'a S: AsyncRead + AsyncWrite,
    {
        let config: StreamConfig = socket.stream_config();
        let (tx, rx) = flume::unbounded();

        let connection = Rc::new_cyclic(|this| Self {
            link: PeerLink::new(id, Rc::downgrade(socket)),
            endpoint,
            decoder: RefCell::new(FrameDecoder::with_max_frame_size(config.max_frame_size)),
            outbound: tx,
            backlog: Cell::new(0),
            busy_threshold: config.busy_threshold,
            notify_when_free: Cell::new(false),
            state: Cell::new(ConnectionState::Connected),
            discard: Cell::new(false),
            errored: Cell::new(false),
            reader: RefCell::new(None),
            writer: RefCell::new(None),
            this: this.clone(),
        });

        let stream = Rc::new(stream);
        let reader = compio::runtime::spawn(read_loop(
            Rc::clone(&stream),
            Rc::downgrade(&connection),
            config.read_buffer_size,
        ));
        let writer = compio::runtime::spawn(write_loop(stream, rx, Rc::downgrade(&connection)));
        *connection.reader.borrow_mut() = Some(reader);
        *connection.writer.borrow_mut() = Some(writer);

        if let Some(identity) = connection.link.local_identity() {
            connection.send_message(&[identity]);
        }
        debug!(connection = id, endpoint = ?connection.endpoint, "[STREAM] connection started");
        connection
    }

    fn as_peer(&self) -> Option<Rc<dyn PeerConnection>> {
        self.this.upgrade().map(|c| c as Rc<dyn PeerConnection>)
    }

    /// Decode `data` and deliver every complete message.
    ///
    /// Messages decoded before a framing error are still delivered.
    fn receive_data(&self, data: &[u8]) -> Result<(), CodecError> {
        let mut messages = Vec::new();
        let outcome = {
            let mut decoder = self.decoder.borrow_mut();
            decoder.feed(data);
            loop {
                match decoder.decode() {
                    Ok(Some(message)) => messages.push(message),
                    Ok(None) => break Ok(()),
                    Err(err) => break Err(err),
                }
            }
        };

        if let Some(peer) = self.as_peer() {
            for message in messages {
                if self.state.get() == ConnectionState::Closed {
                    break;
                }
                self.link.accept(message, &peer);
            }
        }
        outcome
    }

    /// Account for `count` messages leaving the write queue.
    fn written(&self, count: usize) {
        self.backlog.set(self.backlog.get().saturating_sub(count));
        if self.notify_when_free.get() && self.backlog.get() < self.busy_threshold {
            self.notify_when_free.set(false);
            self.link.sent_data();
        }
    }

    fn enqueue(&self, bytes: Bytes) {
        match self.state.get() {
            ConnectionState::Connected => {}
            state => {
                trace!(connection = self.id(), ?state, "[STREAM] dropping write on inactive connection");
                return;
            }
        }
        self.backlog.set(self.backlog.get() + 1);
        if self.outbound.send(WriterCmd::Message(bytes)).is_err() {
            self.backlog.set(self.backlog.get() - 1);
        }
    }

    /// Final teardown: stop the tasks and notify the socket. Runs once.
    ///
    /// The calling task is detached since it is about to return; the other
    /// one is cancelled.
    fn teardown(&self, caller: Caller) {
        if self.state.replace(ConnectionState::Closed) == ConnectionState::Closed {
            return;
        }
        self.notify_when_free.set(false);

        let reader = self.reader.borrow_mut().take();
        let writer = self.writer.borrow_mut().take();
        match caller {
            Caller::Reader => {
                if let Some(task) = reader {
                    task.detach();
                }
                drop(writer);
            }
            Caller::Writer => {
                if let Some(task) = writer {
                    task.detach();
                }
                drop(reader);
            }
            Caller::Socket => {
                drop(reader);
                drop(writer);
            }
        }

        debug!(connection = self.id(), endpoint = ?self.endpoint, "[STREAM] connection closed");
        self.link.unbind();
    }
}

impl PeerConnection for StreamConnection {
    fn id(&self) -> ConnectionId {
        self.link.id()
    }

    fn send_message(&self, frames: &[Bytes]) {
        self.enqueue(encode_message(frames));
    }

    fn send_encoded(&self, _frames: &[Bytes], encoded: &Bytes) {
        self.enqueue(encoded.clone());
    }

    fn not_too_busy(&self) -> bool {
        let free = self.state.get() == ConnectionState::Connected
            && !self.errored.get()
            && self.backlog.get() < self.busy_threshold;
        self.notify_when_free.set(!free);
        free
    }

    fn is_errored(&self) -> bool {
        self.errored.get()
    }

    fn close(&self, after_writing: bool) {
        match self.state.get() {
            ConnectionState::Closed => {}
            ConnectionState::Closing => {
                if !after_writing {
                    self.discard.set(true);
                }
            }
            _ => {
                self.state.set(ConnectionState::Closing);
                self.discard.set(!after_writing);
                let _ = self.outbound.send(WriterCmd::Close);
            }
        }
    }

    fn abort(&self) {
        self.discard.set(true);
        self.teardown(Caller::Socket);
    }
}

async fn read_loop<S>(stream: Rc<S>, connection: Weak<StreamConnection>, buffer_size: usize)
where
    for<'a> &'a S: AsyncRead,
{
    let mut reader = &*stream;
    let mut buf = Vec::with_capacity(buffer_size);

    loop {
        // Reads land in spare capacity.
        buf.clear();
        buf.reserve(buffer_size);
        let BufResult(result, returned) = reader.read(buf).await;
        buf = returned;

        let Some(conn) = connection.upgrade() else {
            return;
        };
        match result {
            Ok(0) => {
                trace!(connection = conn.id(), "[STREAM] EOF");
                conn.teardown(Caller::Reader);
                return;
            }
            Ok(n) => {
                if let Err(err) = conn.receive_data(&buf[..n]) {
                    warn!(connection = conn.id(), error = %err, "[STREAM] malformed frame, closing");
                    conn.errored.set(true);
                    conn.link.protocol_error(ZmqError::from(err));
                    conn.teardown(Caller::Reader);
                    return;
                }
                if conn.state.get() == ConnectionState::Closed {
                    return;
                }
            }
            Err(err) => {
                debug!(connection = conn.id(), error = %err, "[STREAM] read failed");
                conn.teardown(Caller::Reader);
                return;
            }
        }
    }
}

async fn write_loop<S>(
    stream: Rc<S>,
    commands: flume::Receiver<WriterCmd>,
    connection: Weak<StreamConnection>,
) where
    for<'a> &'a S: AsyncWrite,
{
    let mut writer = &*stream;
    let mut buf: Vec<u8> = Vec::new();

    while let Ok(first) = commands.recv_async().await {
        buf.clear();
        let mut batched = 0;
        let mut close = false;
        let mut next = Some(first);
        while let Some(cmd) = next.take() {
            match cmd {
                WriterCmd::Message(bytes) => {
                    batched += 1;
                    buf.extend_from_slice(&bytes);
                }
                WriterCmd::Close => {
                    close = true;
                    break;
                }
            }
            next = commands.try_recv().ok();
        }

        let discard = connection.upgrade().is_some_and(|c| c.discard.get());
        if !buf.is_empty() && !discard {
            let BufResult(result, returned) = writer.write_all(buf).await;
            buf = returned;
            if let Err(err) = result {
                if let Some(conn) = connection.upgrade() {
                    debug!(connection = conn.id(), error = %err, "[STREAM] write failed");
                    conn.errored.set(true);
                    conn.teardown(Caller::Writer);
                }
                return;
            }
        }

        let Some(conn) = connection.upgrade() else {
            return;
        };
        conn.written(batched);

        if close {
            let _ = writer.shutdown().await;
            conn.teardown(Caller::Writer);
            return;
        }
    }
}
