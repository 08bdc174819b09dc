//! The control channel to the supervisor: a netstring framed
//! (`<len>:<payload>,`) duplex byte stream carrying JSON requests,
//! responses and notifications.
//!
//! Reads accumulate into one preallocated buffer; complete frames are peeled
//! off the front and the remainder shifted down. Writes are attempted
//! immediately and whatever the pipe does not accept is queued, each pending
//! frame carrying its own copy of the bytes, and drained as the pipe becomes
//! writable again. Any framing violation or I/O error is fatal for the
//! worker.

use std::collections::VecDeque;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::error::ChannelError;

/// Default size of the shared read buffer, which also bounds the largest
/// acceptable frame.
pub const DEFAULT_BUFFER_SIZE: usize = 262144;

/// A length prefix longer than this many digits is nonsense.
const MAX_LENGTH_DIGITS: usize = 10;

/// A request from the supervisor.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub id: u32,
    pub method: String,
    #[serde(default)]
    pub internal: Internal,
    #[serde(default)]
    pub data: Value,
}

/// The routing path of a request: which entity it addresses.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Internal {
    pub room_id: Option<u32>,
    pub peer_id: Option<u32>,
    pub transport_id: Option<u32>,
    pub rtp_receiver_id: Option<u32>,
    pub rtp_sender_id: Option<u32>,
}

/// A spontaneous event pushed to the supervisor. Never carries a reply id.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub target_id: u32,
    pub event: String,
    pub data: Value,
}

/// Collects notifications emitted while a request or packet is being
/// handled. The worker drains it onto the channel at the end of the turn.
#[derive(Default)]
pub struct Notifier {
    pending: Vec<Notification>,
}

impl Notifier {
    pub fn new() -> Self {
        Notifier::default()
    }

    pub fn emit(&mut self, target_id: u32, event: impl Into<String>, data: Value) {
        self.pending.push(Notification {
            target_id,
            event: event.into(),
            data,
        });
    }

    pub fn drain(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.pending)
    }
}

/// What came off the channel.
#[derive(Debug)]
pub enum ChannelEvent {
    Request(Request),
    /// The channel ended. `by_peer` tells whether the supervisor closed its
    /// side, as opposed to a local close.
    Closed {
        by_peer: bool,
    },
}

struct OutFrame {
    data: Vec<u8>,
    written: usize,
}

pub struct Channel<R, W> {
    reader: R,
    writer: W,
    buf: Box<[u8]>,
    len: usize,
    outbox: VecDeque<OutFrame>,
    eof: bool,
    error: bool,
    closing: bool,
}

impl<R, W> Channel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Channel::with_capacity(reader, writer, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(reader: R, writer: W, capacity: usize) -> Self {
        Channel {
            reader,
            writer,
            buf: vec![0_u8; capacity].into_boxed_slice(),
            len: 0,
            outbox: VecDeque::new(),
            eof: false,
            error: false,
            closing: false,
        }
    }

    /// Wait for the next inbound frame, meanwhile draining queued writes as
    /// the pipe accepts them.
    pub async fn next(&mut self) -> Result<ChannelEvent, ChannelError> {
        poll_fn(|cx| self.poll_next(cx)).await
    }

    fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Result<ChannelEvent, ChannelError>> {
        if let Err(e) = self.poll_write_outbox(cx) {
            return Poll::Ready(Err(e));
        }

        loop {
            // Deliver every complete frame already buffered.
            while let Some(payload) = self.take_frame()? {
                match serde_json::from_slice::<Request>(&payload) {
                    Ok(request) => return Poll::Ready(Ok(ChannelEvent::Request(request))),
                    Err(e) => {
                        warn!("Discarding channel frame that is not a valid request: {}", e);
                    }
                }
            }

            if self.eof {
                return Poll::Ready(Ok(ChannelEvent::Closed { by_peer: true }));
            }

            if self.len == self.buf.len() {
                // A frame bigger than the whole buffer can never complete.
                return Poll::Ready(Err(ChannelError::FrameTooBig(self.len)));
            }

            let mut rb = ReadBuf::new(&mut self.buf[self.len..]);
            match Pin::new(&mut self.reader).poll_read(cx, &mut rb) {
                Poll::Ready(Ok(())) => {
                    let n = rb.filled().len();
                    if n == 0 {
                        self.eof = true;
                        return Poll::Ready(Ok(ChannelEvent::Closed { by_peer: true }));
                    }
                    self.len += n;
                }
                Poll::Ready(Err(e)) => {
                    self.error = true;
                    return Poll::Ready(Err(e.into()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    /// Peel one netstring frame off the front of the buffer. `Ok(None)`
    /// means more bytes are needed; errors are fatal framing violations.
    fn take_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        if self.len == 0 {
            return Ok(None);
        }

        let data = &self.buf[..self.len];
        let limit = data.len().min(MAX_LENGTH_DIGITS + 1);

        let Some(colon) = data[..limit].iter().position(|b| *b == b':') else {
            if !data[..limit].iter().all(|b| b.is_ascii_digit()) {
                error!("Invalid netstring length prefix, closing the channel");
                return Err(ChannelError::BadFrame);
            }
            if data.len() > MAX_LENGTH_DIGITS {
                error!("Netstring length prefix too long, closing the channel");
                return Err(ChannelError::BadFrame);
            }
            // All digits so far, wait for the colon.
            return Ok(None);
        };

        if colon == 0 || !data[..colon].iter().all(|b| b.is_ascii_digit()) {
            error!("Invalid netstring length prefix, closing the channel");
            return Err(ChannelError::BadFrame);
        }

        // The prefix is pure ASCII digits of bounded length.
        let payload_len: usize = std::str::from_utf8(&data[..colon])
            .expect("digits are utf-8")
            .parse()
            .map_err(|_| ChannelError::BadFrame)?;

        // Prefix + payload + trailing comma must fit the buffer or the
        // frame can never be completed.
        let frame_end = colon + 1 + payload_len + 1;
        if frame_end > self.buf.len() {
            error!(
                "Channel frame of {} bytes exceeds the {} byte buffer, closing the channel",
                payload_len,
                self.buf.len()
            );
            return Err(ChannelError::FrameTooBig(payload_len));
        }

        if data.len() < frame_end {
            return Ok(None);
        }

        if data[frame_end - 1] != b',' {
            error!("Channel frame not terminated by comma, closing the channel");
            return Err(ChannelError::BadFrame);
        }

        let payload = data[colon + 1..frame_end - 1].to_vec();

        // Shift the remainder to the front of the buffer.
        self.buf.copy_within(frame_end..self.len, 0);
        self.len -= frame_end;

        Ok(Some(payload))
    }

    fn poll_write_outbox(&mut self, cx: &mut Context<'_>) -> Result<(), ChannelError> {
        while let Some(front) = self.outbox.front_mut() {
            match Pin::new(&mut self.writer).poll_write(cx, &front.data[front.written..]) {
                Poll::Ready(Ok(0)) => {
                    self.error = true;
                    return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                }
                Poll::Ready(Ok(n)) => {
                    front.written += n;
                    if front.written == front.data.len() {
                        self.outbox.pop_front();
                    }
                }
                Poll::Ready(Err(e)) => {
                    error!("Write error, closing the channel: {}", e);
                    self.error = true;
                    return Err(e.into());
                }
                Poll::Pending => break,
            }
        }
        Ok(())
    }

    /// Frame and queue one JSON message. Queued bytes go out as the event
    /// loop finds the pipe writable.
    fn send(&mut self, msg: &Value) {
        if self.closing || self.error {
            return;
        }

        let payload = serde_json::to_vec(msg).expect("message to serialize");

        let mut frame = Vec::with_capacity(payload.len() + MAX_LENGTH_DIGITS + 2);
        frame.extend_from_slice(payload.len().to_string().as_bytes());
        frame.push(b':');
        frame.extend_from_slice(&payload);
        frame.push(b',');

        self.outbox.push_back(OutFrame {
            data: frame,
            written: 0,
        });
    }

    pub fn send_accepted(&mut self, id: u32, data: Value) {
        self.send(&json!({ "id": id, "accepted": true, "data": data }));
    }

    pub fn send_rejected(&mut self, id: u32, reason: &str) {
        self.send(&json!({ "id": id, "rejected": true, "reason": reason }));
    }

    pub fn send_notification(&mut self, n: &Notification) {
        self.send(&json!({
            "targetId": n.target_id.to_string(),
            "event": n.event.clone(),
            "data": n.data.clone(),
        }));
    }

    /// Graceful shutdown: stop reading, let queued writes drain, then half
    /// close the write side. If the peer already went away or an error was
    /// recorded, the drain is skipped.
    pub async fn close(&mut self) {
        if self.closing {
            return;
        }
        self.closing = true;

        if !self.error && !self.eof {
            let drained = poll_fn(|cx| {
                if self.poll_write_outbox(cx).is_err() {
                    return Poll::Ready(false);
                }
                if self.outbox.is_empty() {
                    Poll::Ready(true)
                } else {
                    Poll::Pending
                }
            })
            .await;

            if drained {
                let _ = self.writer.shutdown().await;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream, ReadHalf, WriteHalf};

    type TestChannel = Channel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn pair(capacity: usize) -> (TestChannel, DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(65536);
        let (r, w) = tokio::io::split(ours);
        (Channel::with_capacity(r, w, capacity), theirs)
    }

    #[tokio::test]
    async fn delivers_one_frame_and_resets_buffer() {
        let (mut channel, mut sup) = pair(DEFAULT_BUFFER_SIZE);

        let payload = br#"{"id":1,"method":"x"}"#;
        sup.write_all(format!("{}:", payload.len()).as_bytes())
            .await
            .unwrap();
        sup.write_all(payload).await.unwrap();
        sup.write_all(b",").await.unwrap();

        let ChannelEvent::Request(request) = channel.next().await.unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request.id, 1);
        assert_eq!(request.method, "x");

        // Fully consumed.
        assert_eq!(channel.len, 0);
    }

    #[tokio::test]
    async fn frame_split_across_reads() {
        let (mut channel, mut sup) = pair(DEFAULT_BUFFER_SIZE);

        let frame = br#"21:{"id":7,"method":"m"},"#;

        let (a, b) = frame.split_at(5);
        sup.write_all(a).await.unwrap();

        tokio::select! {
            _ = channel.next() => panic!("half a frame must not deliver"),
            _ = tokio::task::yield_now() => {}
        }

        sup.write_all(b).await.unwrap();

        let ChannelEvent::Request(request) = channel.next().await.unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request.id, 7);
    }

    #[tokio::test]
    async fn two_frames_in_one_read() {
        let (mut channel, mut sup) = pair(DEFAULT_BUFFER_SIZE);

        sup.write_all(br#"21:{"id":1,"method":"a"},21:{"id":2,"method":"b"},"#)
            .await
            .unwrap();

        let ChannelEvent::Request(first) = channel.next().await.unwrap() else {
            panic!("expected request");
        };
        let ChannelEvent::Request(second) = channel.next().await.unwrap() else {
            panic!("expected request");
        };
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(channel.len, 0);
    }

    #[tokio::test]
    async fn missing_comma_is_fatal() {
        let (mut channel, mut sup) = pair(DEFAULT_BUFFER_SIZE);

        sup.write_all(br#"21:{"id":1,"method":"a"}X"#).await.unwrap();

        assert!(matches!(
            channel.next().await,
            Err(ChannelError::BadFrame)
        ));
    }

    #[tokio::test]
    async fn oversized_frame_is_fatal() {
        let (mut channel, mut sup) = pair(64);

        sup.write_all(b"1000:").await.unwrap();

        assert!(matches!(
            channel.next().await,
            Err(ChannelError::FrameTooBig(1000))
        ));
    }

    #[tokio::test]
    async fn garbage_prefix_is_fatal() {
        let (mut channel, mut sup) = pair(DEFAULT_BUFFER_SIZE);

        sup.write_all(b"nonsense").await.unwrap();

        assert!(matches!(channel.next().await, Err(ChannelError::BadFrame)));
    }

    #[tokio::test]
    async fn peer_close_reported_once() {
        let (mut channel, sup) = pair(DEFAULT_BUFFER_SIZE);
        drop(sup);

        let ChannelEvent::Closed { by_peer } = channel.next().await.unwrap() else {
            panic!("expected close");
        };
        assert!(by_peer);
    }

    #[tokio::test]
    async fn responses_are_netstring_framed() {
        let (mut channel, mut sup) = pair(DEFAULT_BUFFER_SIZE);

        channel.send_accepted(42, json!({ "ok": true }));
        channel.close().await;
        drop(channel);

        let mut out = Vec::new();
        sup.read_to_end(&mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let colon = text.find(':').unwrap();
        let len: usize = text[..colon].parse().unwrap();
        assert_eq!(text.len(), colon + 1 + len + 1);
        assert!(text.ends_with(','));

        let body: Value = serde_json::from_str(&text[colon + 1..text.len() - 1]).unwrap();
        assert_eq!(body["id"], 42);
        assert_eq!(body["accepted"], true);
    }

    #[tokio::test]
    async fn queued_writes_drain_under_backpressure() {
        // A tiny pipe so one frame cannot be written in one go.
        let (ours, mut theirs) = tokio::io::duplex(16);
        let (r, w) = tokio::io::split(ours);
        let mut channel: TestChannel = Channel::with_capacity(r, w, DEFAULT_BUFFER_SIZE);

        let big = "y".repeat(300);
        channel.send_accepted(1, json!({ "blob": big }));

        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            theirs.read_to_end(&mut out).await.unwrap();
            out
        });

        channel.close().await;
        drop(channel);

        let out = reader.await.unwrap();
        let text = String::from_utf8(out).unwrap();
        let colon = text.find(':').unwrap();
        let len: usize = text[..colon].parse().unwrap();
        assert_eq!(text.len(), colon + 1 + len + 1);
    }
}
