//! Streaming call driver.
//!
//! Bridges a transport byte stream to typed [`StreamResult`]s: the send half
//! serializes and frames outgoing messages, the receive pump cuts envelopes
//! out of incoming bytes, runs them through the stream interceptor chain,
//! decodes, and delivers over a bounded channel. One pump task per stream;
//! backpressure is the caller's receive rate.
//!
//! State machine: `Open` half-closes to `HalfClosedLocal` (after
//! `send_close`) or `HalfClosedRemote` (after the terminal result), and
//! reaches `Closed` when both halves are done or the stream is canceled.
//! Transitions are monotonic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use tokio::sync::mpsc;
use tracing::debug;
use triwire_core::{split_frame, Code, RpcError, Status};

use crate::interceptor::{RequestBodyFunction, StreamResultFunction};
use crate::result::{ResponseMessage, StreamResult};
use crate::transport::{AbortHandle, StreamWriter, TransportEvent, TransportStream};

/// Capacity of the typed result channel between the pump and the caller.
const RESULT_CHANNEL_CAPACITY: usize = 16;

type EncodeFn<Req> = Arc<dyn Fn(&Req) -> Result<Bytes, RpcError> + Send + Sync>;
type DecodeFn<Res> = Arc<dyn Fn(&[u8]) -> Result<Res, RpcError> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Shared stream lifecycle state. Phase transitions are monotonic; the
/// `completed` latch guarantees at most one terminal result is produced.
struct StreamState {
    phase: Mutex<Phase>,
    completed: AtomicBool,
}

impl StreamState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            phase: Mutex::new(Phase::Open),
            completed: AtomicBool::new(false),
        })
    }

    fn check_send(&self) -> Result<(), RpcError> {
        match *self.phase.lock().unwrap() {
            Phase::Open | Phase::HalfClosedRemote => Ok(()),
            Phase::HalfClosedLocal | Phase::Closed => Err(RpcError::Status(Status::new(
                Code::FailedPrecondition,
                "send after stream was closed for sending",
            ))),
        }
    }

    fn close_local(&self) {
        let mut phase = self.phase.lock().unwrap();
        *phase = match *phase {
            Phase::Open => Phase::HalfClosedLocal,
            Phase::HalfClosedRemote => Phase::Closed,
            other => other,
        };
    }

    fn close_remote(&self) {
        let mut phase = self.phase.lock().unwrap();
        *phase = match *phase {
            Phase::Open => Phase::HalfClosedRemote,
            Phase::HalfClosedLocal => Phase::Closed,
            other => other,
        };
    }

    fn close(&self) {
        *self.phase.lock().unwrap() = Phase::Closed;
    }

    fn is_send_closed(&self) -> bool {
        matches!(
            *self.phase.lock().unwrap(),
            Phase::HalfClosedLocal | Phase::Closed
        )
    }

    fn is_closed(&self) -> bool {
        *self.phase.lock().unwrap() == Phase::Closed
    }

    /// Latch the terminal result. True for the first caller only.
    fn mark_completed(&self) -> bool {
        !self.completed.swap(true, Ordering::SeqCst)
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Write half of a streaming call.
pub struct StreamSender<Req> {
    writer: Box<dyn StreamWriter>,
    encode: EncodeFn<Req>,
    request_body: RequestBodyFunction,
    state: Arc<StreamState>,
}

impl<Req> StreamSender<Req> {
    /// Serialize, frame, and write one message.
    ///
    /// A serialization failure is returned to the caller and leaves the
    /// stream open; transport failures surface as-is.
    pub async fn send(&mut self, message: &Req) -> Result<(), RpcError> {
        self.state.check_send()?;
        let bytes = (self.encode)(message)?;
        let framed = (self.request_body)(bytes)?;
        self.writer.send(framed).await
    }

    /// Half-close the write side. Idempotent.
    pub async fn send_close(&mut self) -> Result<(), RpcError> {
        if self.state.is_send_closed() {
            return Ok(());
        }
        self.state.close_local();
        self.writer.send_close().await
    }

    pub fn is_send_closed(&self) -> bool {
        self.state.is_send_closed()
    }
}

/// Read half of a streaming call.
pub struct StreamReceiver<Res> {
    results: mpsc::Receiver<StreamResult<Res>>,
    state: Arc<StreamState>,
    abort: AbortHandle,
    pending_terminal: Option<StreamResult<Res>>,
    terminated: bool,
}

impl<Res> StreamReceiver<Res> {
    /// Next stream result, or `None` once the terminal result has been
    /// observed.
    pub async fn receive(&mut self) -> Option<StreamResult<Res>> {
        if self.terminated {
            return None;
        }
        if let Some(terminal) = self.pending_terminal.take() {
            self.terminated = true;
            return Some(terminal);
        }
        match self.results.recv().await {
            Some(result) => {
                if result.is_complete() {
                    self.terminated = true;
                    self.state.close_remote();
                }
                Some(result)
            }
            None => {
                self.terminated = true;
                None
            }
        }
    }

    /// Cancel the read side: aborts the transport stream and, unless the
    /// stream already terminated, makes the next [`receive`](Self::receive)
    /// yield `Complete` with code `Canceled`. Incoming data after this point
    /// is discarded.
    pub fn receive_close(&mut self) {
        self.state.close();
        self.abort.abort();
        self.results.close();
        if self.state.mark_completed() {
            self.pending_terminal = Some(StreamResult::Complete {
                code: Code::Canceled,
                error: Some(RpcError::Status(Status::from_code(Code::Canceled))),
                trailers: HeaderMap::new(),
            });
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

/// Results as a [`futures::Stream`], ending after the terminal result.
impl<Res: Unpin> futures::Stream for StreamReceiver<Res> {
    type Item = StreamResult<Res>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }
        if let Some(terminal) = this.pending_terminal.take() {
            this.terminated = true;
            return Poll::Ready(Some(terminal));
        }
        match this.results.poll_recv(cx) {
            Poll::Ready(Some(result)) => {
                if result.is_complete() {
                    this.terminated = true;
                    this.state.close_remote();
                }
                Poll::Ready(Some(result))
            }
            Poll::Ready(None) => {
                this.terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<Res> Drop for StreamReceiver<Res> {
    fn drop(&mut self) {
        // Dropping an unfinished receiver cancels the call.
        if !self.state.is_completed() {
            self.state.close();
            self.abort.abort();
        }
    }
}

/// A bidirectional stream: both halves in one handle.
///
/// [`split`](Self::split) separates them for concurrent send and receive
/// tasks.
pub struct BidirectionalStream<Req, Res> {
    sender: StreamSender<Req>,
    receiver: StreamReceiver<Res>,
}

impl<Req, Res> BidirectionalStream<Req, Res> {
    /// Attach the driver to an open transport stream.
    ///
    /// Spawns the receive pump; results arrive through the returned handle.
    pub(crate) fn spawn(
        transport_stream: TransportStream,
        request_body: RequestBodyFunction,
        stream_result: StreamResultFunction,
        encode: EncodeFn<Req>,
        decode: DecodeFn<Res>,
        timeout: Option<std::time::Duration>,
    ) -> Self
    where
        Res: Send + 'static,
    {
        let TransportStream {
            writer,
            events,
            abort,
        } = transport_stream;
        let state = StreamState::new();
        let (tx, rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);

        tokio::spawn(run_receive_pump(
            events,
            stream_result,
            decode,
            tx,
            state.clone(),
            abort.clone(),
            timeout,
        ));

        Self {
            sender: StreamSender {
                writer,
                encode,
                request_body,
                state: state.clone(),
            },
            receiver: StreamReceiver {
                results: rx,
                state,
                abort,
                pending_terminal: None,
                terminated: false,
            },
        }
    }

    pub async fn send(&mut self, message: &Req) -> Result<(), RpcError> {
        self.sender.send(message).await
    }

    pub async fn receive(&mut self) -> Option<StreamResult<Res>> {
        self.receiver.receive().await
    }

    pub async fn send_close(&mut self) -> Result<(), RpcError> {
        self.sender.send_close().await
    }

    pub fn receive_close(&mut self) {
        self.receiver.receive_close()
    }

    pub fn is_send_closed(&self) -> bool {
        self.sender.is_send_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }

    pub fn split(self) -> (StreamSender<Req>, StreamReceiver<Res>) {
        (self.sender, self.receiver)
    }
}

/// Server-streaming view: the single request was already sent; only results
/// flow.
pub struct ServerStream<Res> {
    receiver: StreamReceiver<Res>,
}

impl<Res> ServerStream<Res> {
    pub(crate) fn new(receiver: StreamReceiver<Res>) -> Self {
        Self { receiver }
    }

    pub async fn receive(&mut self) -> Option<StreamResult<Res>> {
        self.receiver.receive().await
    }

    pub fn receive_close(&mut self) {
        self.receiver.receive_close()
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }
}

impl<Res: Unpin> futures::Stream for ServerStream<Res> {
    type Item = StreamResult<Res>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        futures::Stream::poll_next(std::pin::Pin::new(&mut self.get_mut().receiver), cx)
    }
}

/// Client-streaming view: many sends, then one response.
pub struct ClientStream<Req, Res> {
    inner: BidirectionalStream<Req, Res>,
}

impl<Req, Res> ClientStream<Req, Res> {
    pub(crate) fn new(inner: BidirectionalStream<Req, Res>) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, message: &Req) -> Result<(), RpcError> {
        self.inner.send(message).await
    }

    /// Close the send side and wait for the single response.
    pub async fn close_and_receive(mut self) -> ResponseMessage<Res> {
        let mut headers = HeaderMap::new();
        if let Err(error) = self.inner.send_close().await {
            return ResponseMessage::Failure {
                error,
                headers,
                trailers: HeaderMap::new(),
            };
        }
        let mut message = None;
        loop {
            match self.inner.receive().await {
                Some(StreamResult::Headers { headers: h }) => headers = h,
                Some(StreamResult::Message { message: m }) => message = Some(m),
                Some(StreamResult::Complete {
                    error, trailers, ..
                }) => {
                    return match (error, message) {
                        (Some(error), _) => ResponseMessage::Failure {
                            error,
                            headers,
                            trailers,
                        },
                        (None, Some(message)) => ResponseMessage::Success {
                            message,
                            headers,
                            trailers,
                        },
                        (None, None) => ResponseMessage::Failure {
                            error: RpcError::Protocol(
                                "stream completed without a response message".into(),
                            ),
                            headers,
                            trailers,
                        },
                    };
                }
                None => {
                    return ResponseMessage::Failure {
                        error: RpcError::Protocol("stream ended without a completion".into()),
                        headers,
                        trailers: HeaderMap::new(),
                    };
                }
            }
        }
    }
}

/// The receive pump: transport events in, typed results out.
///
/// Any failure inside the pump terminates the stream with a `Complete`; the
/// pump itself never errors out.
async fn run_receive_pump<Res>(
    mut events: mpsc::Receiver<TransportEvent>,
    mut stream_result: StreamResultFunction,
    decode: DecodeFn<Res>,
    tx: mpsc::Sender<StreamResult<Res>>,
    state: Arc<StreamState>,
    abort: AbortHandle,
    timeout: Option<std::time::Duration>,
) {
    let deadline = timeout.map(tokio::time::sleep);
    tokio::pin!(deadline);

    let mut buf = BytesMut::new();
    let mut headers_delivered = false;

    'pump: loop {
        let event = match deadline.as_mut().as_pin_mut() {
            Some(sleep) => {
                tokio::select! {
                    _ = sleep => {
                        abort.abort();
                        deliver_complete(
                            &tx,
                            &state,
                            StreamResult::Complete {
                                code: Code::DeadlineExceeded,
                                error: Some(RpcError::deadline_exceeded()),
                                trailers: HeaderMap::new(),
                            },
                        )
                        .await;
                        break 'pump;
                    }
                    event = events.recv() => event,
                }
            }
            None => events.recv().await,
        };

        let Some(event) = event else {
            // Transport EOF with no terminal result from the interceptor.
            if !state.is_completed() {
                deliver_complete(
                    &tx,
                    &state,
                    StreamResult::Complete {
                        code: Code::Unknown,
                        error: Some(RpcError::Status(Status::new(
                            Code::Unknown,
                            "stream closed without a completion",
                        ))),
                        trailers: HeaderMap::new(),
                    },
                )
                .await;
            }
            break 'pump;
        };

        match event {
            TransportEvent::Headers { status, headers } => {
                if !(200..300).contains(&status) {
                    let code = Code::from_http_status(status);
                    deliver_complete(
                        &tx,
                        &state,
                        StreamResult::Complete {
                            code,
                            error: Some(RpcError::Status(
                                Status::new(code, format!("unexpected HTTP status {status}"))
                                    .with_metadata(headers.clone()),
                            )),
                            trailers: headers,
                        },
                    )
                    .await;
                    break 'pump;
                }
                if !handle_result(
                    StreamResult::Headers { headers },
                    &mut stream_result,
                    &decode,
                    &tx,
                    &state,
                    &mut headers_delivered,
                )
                .await
                {
                    break 'pump;
                }
            }
            TransportEvent::Data(bytes) => {
                buf.extend_from_slice(&bytes);
                while let Some(frame) = split_frame(&mut buf) {
                    if !handle_result(
                        StreamResult::Message { message: frame },
                        &mut stream_result,
                        &decode,
                        &tx,
                        &state,
                        &mut headers_delivered,
                    )
                    .await
                    {
                        break 'pump;
                    }
                }
            }
            TransportEvent::Trailers(trailers) => {
                if !handle_result(
                    StreamResult::Complete {
                        code: Code::Ok,
                        error: None,
                        trailers,
                    },
                    &mut stream_result,
                    &decode,
                    &tx,
                    &state,
                    &mut headers_delivered,
                )
                .await
                {
                    break 'pump;
                }
            }
            TransportEvent::Error(error) => {
                debug!(error = %error, "transport stream failed");
                deliver_complete(&tx, &state, StreamResult::completed_with(error)).await;
                break 'pump;
            }
        }
    }
}

/// Run one raw result through the interceptor chain and deliver it. Returns
/// false once the stream is terminal and the pump should stop.
async fn handle_result<Res>(
    raw: StreamResult<Bytes>,
    stream_result: &mut StreamResultFunction,
    decode: &DecodeFn<Res>,
    tx: &mpsc::Sender<StreamResult<Res>>,
    state: &Arc<StreamState>,
    headers_delivered: &mut bool,
) -> bool {
    match stream_result(raw) {
        StreamResult::Headers { headers } => {
            if *headers_delivered {
                return true;
            }
            *headers_delivered = true;
            tx.send(StreamResult::Headers { headers }).await.is_ok()
        }
        StreamResult::Message { message } => {
            if state.is_completed() {
                // Terminal result already produced; late messages are dropped.
                return false;
            }
            match decode(&message) {
                Ok(message) => tx.send(StreamResult::Message { message }).await.is_ok(),
                Err(error) => {
                    deliver_complete(tx, state, StreamResult::completed_with(error)).await;
                    false
                }
            }
        }
        StreamResult::Complete {
            code,
            error,
            trailers,
        } => {
            deliver_complete(
                tx,
                state,
                StreamResult::Complete {
                    code,
                    error,
                    trailers,
                },
            )
            .await;
            false
        }
    }
}

/// Deliver the terminal result at most once.
async fn deliver_complete<Res>(
    tx: &mpsc::Sender<StreamResult<Res>>,
    state: &Arc<StreamState>,
    complete: StreamResult<Res>,
) {
    if !state.mark_completed() {
        return;
    }
    state.close_remote();
    if let StreamResult::Complete { code, .. } = &complete {
        debug!(code = %code, "stream completed");
    }
    let _ = tx.send(complete).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::StreamFunction;
    use crate::transport::BoxFuture;
    use std::sync::atomic::AtomicUsize;
    use triwire_core::pack;

    struct NullWriter;

    impl StreamWriter for NullWriter {
        fn send(&mut self, _frame: Bytes) -> BoxFuture<'_, Result<(), RpcError>> {
            Box::pin(async { Ok(()) })
        }

        fn send_close(&mut self) -> BoxFuture<'_, Result<(), RpcError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn transport_pair(
        aborts: Arc<AtomicUsize>,
    ) -> (mpsc::Sender<TransportEvent>, TransportStream) {
        let (tx, rx) = mpsc::channel(32);
        let stream = TransportStream {
            writer: Box::new(NullWriter),
            events: rx,
            abort: AbortHandle::new(move || {
                aborts.fetch_add(1, Ordering::SeqCst);
            }),
        };
        (tx, stream)
    }

    fn spawn_stream(
        transport_stream: TransportStream,
    ) -> BidirectionalStream<Vec<u8>, Vec<u8>> {
        let funcs = StreamFunction::identity();
        BidirectionalStream::spawn(
            transport_stream,
            funcs.request_body,
            funcs.stream_result,
            Arc::new(|message: &Vec<u8>| Ok(Bytes::copy_from_slice(message))),
            Arc::new(|bytes: &[u8]| Ok(bytes.to_vec())),
            None,
        )
    }

    #[tokio::test]
    async fn results_arrive_in_order() {
        let (tx, transport_stream) = transport_pair(Arc::new(AtomicUsize::new(0)));
        let mut stream = spawn_stream(transport_stream);

        tx.send(TransportEvent::Headers {
            status: 200,
            headers: HeaderMap::new(),
        })
        .await
        .unwrap();
        // two frames in one chunk, arbitrary split
        let mut data = pack(b"one", None, 0).unwrap().to_vec();
        data.extend_from_slice(&pack(b"two", None, 0).unwrap());
        tx.send(TransportEvent::Data(Bytes::from(data))).await.unwrap();
        tx.send(TransportEvent::Trailers(HeaderMap::new())).await.unwrap();
        drop(tx);

        assert!(matches!(
            stream.receive().await,
            Some(StreamResult::Headers { .. })
        ));
        assert!(matches!(
            stream.receive().await,
            Some(StreamResult::Message { .. })
        ));
        assert!(matches!(
            stream.receive().await,
            Some(StreamResult::Message { .. })
        ));
        match stream.receive().await {
            Some(StreamResult::Complete { code, .. }) => assert_eq!(code, Code::Ok),
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(stream.receive().await.is_none());
    }

    #[tokio::test]
    async fn eof_without_completion_synthesizes_unknown() {
        let (tx, transport_stream) = transport_pair(Arc::new(AtomicUsize::new(0)));
        let mut stream = spawn_stream(transport_stream);

        tx.send(TransportEvent::Headers {
            status: 200,
            headers: HeaderMap::new(),
        })
        .await
        .unwrap();
        drop(tx);

        assert!(matches!(
            stream.receive().await,
            Some(StreamResult::Headers { .. })
        ));
        match stream.receive().await {
            Some(StreamResult::Complete { code, error, .. }) => {
                assert_eq!(code, Code::Unknown);
                assert!(error.is_some());
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn receive_close_cancels_exactly_once() {
        let aborts = Arc::new(AtomicUsize::new(0));
        let (tx, transport_stream) = transport_pair(aborts.clone());
        let mut stream = spawn_stream(transport_stream);

        tx.send(TransportEvent::Headers {
            status: 200,
            headers: HeaderMap::new(),
        })
        .await
        .unwrap();
        tx.send(TransportEvent::Data(pack(b"m", None, 0).unwrap()))
            .await
            .unwrap();

        assert!(matches!(
            stream.receive().await,
            Some(StreamResult::Headers { .. })
        ));
        assert!(matches!(
            stream.receive().await,
            Some(StreamResult::Message { .. })
        ));

        stream.receive_close();
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
        assert!(stream.is_closed());

        match stream.receive().await {
            Some(StreamResult::Complete { code, .. }) => assert_eq!(code, Code::Canceled),
            other => panic!("expected canceled completion, got {other:?}"),
        }
        // exactly once: the channel is closed afterwards
        assert!(stream.receive().await.is_none());
        assert!(stream.receive().await.is_none());

        // bytes arriving after cancellation are discarded
        let _ = tx.send(TransportEvent::Data(pack(b"late", None, 0).unwrap())).await;
    }

    #[tokio::test]
    async fn send_after_close_fails_precondition() {
        let (_tx, transport_stream) = transport_pair(Arc::new(AtomicUsize::new(0)));
        let mut stream = spawn_stream(transport_stream);

        stream.send(&b"first".to_vec()).await.unwrap();
        stream.send_close().await.unwrap();
        assert!(stream.is_send_closed());

        let err = stream.send(&b"late".to_vec()).await.unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);

        // idempotent
        stream.send_close().await.unwrap();
    }

    #[tokio::test]
    async fn decode_failure_completes_internal() {
        let (tx, transport_stream) = transport_pair(Arc::new(AtomicUsize::new(0)));
        let funcs = StreamFunction::identity();
        let mut stream: BidirectionalStream<Vec<u8>, Vec<u8>> = BidirectionalStream::spawn(
            transport_stream,
            funcs.request_body,
            funcs.stream_result,
            Arc::new(|message: &Vec<u8>| Ok(Bytes::copy_from_slice(message))),
            Arc::new(|_: &[u8]| Err(RpcError::Decode("mangled".into()))),
            None,
        );

        tx.send(TransportEvent::Data(pack(b"m", None, 0).unwrap()))
            .await
            .unwrap();

        match stream.receive().await {
            Some(StreamResult::Complete { code, error, .. }) => {
                assert_eq!(code, Code::Internal);
                assert!(matches!(error, Some(RpcError::Decode(_))));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_error_maps_to_unavailable() {
        let (tx, transport_stream) = transport_pair(Arc::new(AtomicUsize::new(0)));
        let mut stream = spawn_stream(transport_stream);

        tx.send(TransportEvent::Error(RpcError::Transport("reset".into())))
            .await
            .unwrap();

        match stream.receive().await {
            Some(StreamResult::Complete { code, .. }) => assert_eq!(code, Code::Unavailable),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deadline_expiry_cancels_with_deadline_exceeded() {
        let aborts = Arc::new(AtomicUsize::new(0));
        let (_tx, transport_stream) = transport_pair(aborts.clone());
        let funcs = StreamFunction::identity();
        let mut stream: BidirectionalStream<Vec<u8>, Vec<u8>> = BidirectionalStream::spawn(
            transport_stream,
            funcs.request_body,
            funcs.stream_result,
            Arc::new(|message: &Vec<u8>| Ok(Bytes::copy_from_slice(message))),
            Arc::new(|bytes: &[u8]| Ok(bytes.to_vec())),
            Some(std::time::Duration::from_millis(20)),
        );

        match stream.receive().await {
            Some(StreamResult::Complete { code, .. }) => {
                assert_eq!(code, Code::DeadlineExceeded)
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bad_http_status_completes_stream() {
        let (tx, transport_stream) = transport_pair(Arc::new(AtomicUsize::new(0)));
        let mut stream = spawn_stream(transport_stream);

        tx.send(TransportEvent::Headers {
            status: 503,
            headers: HeaderMap::new(),
        })
        .await
        .unwrap();

        match stream.receive().await {
            Some(StreamResult::Complete { code, .. }) => assert_eq!(code, Code::Unavailable),
            other => panic!("expected completion, got {other:?}"),
        }
    }
}
