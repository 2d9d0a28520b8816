//! Channel-backed transport for session and manager integration tests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;

use mojolink_lib::session::{ConnectRequest, FrameSink, FrameStream, Transport, TransportError};

type Inbound = mpsc::UnboundedSender<Result<String, TransportError>>;

#[derive(Default)]
struct MockState {
    requests: Vec<ConnectRequest>,
    written: Vec<String>,
    inbound: Option<Inbound>,
    fail_next: Option<TransportError>,
    open_delay: Option<Duration>,
}

/// A fake backend. Every `open` succeeds unless a failure was queued; the
/// test side pushes inbound frames and inspects what the client wrote.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Fail the next `open` with `err`.
    pub fn fail_next_with(&self, err: TransportError) {
        self.lock().fail_next = Some(err);
    }

    /// Hold every `open` for `delay` before completing the handshake.
    pub fn set_open_delay(&self, delay: Duration) {
        self.lock().open_delay = Some(delay);
    }

    pub fn push(&self, frame: &str) {
        let state = self.lock();
        let inbound = state.inbound.as_ref().expect("no open connection");
        inbound.unbounded_send(Ok(frame.to_string())).unwrap();
    }

    pub fn push_error(&self, err: TransportError) {
        let state = self.lock();
        let inbound = state.inbound.as_ref().expect("no open connection");
        inbound.unbounded_send(Err(err)).unwrap();
    }

    /// End the inbound stream as if the server closed the socket.
    pub fn close_from_server(&self) {
        self.lock().inbound.take();
    }

    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.lock().requests.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().requests.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, request: &ConnectRequest) -> Result<(FrameSink, FrameStream), TransportError> {
        let (delay, failure) = {
            let mut state = self.lock();
            state.requests.push(request.clone());
            (state.open_delay, state.fail_next.take())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded();
        self.lock().inbound = Some(inbound_tx);

        let recorder = self.state.clone();
        let sink = futures::sink::unfold(recorder, |recorder, frame: String| async move {
            recorder.lock().unwrap().written.push(frame);
            Ok::<_, TransportError>(recorder)
        });

        let sink: FrameSink = Box::pin(sink);
        let stream: FrameStream = Box::pin(inbound_rx);
        Ok((sink, stream))
    }
}
