use crate::model::{ConnectionState, TargetDescriptor};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, trace, warn};

/// How long a locally closed socket task may spend on its close handshake.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("target descriptor is incomplete (pod and container are required)")]
    InvalidTarget,
    #[error("channel is not connected yet")]
    NotReady,
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("channel was already used and closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: String,
}

/// Raw events produced by the socket task, in receipt order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Message(Vec<u8>),
    Closed(CloseInfo),
    Failed(String),
}

/// Events handed to the channel owner after the state machine applied them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    StateChanged(ConnectionState),
    Message(Vec<u8>),
    Error(String),
}

pub trait ChannelObserver: Send {
    fn on_state_change(&mut self, state: ConnectionState);
    fn on_message(&mut self, data: &[u8]);
    fn on_error(&mut self, info: &str);
}

impl ChannelObserver for mpsc::UnboundedSender<ChannelEvent> {
    fn on_state_change(&mut self, state: ConnectionState) {
        let _ = self.send(ChannelEvent::StateChanged(state));
    }

    fn on_message(&mut self, data: &[u8]) {
        let _ = self.send(ChannelEvent::Message(data.to_vec()));
    }

    fn on_error(&mut self, info: &str) {
        let _ = self.send(ChannelEvent::Error(info.to_string()));
    }
}

/// The two queue ends a socket task works with.
pub struct SocketLink {
    pub outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    pub events: mpsc::UnboundedSender<SocketEvent>,
}

pub trait Connector: Send + Sync {
    fn launch(&self, url: &str, link: SocketLink) -> Option<JoinHandle<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub struct TransportChannel {
    target: TargetDescriptor,
    connector: Arc<dyn Connector>,
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    events: Option<mpsc::UnboundedReceiver<SocketEvent>>,
    task: Option<JoinHandle<()>>,
    observers: Vec<(ObserverId, Box<dyn ChannelObserver>)>,
    next_observer: u64,
    close_info: Option<CloseInfo>,
    last_error: Option<ChannelError>,
}

impl TransportChannel {
    pub fn new(target: TargetDescriptor, connector: Arc<dyn Connector>) -> Self {
        Self {
            target,
            connector,
            state: ConnectionState::Idle,
            outbound: None,
            events: None,
            task: None,
            observers: Vec::new(),
            next_observer: 0,
            close_info: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn close_info(&self) -> Option<&CloseInfo> {
        self.close_info.as_ref()
    }

    pub fn last_error(&self) -> Option<&ChannelError> {
        self.last_error.as_ref()
    }

    pub fn observe(&mut self, observer: Box<dyn ChannelObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    pub fn open(&mut self, url: &str) -> Result<(), ChannelError> {
        if !self.target.is_complete() {
            return Err(ChannelError::InvalidTarget);
        }
        if self.state != ConnectionState::Idle {
            return Err(ChannelError::Closed);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.outbound = Some(outbound_tx);
        self.events = Some(events_rx);
        self.transition(ConnectionState::Connecting);
        self.task = self.connector.launch(
            url,
            SocketLink {
                outbound: outbound_rx,
                events: events_tx,
            },
        );
        debug!(pod = %self.target, "channel opening");
        Ok(())
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        if self.state != ConnectionState::Connected {
            return Err(ChannelError::NotReady);
        }
        let Some(outbound) = self.outbound.as_ref() else {
            return Err(ChannelError::NotReady);
        };

        if outbound.send(data.to_vec()).is_err() {
            let error = "socket writer stopped".to_string();
            self.fail(error.clone());
            return Err(ChannelError::TransportFailure(error));
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.observers.clear();
        self.outbound = None;
        self.events = None;
        if let Some(task) = self.task.take() {
            reap_socket_task(task);
        }
        if self.state.is_live() {
            debug!(pod = %self.target, "channel closed locally");
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Waits for the next socket event and applies it. Pends forever when the
    /// channel has nothing left to deliver. Cancel-safe.
    pub async fn next_event(&mut self) -> ChannelEvent {
        loop {
            let Some(events) = self.events.as_mut() else {
                return std::future::pending().await;
            };
            let socket_event = events.recv().await;
            if let Some(event) = self.apply(socket_event) {
                return event;
            }
        }
    }

    pub fn try_next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            let events = self.events.as_mut()?;
            let socket_event = match events.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => None,
            };
            if let Some(event) = self.apply(socket_event) {
                return Some(event);
            }
        }
    }

    fn apply(&mut self, socket_event: Option<SocketEvent>) -> Option<ChannelEvent> {
        let Some(socket_event) = socket_event else {
            self.events = None;
            if self.state.is_live() {
                return Some(self.fail("socket task ended without a close frame".to_string()));
            }
            return None;
        };

        match socket_event {
            SocketEvent::Opened if self.state == ConnectionState::Connecting => {
                self.transition(ConnectionState::Connected);
                Some(ChannelEvent::StateChanged(ConnectionState::Connected))
            }
            SocketEvent::Opened => {
                trace!(state = self.state.label(), "ignoring late open event");
                None
            }
            SocketEvent::Message(data) if self.state == ConnectionState::Connected => {
                for (_, observer) in &mut self.observers {
                    observer.on_message(&data);
                }
                Some(ChannelEvent::Message(data))
            }
            SocketEvent::Message(data) => {
                trace!(
                    bytes = data.len(),
                    state = self.state.label(),
                    "dropping frame outside connected state"
                );
                None
            }
            SocketEvent::Closed(info) => {
                debug!(
                    pod = %self.target,
                    code = ?info.code,
                    reason = %info.reason,
                    "channel closed by remote"
                );
                self.close_info = Some(info);
                self.outbound = None;
                self.events = None;
                self.transition(ConnectionState::Disconnected);
                Some(ChannelEvent::StateChanged(ConnectionState::Disconnected))
            }
            SocketEvent::Failed(error) => Some(self.fail(error)),
        }
    }

    fn fail(&mut self, error: String) -> ChannelEvent {
        warn!(pod = %self.target, "channel failure: {error}");
        self.last_error = Some(ChannelError::TransportFailure(error.clone()));
        self.outbound = None;
        self.events = None;
        for (_, observer) in &mut self.observers {
            observer.on_error(&error);
        }
        self.transition(ConnectionState::Error);
        ChannelEvent::Error(error)
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        trace!(from = self.state.label(), to = next.label(), "channel state");
        self.state = next;
        for (_, observer) in &mut self.observers {
            observer.on_state_change(next);
        }
    }
}

/// Lets the task finish once its outbound queue is gone, aborting it after `CLOSE_GRACE`.
fn reap_socket_task(task: JoinHandle<()>) {
    if task.is_finished() {
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        task.abort();
        return;
    };
    let abort = task.abort_handle();
    runtime.spawn(async move {
        if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
            debug!("socket task missed the close grace period, aborting");
            abort.abort();
        }
    });
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.close();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedConnector;
    use super::{
        CLOSE_GRACE, ChannelError, ChannelEvent, ChannelObserver, Connector, SocketEvent,
        SocketLink, TransportChannel,
    };
    use crate::model::{ConnectionState, TargetDescriptor};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::task::JoinHandle;
    use tokio::time::{Duration, sleep};

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl ChannelObserver for Recorder {
        fn on_state_change(&mut self, state: ConnectionState) {
            self.seen
                .lock()
                .expect("recorder")
                .push(format!("state:{}", state.label()));
        }

        fn on_message(&mut self, data: &[u8]) {
            self.seen
                .lock()
                .expect("recorder")
                .push(format!("msg:{}", String::from_utf8_lossy(data)));
        }

        fn on_error(&mut self, info: &str) {
            self.seen
                .lock()
                .expect("recorder")
                .push(format!("error:{info}"));
        }
    }

    fn channel(connector: &ScriptedConnector) -> TransportChannel {
        TransportChannel::new(
            TargetDescriptor::new("default", "web-1", "app"),
            Arc::new(connector.clone()),
        )
    }

    #[test]
    fn incomplete_target_fails_fast() {
        let connector = ScriptedConnector::default();
        let mut channel = TransportChannel::new(
            TargetDescriptor::new("default", "web-1", ""),
            Arc::new(connector.clone()),
        );
        assert_eq!(channel.open("ws://x"), Err(ChannelError::InvalidTarget));
        assert_eq!(channel.state(), ConnectionState::Idle);
        assert_eq!(connector.launches(), 0);
    }

    #[test]
    fn send_is_rejected_until_connected() {
        let connector = ScriptedConnector::default();
        let mut channel = channel(&connector);
        assert_eq!(channel.send(b"ls"), Err(ChannelError::NotReady));

        channel.open("ws://x").expect("open");
        assert_eq!(channel.state(), ConnectionState::Connecting);
        let mut link = connector.take_link();
        assert_eq!(channel.send(b"ls"), Err(ChannelError::NotReady));

        link.fail("refused");
        assert_eq!(
            channel.try_next_event(),
            Some(ChannelEvent::Error("refused".to_string()))
        );
        assert_eq!(channel.send(b"ls"), Err(ChannelError::NotReady));
        assert!(link.sent().is_empty());
    }

    #[test]
    fn connected_channel_forwards_frames_in_order() {
        let connector = ScriptedConnector::default();
        let mut channel = channel(&connector);
        channel.open("ws://x").expect("open");
        let mut link = connector.take_link();

        link.open();
        link.push(b"one");
        link.push(b"two");
        assert_eq!(
            channel.try_next_event(),
            Some(ChannelEvent::StateChanged(ConnectionState::Connected))
        );
        assert_eq!(
            channel.try_next_event(),
            Some(ChannelEvent::Message(b"one".to_vec()))
        );
        assert_eq!(
            channel.try_next_event(),
            Some(ChannelEvent::Message(b"two".to_vec()))
        );
        assert_eq!(channel.try_next_event(), None);

        channel.send(b"\r").expect("send");
        assert_eq!(link.sent(), vec![b"\r".to_vec()]);
    }

    #[test]
    fn remote_close_records_code_and_reason() {
        let connector = ScriptedConnector::default();
        let mut channel = channel(&connector);
        channel.open("ws://x").expect("open");
        let link = connector.take_link();
        link.open();
        link.close(1001, "pod terminated");
        let _ = channel.try_next_event();

        assert_eq!(
            channel.try_next_event(),
            Some(ChannelEvent::StateChanged(ConnectionState::Disconnected))
        );
        let info = channel.close_info().expect("close info");
        assert_eq!(info.code, Some(1001));
        assert_eq!(info.reason, "pod terminated");
        assert_eq!(channel.open("ws://x"), Err(ChannelError::Closed));
    }

    #[test]
    fn failure_is_terminal_and_reported_to_observers() {
        let connector = ScriptedConnector::default();
        let mut channel = channel(&connector);
        let recorder = Recorder::default();
        channel.observe(Box::new(recorder.clone()));
        channel.open("ws://x").expect("open");
        let link = connector.take_link();
        link.open();
        link.fail("connection reset");
        while channel.try_next_event().is_some() {}

        assert_eq!(channel.state(), ConnectionState::Error);
        assert_eq!(
            channel.last_error(),
            Some(&ChannelError::TransportFailure("connection reset".to_string()))
        );
        assert_eq!(
            recorder.seen.lock().expect("recorder").clone(),
            vec![
                "state:connecting".to_string(),
                "state:connected".to_string(),
                "error:connection reset".to_string(),
                "state:error".to_string(),
            ]
        );
    }

    #[test]
    fn close_unregisters_observers_before_anything_else() {
        let connector = ScriptedConnector::default();
        let mut channel = channel(&connector);
        let recorder = Recorder::default();
        channel.observe(Box::new(recorder.clone()));
        channel.open("ws://x").expect("open");
        let link = connector.take_link();
        link.open();
        let _ = channel.try_next_event();
        recorder.seen.lock().expect("recorder").clear();

        link.push(b"late");
        channel.close();
        channel.close();

        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert_eq!(channel.try_next_event(), None);
        assert!(recorder.seen.lock().expect("recorder").is_empty());
        assert!(link.is_released());
    }

    #[test]
    fn unobserve_stops_delivery_to_that_observer() {
        let connector = ScriptedConnector::default();
        let mut channel = channel(&connector);
        let recorder = Recorder::default();
        let id = channel.observe(Box::new(recorder.clone()));
        assert!(channel.unobserve(id));
        assert!(!channel.unobserve(id));

        channel.open("ws://x").expect("open");
        assert!(recorder.seen.lock().expect("recorder").is_empty());
    }

    /// Socket task that spends `linger` on its close handshake once the outbound queue drops.
    #[derive(Clone)]
    struct LingeringConnector {
        linger: Duration,
        finished: Arc<AtomicBool>,
        alive: Arc<()>,
    }

    impl LingeringConnector {
        fn new(linger: Duration) -> Self {
            Self {
                linger,
                finished: Arc::new(AtomicBool::new(false)),
                alive: Arc::new(()),
            }
        }
    }

    impl Connector for LingeringConnector {
        fn launch(&self, _url: &str, link: SocketLink) -> Option<JoinHandle<()>> {
            let linger = self.linger;
            let finished = self.finished.clone();
            let alive = self.alive.clone();
            let SocketLink {
                mut outbound,
                events,
            } = link;
            Some(tokio::spawn(async move {
                let _alive = alive;
                let _ = events.send(SocketEvent::Opened);
                while outbound.recv().await.is_some() {}
                sleep(linger).await;
                finished.store(true, Ordering::SeqCst);
            }))
        }
    }

    async fn connected(connector: &LingeringConnector) -> TransportChannel {
        let mut channel = TransportChannel::new(
            TargetDescriptor::new("default", "web-1", "app"),
            Arc::new(connector.clone()),
        );
        channel.open("ws://x").expect("open");
        assert_eq!(
            channel.next_event().await,
            ChannelEvent::StateChanged(ConnectionState::Connected)
        );
        channel
    }

    #[tokio::test(start_paused = true)]
    async fn close_lets_the_socket_task_finish_its_handshake() {
        let connector = LingeringConnector::new(Duration::from_millis(50));
        let mut channel = connected(&connector).await;

        channel.close();
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        sleep(CLOSE_GRACE).await;
        assert!(connector.finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn close_aborts_a_socket_task_that_overstays_the_grace_period() {
        let connector = LingeringConnector::new(Duration::from_secs(60));
        let mut channel = connected(&connector).await;
        // test handle, the channel's connector, the socket task
        assert_eq!(Arc::strong_count(&connector.alive), 3);

        channel.close();
        sleep(CLOSE_GRACE * 2).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(!connector.finished.load(Ordering::SeqCst));
        assert_eq!(Arc::strong_count(&connector.alive), 2);
    }
}
