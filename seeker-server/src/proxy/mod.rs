//! The component proxy fabric.
//!
//! One [`ComponentProxy`] exists per remote hardware connection. The proxy
//! owns the socket's framing, message-number bookkeeping, and the cached
//! intrinsics/status snapshots; readers of the caches never contend with
//! socket I/O. Typed wrappers ([`TelescopeProxy`], [`DetectorProxy`], ...)
//! add each component family's command vocabulary on top of the shared
//! machinery.

mod kinds;

pub use kinds::{
    ArchiverProxy, ChannelizerProxy, ControlProxy, DetectorProxy, IfChainProxy,
    TelescopeProxy, TestSignalProxy,
};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use seeker_contracts::{
    ComponentContract, ComponentError, FrameCodec, InboundFrame, Intrinsics,
    MessageCode, MessageHeader, OutboundFrame, StatusReport, WireError,
};
use seeker_model::{ActivityId, ComponentKind, WireTimestamp};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::activity::events::{ActivityEvent, ActivityHandle};
use crate::manager::ComponentManager;

/// Connection lifecycle of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyLifecycle {
    Unconnected,
    Connected,
    Registered,
    Shutdown,
}

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// State shared between the proxy handle, its I/O tasks, and the manager.
pub struct ProxyShared {
    id: u64,
    kind: ComponentKind,
    expected_interface_version: String,
    remote_host: String,

    // Caches behind their own locks so status reads never block I/O.
    name: RwLock<String>,
    intrinsics: RwLock<Option<Intrinsics>>,
    status: RwLock<Option<StatusReport>>,
    lifecycle: RwLock<ProxyLifecycle>,

    /// Non-owning back-reference to the attached activity, cleared on
    /// detach; the activity owns nothing in the fabric.
    attached: Mutex<Option<ActivityHandle>>,

    outbound: mpsc::Sender<OutboundFrame>,
    send_message_number: AtomicU32,
    expected_receive_message_number: AtomicU32,
    close_tx: watch::Sender<bool>,
    verbose: AtomicBool,
}

impl std::fmt::Debug for ProxyShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyShared")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &*self.name.read())
            .field("remote_host", &self.remote_host)
            .field("lifecycle", &*self.lifecycle.read())
            .finish()
    }
}

/// Cheaply cloneable handle to one remote component.
#[derive(Debug, Clone)]
pub struct ComponentProxy {
    shared: Arc<ProxyShared>,
}

impl ComponentProxy {
    /// Build a proxy plus the receiving end of its outbound queue. The
    /// caller (listener or test) decides what drains the queue.
    pub fn new(
        kind: ComponentKind,
        remote_host: impl Into<String>,
        expected_interface_version: impl Into<String>,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (close_tx, _) = watch::channel(false);
        let shared = Arc::new(ProxyShared {
            id: NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            expected_interface_version: expected_interface_version.into(),
            remote_host: remote_host.into(),
            name: RwLock::new(String::from("unknown")),
            intrinsics: RwLock::new(None),
            status: RwLock::new(None),
            lifecycle: RwLock::new(ProxyLifecycle::Connected),
            attached: Mutex::new(None),
            outbound,
            send_message_number: AtomicU32::new(seeker_contracts::header::INITIAL_MESSAGE_NUMBER),
            expected_receive_message_number: AtomicU32::new(
                seeker_contracts::header::INITIAL_MESSAGE_NUMBER,
            ),
            close_tx,
            verbose: AtomicBool::new(false),
        });
        (Self { shared }, outbound_rx)
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn kind(&self) -> ComponentKind {
        self.shared.kind
    }

    pub fn lifecycle(&self) -> ProxyLifecycle {
        *self.shared.lifecycle.read()
    }

    pub fn set_lifecycle(&self, lifecycle: ProxyLifecycle) {
        *self.shared.lifecycle.write() = lifecycle;
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.shared.verbose.store(verbose, Ordering::Relaxed);
    }

    pub fn verbose(&self) -> bool {
        self.shared.verbose.load(Ordering::Relaxed)
    }

    /// Attach the proxy to an activity; component messages and stage acks
    /// flow to the activity's event queue until detach.
    pub fn attach_activity(&self, handle: ActivityHandle) {
        *self.shared.attached.lock() = Some(handle);
    }

    pub fn detach_activity(&self) {
        *self.shared.attached.lock() = None;
    }

    pub fn attached_activity_id(&self) -> Option<ActivityId> {
        self.shared.attached.lock().as_ref().map(|h| h.activity_id)
    }

    fn forward_to_activity(&self, event: ActivityEvent) {
        let attached = self.shared.attached.lock();
        if let Some(handle) = attached.as_ref() {
            // A full/closed queue means the activity is tearing down; the
            // event is moot.
            let _ = handle.events.send(event);
        }
    }

    /// Queue a frame; message number and timestamp are stamped in send
    /// order by the writer.
    async fn enqueue(&self, code: MessageCode, activity_id: ActivityId, body: Bytes) -> Result<(), WireError> {
        let frame = OutboundFrame {
            header: MessageHeader::new(code, activity_id),
            body,
        };
        self.shared
            .outbound
            .send(frame)
            .await
            .map_err(|_| WireError::Io(std::io::Error::other("proxy outbound queue closed")))
    }

    fn stamp(&self, mut frame: OutboundFrame) -> OutboundFrame {
        frame.header.message_number = self
            .shared
            .send_message_number
            .fetch_add(1, Ordering::SeqCst);
        frame.header.timestamp = WireTimestamp::now();
        frame
    }

    /// Sequence-check an inbound message number, resyncing on mismatch.
    fn check_receive_number(&self, got: u32) {
        let expected = self
            .shared
            .expected_receive_message_number
            .load(Ordering::SeqCst);
        if got != expected {
            warn!(
                component = %self.name(),
                expected,
                got,
                "out-of-sequence message number; resyncing"
            );
        }
        self.shared
            .expected_receive_message_number
            .store(got.wrapping_add(1), Ordering::SeqCst);
    }

    fn store_intrinsics(&self, intrinsics: Intrinsics) {
        *self.shared.name.write() = intrinsics.name.clone();
        *self.shared.intrinsics.write() = Some(intrinsics);
    }

    fn store_status(&self, status: StatusReport) {
        *self.shared.status.write() = Some(status);
    }

    /// Handle one framed message. Split out of the socket loop so the
    /// handshake and dispatch logic is testable without a network.
    pub async fn handle_inbound<P>(&self, frame: InboundFrame, manager: &ComponentManager<P>)
    where
        P: ManagedProxy,
    {
        self.check_receive_number(frame.header.message_number);
        if self.verbose() {
            debug!(component = %self.name(), code = %frame.header.code, "inbound frame");
        }

        match frame.header.code {
            MessageCode::Intrinsics => match Intrinsics::unpack(frame.body) {
                Ok(intrinsics) => {
                    self.store_intrinsics(intrinsics);
                    manager.receive_intrinsics(self).await;
                }
                Err(err) => {
                    error!(component = %self.name(), %err, "bad intrinsics body");
                }
            },
            MessageCode::Status => match StatusReport::unpack(frame.body) {
                Ok(status) => {
                    self.store_status(status);
                    manager.notify_status_changed(self);
                }
                Err(err) => {
                    error!(component = %self.name(), %err, "bad status body");
                }
            },
            MessageCode::Error | MessageCode::Message => {
                match ComponentError::unpack(frame.body) {
                    Ok(component_error) => {
                        self.forward_to_activity(ActivityEvent::ComponentMessage {
                            kind: self.kind(),
                            name: self.name(),
                            error: component_error.clone(),
                        });
                        manager.process_component_message(
                            self,
                            &component_error,
                            frame.header.activity_id,
                        );
                    }
                    Err(err) => {
                        error!(component = %self.name(), %err, "bad error body");
                    }
                }
            }
            MessageCode::Ready => {
                self.forward_to_activity(ActivityEvent::ComponentReady {
                    kind: self.kind(),
                    name: self.name(),
                });
            }
            MessageCode::DetectorTuned => {
                self.forward_to_activity(ActivityEvent::DetectorTuned { name: self.name() });
            }
            MessageCode::DetectorDataCollectionStarted => {
                self.forward_to_activity(ActivityEvent::DataCollectionStarted {
                    name: self.name(),
                });
            }
            MessageCode::DetectorDataCollectionComplete => {
                self.forward_to_activity(ActivityEvent::DataCollectionComplete {
                    name: self.name(),
                });
            }
            MessageCode::DetectorSignalDetectionStarted => {
                self.forward_to_activity(ActivityEvent::SignalDetectionStarted {
                    name: self.name(),
                });
            }
            MessageCode::DetectorSignalDetectionComplete => {
                self.forward_to_activity(ActivityEvent::SignalDetectionComplete {
                    name: self.name(),
                });
            }
            MessageCode::DetectorCandidateResults => {
                self.forward_to_activity(ActivityEvent::CandidateResults {
                    name: self.name(),
                    body: frame.body,
                });
            }
            MessageCode::DetectorDoneSendingCandidateResults => {
                self.forward_to_activity(ActivityEvent::DoneSendingCandidateResults {
                    name: self.name(),
                });
            }
            MessageCode::DetectorActivityComplete => {
                self.forward_to_activity(ActivityEvent::ActivityUnitComplete {
                    name: self.name(),
                });
            }
            other => {
                debug!(component = %self.name(), code = %other, "unhandled inbound code");
            }
        }
    }
}

#[async_trait]
impl ComponentContract for ComponentProxy {
    fn name(&self) -> String {
        self.shared.name.read().clone()
    }

    fn remote_host(&self) -> String {
        self.shared.remote_host.clone()
    }

    fn cached_intrinsics(&self) -> Option<Intrinsics> {
        self.shared.intrinsics.read().clone()
    }

    fn cached_status(&self) -> Option<StatusReport> {
        self.shared.status.read().clone()
    }

    fn valid_interface_version(&self) -> bool {
        match self.cached_intrinsics() {
            Some(intrinsics) => {
                intrinsics.interface_version == self.shared.expected_interface_version
            }
            None => false,
        }
    }

    async fn request_intrinsics(&self) -> Result<(), WireError> {
        self.enqueue(MessageCode::RequestIntrinsics, ActivityId::NONE, Bytes::new())
            .await
    }

    async fn request_status(&self) -> Result<(), WireError> {
        self.enqueue(MessageCode::RequestStatus, ActivityId::NONE, Bytes::new())
            .await
    }

    async fn send_command(
        &self,
        code: MessageCode,
        activity_id: ActivityId,
        body: Bytes,
    ) -> Result<(), WireError> {
        self.enqueue(code, activity_id, body).await
    }

    async fn shutdown(&self) {
        let _ = self
            .enqueue(MessageCode::Shutdown, ActivityId::NONE, Bytes::new())
            .await;
        self.set_lifecycle(ProxyLifecycle::Shutdown);
        let _ = self.shared.close_tx.send(true);
    }

    async fn reset_socket(&self) {
        self.set_lifecycle(ProxyLifecycle::Shutdown);
        let _ = self.shared.close_tx.send(true);
    }
}

/// What a component manager needs from a proxy type: the shared contract
/// plus construction from the fabric's common machinery.
pub trait ManagedProxy: ComponentContract + Clone + Send + Sync + 'static {
    fn kind() -> ComponentKind;
    fn from_inner(inner: ComponentProxy) -> Self;
    fn inner(&self) -> &ComponentProxy;
}

/// Run a proxy's socket I/O until disconnect, then unregister it.
///
/// The reader demarshals frames and dispatches them; the writer stamps
/// strictly increasing message numbers. Subscriber work never runs on this
/// task beyond posting events.
pub async fn run_proxy_io<P: ManagedProxy>(
    proxy: P,
    manager: Arc<ComponentManager<P>>,
    stream: TcpStream,
    mut outbound_rx: mpsc::Receiver<OutboundFrame>,
) {
    let inner = proxy.inner().clone();
    let (read_half, write_half) = stream.into_split();
    let mut reader = tokio_util::codec::FramedRead::new(read_half, FrameCodec::default());
    let mut writer = tokio_util::codec::FramedWrite::new(write_half, FrameCodec::default());
    let mut close_rx = inner.shared.close_tx.subscribe();

    let writer_inner = inner.clone();
    let write_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let frame = writer_inner.stamp(frame);
            if let Err(err) = writer.send(frame).await {
                warn!(component = %writer_inner.name(), %err, "proxy write failed");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            maybe_frame = reader.next() => {
                match maybe_frame {
                    Some(Ok(frame)) => {
                        inner.handle_inbound(frame, &manager).await;
                    }
                    Some(Err(err)) => {
                        // Oversized bodies and framing damage close the
                        // connection.
                        error!(component = %inner.name(), %err, "proxy read error; resetting socket");
                        break;
                    }
                    None => {
                        info!(component = %inner.name(), "component disconnected");
                        break;
                    }
                }
            }
            _ = close_rx.changed() => {
                if *close_rx.borrow() {
                    break;
                }
            }
        }
    }

    write_task.abort();
    inner.forward_to_activity(ActivityEvent::ComponentDisconnected {
        kind: inner.kind(),
        name: inner.name(),
    });
    inner.detach_activity();
    manager.unregister_proxy(&proxy);
    inner.set_lifecycle(ProxyLifecycle::Shutdown);
}
