//! Upstream client: the node's persistent connection to the host.

use std::sync::Arc;

use async_trait::async_trait;
use codec::envelope::{
    auth_request, implement_request, subscribe_request, task_error, task_event, task_response,
};
use codec::{AuthPayload, Direction, Header, Message, TaskKind, TaskPayload};
use fabric::{dispatch, random_task_id, AuthContext, AuthMethod, ProtocolHandler, TlsFilesConfig};
use network::{Connection, ConnectionEvents, NetworkError, TlsSettings, TransportConfig};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::service::Service;

/// The node's client handle to the host, with automatic reconnect.
pub struct Upstream {
    config: NodeConfig,
    tls: TlsSettings,
    handler: Arc<UpstreamHandler>,
    ready_rx: watch::Receiver<bool>,
    /// Endpoint the last successful connection landed on; reconnects target
    /// it so a redial hits the same host and port.
    last_endpoint: Mutex<Option<(String, u16)>>,
    /// The live upstream connection, if any.
    current: Mutex<Option<Arc<Connection>>>,
}

impl Upstream {
    pub fn new(config: NodeConfig, service: Service) -> fabric::Result<Self> {
        let tls = TlsFilesConfig {
            cert: None,
            key: None,
            trust: config.trust.clone(),
        }
        .load()?;

        let (ready_tx, ready_rx) = watch::channel(false);
        let handler = Arc::new(UpstreamHandler {
            service,
            auth: AuthContext::new(config.auth_key.clone(), AuthMethod::Plain),
            auth_key: config.auth_key.clone(),
            ready_tx,
            pending_acks: std::sync::atomic::AtomicUsize::new(0),
        });

        Ok(Self {
            config,
            tls,
            handler,
            ready_rx,
            last_endpoint: Mutex::new(None),
            current: Mutex::new(None),
        })
    }

    /// Receiver that flips to `true` once this node is authenticated and has
    /// announced its methods and subscriptions.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready_rx.clone()
    }

    /// Dials the upstream once and returns the live connection plus its
    /// driver task.
    pub async fn connect_once(&self) -> fabric::Result<(Arc<Connection>, JoinHandle<()>)> {
        let (host, port) = self
            .last_endpoint
            .lock()
            .clone()
            .unwrap_or_else(|| (self.config.host.clone(), self.config.port));

        let (conn, driver) = network::connect(
            &host,
            port,
            &self.tls,
            TransportConfig::default(),
            Arc::clone(&self.handler) as Arc<dyn ConnectionEvents>,
        )
        .await?;

        // Record where this connection landed so a redial targets the same
        // endpoint. The dialed name is kept for TLS verification; the port
        // comes from the connection itself.
        if let Some(remote_port) = conn.remote_port() {
            *self.last_endpoint.lock() = Some((host, remote_port));
        }
        *self.current.lock() = Some(Arc::clone(&conn));

        Ok((conn, driver))
    }

    /// Emits an event broadcast through the host.
    ///
    /// Event tasks are fire-and-forget: the id is random and no correlation
    /// entry is kept.
    pub async fn emit(&self, event: &str, data: Option<serde_json::Value>) -> fabric::Result<()> {
        let conn = self
            .current
            .lock()
            .clone()
            .ok_or(fabric::FabricError::Network(NetworkError::ConnectionClosed))?;
        let msg = task_event(&random_task_id(), event, data)?;
        conn.send(&msg).await?;
        Ok(())
    }

    /// Runs the upstream forever: dial, serve until the link drops, wait the
    /// configured backoff, redial the same endpoint.
    pub async fn run(&self) -> fabric::Result<()> {
        loop {
            match self.connect_once().await {
                Ok((conn, driver)) => {
                    info!(
                        remote = ?conn.peer_addr(),
                        "upstream connected"
                    );
                    let _ = driver.await;
                }
                Err(e) => warn!("upstream connect failed: {e}"),
            }

            *self.current.lock() = None;
            let _ = self.handler.ready_tx.send(false);
            info!(
                backoff_secs = self.config.reconnect_backoff_secs,
                "upstream connection closed, reconnecting"
            );
            tokio::time::sleep(self.config.backoff()).await;
        }
    }
}

/// Protocol and transport callbacks for the upstream connection.
struct UpstreamHandler {
    service: Service,
    /// Local record of the host's auth verdict.
    auth: AuthContext,
    auth_key: String,
    ready_tx: watch::Sender<bool>,
    /// Announcements still awaiting the host's acknowledgement; the ready
    /// flag flips once this drains to zero.
    pending_acks: std::sync::atomic::AtomicUsize,
}

impl UpstreamHandler {
    /// Counts down one announcement acknowledgement.
    fn ack(&self) {
        use std::sync::atomic::Ordering;
        let previous = self
            .pending_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous == 1 {
            let _ = self.ready_tx.send(true);
        }
    }

    /// Announces every provided method and event subscription. Runs after a
    /// granted auth response; announcing earlier would be gated off.
    async fn announce(&self, conn: &Arc<Connection>) {
        use std::sync::atomic::Ordering;
        let total = self.service.method_names().count() + self.service.event_names().count();
        self.pending_acks.store(total, Ordering::SeqCst);
        if total == 0 {
            let _ = self.ready_tx.send(true);
            return;
        }

        for method in self.service.method_names() {
            match implement_request(method) {
                Ok(msg) => {
                    if let Err(e) = conn.send(&msg).await {
                        warn!(method, "failed to announce method: {e}");
                    }
                }
                Err(e) => error!(method, "failed to build implement request: {e}"),
            }
        }
        for event in self.service.event_names() {
            match subscribe_request(event) {
                Ok(msg) => {
                    if let Err(e) = conn.send(&msg).await {
                        warn!(event, "failed to announce subscription: {e}");
                    }
                }
                Err(e) => error!(event, "failed to build subscribe request: {e}"),
            }
        }
    }

    /// Answers a forwarded call with the local handler's result.
    async fn serve_call(&self, conn: &Arc<Connection>, task: TaskPayload) {
        let task_id = task.task_id.clone();
        let reply = match task.method.as_deref() {
            Some(method) => match self.service.call(method, task.data) {
                Some(Ok(data)) => task_response(TaskKind::Call, &task_id, Some(data)),
                Some(Err(err)) => task_error(TaskKind::Call, &task_id, &err),
                None => task_error(TaskKind::Call, &task_id, "method not implemented"),
            },
            None => task_error(TaskKind::Call, &task_id, "call without a method"),
        };

        match reply {
            Ok(msg) => {
                if let Err(e) = conn.send(&msg).await {
                    warn!(task_id = %task_id, "failed to send call response: {e}");
                }
            }
            Err(e) => error!(task_id = %task_id, "failed to build call response: {e}"),
        }
    }
}

#[async_trait]
impl ConnectionEvents for UpstreamHandler {
    async fn on_connect(&self, conn: &Arc<Connection>) {
        match auth_request(&self.auth_key) {
            Ok(msg) => {
                if let Err(e) = conn.send(&msg).await {
                    warn!("failed to send auth request: {e}");
                }
            }
            Err(e) => error!("failed to build auth request: {e}"),
        }
    }

    async fn on_message(&self, conn: &Arc<Connection>, msg: Message) {
        dispatch(self, conn, &msg).await;
    }

    async fn on_close(&self, _conn: &Arc<Connection>) {
        info!("upstream closed");
    }

    async fn on_error(&self, _conn: &Arc<Connection>, err: &NetworkError) {
        error!("upstream error: {err}");
    }
}

#[async_trait]
impl ProtocolHandler for UpstreamHandler {
    async fn on_auth(&self, conn: &Arc<Connection>, header: Header, auth: AuthPayload) {
        if header.direction() != Direction::Response {
            return;
        }

        if auth.data == Some(true) {
            self.auth.authenticate(&auth.key);
            info!("upstream authentication granted");
            self.announce(conn).await;
        } else {
            warn!("upstream authentication refused");
        }
    }

    async fn on_implement(
        &self,
        _conn: &Arc<Connection>,
        header: Header,
        implement: codec::ImplementPayload,
    ) {
        if header.direction() != Direction::Response {
            return;
        }
        match implement.error {
            Some(err) => warn!(method = %implement.method, "implement refused: {err}"),
            None => debug!(method = %implement.method, "implement acknowledged"),
        }
        self.ack();
    }

    async fn on_subscribe(
        &self,
        _conn: &Arc<Connection>,
        header: Header,
        subscribe: codec::SubscribePayload,
    ) {
        if header.direction() != Direction::Response {
            return;
        }
        match subscribe.error {
            Some(err) => warn!(event = %subscribe.event, "subscribe refused: {err}"),
            None => debug!(event = %subscribe.event, "subscribe acknowledged"),
        }
        self.ack();
    }

    async fn on_task(&self, conn: &Arc<Connection>, header: Header, kind: TaskKind, task: TaskPayload) {
        match (header.direction(), kind) {
            (Direction::Request, TaskKind::Call) => self.serve_call(conn, task).await,
            (Direction::Request, TaskKind::Event) => {
                let Some(event) = task.event.as_deref() else {
                    warn!(task_id = %task.task_id, "event task without an event name");
                    return;
                };
                self.service.deliver_event(event, task.data);
            }
            (Direction::Response, _) => {
                debug!(task_id = %task.task_id, "ignoring task response on the node side");
            }
        }
    }
}
