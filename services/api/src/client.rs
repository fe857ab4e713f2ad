//! The api client: connect, authenticate, call, subscribe.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codec::envelope::{auth_request, subscribe_request, task_call};
use codec::{AuthPayload, Direction, Header, Message, SubscribePayload, TaskKind, TaskPayload};
use dashmap::DashMap;
use fabric::config::DEFAULT_API_PORT;
use fabric::{dispatch, FabricError, ProtocolHandler, TaskTable, TlsFilesConfig};
use network::{Connection, ConnectionEvents, NetworkError, TransportConfig};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Callback invoked for every broadcast of a subscribed event.
pub type EventCallback = Box<dyn Fn(Option<Value>) + Send + Sync>;

/// Connection settings for an api client.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
    pub auth_key: String,
    /// PEM trust anchor bundle used to verify the host's certificate.
    pub trust: Option<PathBuf>,
    /// Calls unanswered after this many seconds fail with a deadline error.
    pub call_deadline_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_API_PORT,
            auth_key: String::new(),
            trust: None,
            call_deadline_secs: 30,
        }
    }
}

/// A connected api client.
///
/// Dropping the client does not close the connection; call
/// [`ApiClient::close`] for an orderly shutdown.
pub struct ApiClient {
    conn: Arc<Connection>,
    inner: Arc<ClientInner>,
    _driver: JoinHandle<()>,
}

struct ClientInner {
    tasks: TaskTable,
    subscriptions: DashMap<String, EventCallback>,
    auth_waiter: Mutex<Option<oneshot::Sender<bool>>>,
    subscribe_waiters: DashMap<String, oneshot::Sender<Result<(), String>>>,
}

impl ApiClient {
    /// Dials the host's api plane and starts the driver. The returned client
    /// is connected but not yet authenticated.
    pub async fn connect(settings: ApiSettings) -> fabric::Result<Self> {
        let tls = TlsFilesConfig {
            cert: None,
            key: None,
            trust: settings.trust.clone(),
        }
        .load()?;

        let inner = Arc::new(ClientInner {
            tasks: TaskTable::new(Some(Duration::from_secs(settings.call_deadline_secs))),
            subscriptions: DashMap::new(),
            auth_waiter: Mutex::new(None),
            subscribe_waiters: DashMap::new(),
        });

        let (conn, driver) = network::connect(
            &settings.host,
            settings.port,
            &tls,
            TransportConfig::default(),
            Arc::clone(&inner) as Arc<dyn ConnectionEvents>,
        )
        .await?;

        // Abandoned calls (connection loss, unanswerable ids) are reclaimed
        // by the table deadline rather than leaking waiters.
        let sweeper = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                sweeper.tasks.sweep_expired();
            }
        });

        info!(host = %settings.host, port = settings.port, "api client connected");
        Ok(Self {
            conn,
            inner,
            _driver: driver,
        })
    }

    /// Presents `auth_key` and awaits the host's verdict.
    ///
    /// On refusal the host sends exactly one failure response and closes the
    /// connection; this returns `Ok(false)` in that case.
    pub async fn authenticate(&self, auth_key: &str) -> fabric::Result<bool> {
        let (tx, rx) = oneshot::channel();
        *self.inner.auth_waiter.lock() = Some(tx);

        self.conn.send(&auth_request(auth_key)?).await?;
        rx.await
            .map_err(|_| FabricError::Remote("connection closed during authentication".into()))
    }

    /// Invokes `method` on the fabric and awaits its result.
    ///
    /// Task ids are minted locally; the pending entry lives in this client's
    /// own task table until the response or the call deadline retires it.
    pub async fn call(&self, method: &str, args: Option<Value>) -> fabric::Result<Value> {
        let task_id = self.inner.tasks.mint_id();
        let (tx, rx) = oneshot::channel();

        self.inner.tasks.create(
            TaskPayload {
                task_id: task_id.clone(),
                method: Some(method.to_string()),
                event: None,
                data: args.clone(),
                error: None,
            },
            Box::new(move |resp| {
                let _ = tx.send(resp);
            }),
        )?;

        self.conn.send(&task_call(&task_id, method, args)?).await?;

        let resp = rx
            .await
            .map_err(|_| FabricError::Remote("call abandoned without a response".into()))?;
        match resp.error {
            Some(error) => Err(FabricError::Remote(error)),
            None => Ok(resp.data.unwrap_or(Value::Null)),
        }
    }

    /// Subscribes to `event`; `callback` runs for every broadcast received.
    pub async fn subscribe<F>(&self, event: &str, callback: F) -> fabric::Result<()>
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        self.inner
            .subscriptions
            .insert(event.to_string(), Box::new(callback));

        let (tx, rx) = oneshot::channel();
        self.inner.subscribe_waiters.insert(event.to_string(), tx);

        self.conn.send(&subscribe_request(event)?).await?;

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => {
                self.inner.subscriptions.remove(event);
                Err(FabricError::Remote(error))
            }
            Err(_) => {
                self.inner.subscriptions.remove(event);
                Err(FabricError::Remote(
                    "connection closed during subscribe".into(),
                ))
            }
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Orderly shutdown of the underlying connection.
    pub async fn close(&self) {
        self.conn.close().await;
    }
}

#[async_trait]
impl ConnectionEvents for ClientInner {
    async fn on_message(&self, conn: &Arc<Connection>, msg: Message) {
        dispatch(self, conn, &msg).await;
    }

    async fn on_close(&self, _conn: &Arc<Connection>) {
        info!("api connection closed");
        self.fail_waiters();
    }

    async fn on_error(&self, _conn: &Arc<Connection>, err: &NetworkError) {
        warn!("api connection failed: {err}");
        self.fail_waiters();
    }
}

impl ClientInner {
    /// Resolves every waiter that can no longer be answered. Pending calls
    /// are left to the table deadline so they retire through the usual path.
    fn fail_waiters(&self) {
        if let Some(tx) = self.auth_waiter.lock().take() {
            let _ = tx.send(false);
        }
        let events: Vec<String> = self
            .subscribe_waiters
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for event in events {
            if let Some((_, tx)) = self.subscribe_waiters.remove(&event) {
                let _ = tx.send(Err("connection closed".to_string()));
            }
        }
    }
}

#[async_trait]
impl ProtocolHandler for ClientInner {
    async fn on_auth(&self, _conn: &Arc<Connection>, header: Header, auth: AuthPayload) {
        if header.direction() != Direction::Response {
            return;
        }
        let granted = auth.data == Some(true);
        match self.auth_waiter.lock().take() {
            Some(tx) => {
                let _ = tx.send(granted);
            }
            None => debug!("unsolicited auth response"),
        }
    }

    async fn on_subscribe(
        &self,
        _conn: &Arc<Connection>,
        header: Header,
        subscribe: SubscribePayload,
    ) {
        if header.direction() != Direction::Response {
            return;
        }
        match self.subscribe_waiters.remove(&subscribe.event) {
            Some((_, tx)) => {
                let result = match subscribe.error {
                    Some(error) => Err(error),
                    None => Ok(()),
                };
                let _ = tx.send(result);
            }
            None => debug!(event = %subscribe.event, "unsolicited subscribe response"),
        }
    }

    async fn on_task(&self, _conn: &Arc<Connection>, header: Header, kind: TaskKind, task: TaskPayload) {
        match (header.direction(), kind) {
            (Direction::Response, _) => {
                if let Err(e) = self.tasks.respond(header.direction(), task) {
                    warn!("unroutable call response: {e}");
                }
            }
            (Direction::Request, TaskKind::Event) => {
                let Some(event) = task.event.as_deref() else {
                    warn!(task_id = %task.task_id, "event task without an event name");
                    return;
                };
                match self.subscriptions.get(event) {
                    Some(callback) => callback(task.data),
                    None => debug!(event, "broadcast for an event we no longer track"),
                }
            }
            (Direction::Request, TaskKind::Call) => {
                warn!(task_id = %task.task_id, "api clients do not serve calls, dropping");
            }
        }
    }
}
