//! Mock server lifecycle: owns the listening socket and wires every inbound
//! request to the dispatcher.

use crate::config::{DataStore, Settings};
use crate::dispatch::{Dispatcher, UnmatchedRequest};
use crate::error::{Error, Result};
use crate::interaction::{Interaction, InteractionSpec};
use crate::store::InteractionStore;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde_json::Value;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bound on the wait for in-flight work during `stop`.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Arguments accepted by `start`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartOptions {
    /// Port to bind; falls back to the configured default. Port 0 asks the
    /// OS for an ephemeral port.
    pub port: Option<u16>,
    /// Host to bind; `localhost` or an IPv4 dotted form
    pub host: Option<String>,
}

impl StartOptions {
    /// Parse dynamic start arguments: a bare port number or an object
    /// `{port, host}`. Any other shape is rejected synchronously, before a
    /// socket is opened.
    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Number(n) => {
                let port = n
                    .as_u64()
                    .and_then(|p| u16::try_from(p).ok())
                    .ok_or_else(|| Error::InvalidPort(n.to_string()))?;
                Ok(Self {
                    port: Some(port),
                    ..Self::default()
                })
            }
            Value::Object(map) => {
                let port = match map.get("port") {
                    None | Some(Value::Null) => None,
                    Some(Value::Number(n)) => Some(
                        n.as_u64()
                            .and_then(|p| u16::try_from(p).ok())
                            .ok_or_else(|| Error::InvalidPort(n.to_string()))?,
                    ),
                    Some(other) => return Err(Error::InvalidPort(other.to_string())),
                };
                let host = match map.get("host") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => return Err(Error::InvalidHost(other.to_string())),
                };
                Ok(Self { port, host })
            }
            other => Err(Error::InvalidPort(other.to_string())),
        }
    }
}

/// Validate a host argument and resolve it to a bindable address.
///
/// Accepted forms: `localhost` and IPv4 dotted notation.
fn resolve_host(host: &str) -> Result<Ipv4Addr> {
    if host == "localhost" {
        return Ok(Ipv4Addr::LOCALHOST);
    }
    host.parse::<Ipv4Addr>()
        .map_err(|_| Error::InvalidHost(host.to_string()))
}

struct Running {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Programmable HTTP service double.
///
/// Owns the interaction store, the process-scoped template data store, and
/// the dispatcher; `start` binds the socket and serves until `stop`.
pub struct MockServer {
    store: Arc<InteractionStore>,
    data: Arc<DataStore>,
    dispatcher: Arc<Dispatcher>,
    settings: Settings,
    state: Mutex<Option<Running>>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl MockServer {
    pub fn new(settings: Settings) -> Self {
        let store = Arc::new(InteractionStore::new());
        let data = Arc::new(DataStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&data),
            settings.clone(),
        ));
        Self {
            store,
            data,
            dispatcher,
            settings,
            state: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<InteractionStore> {
        &self.store
    }

    pub fn data(&self) -> &Arc<DataStore> {
        &self.data
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Address of the active listener, if started.
    pub fn address(&self) -> Option<SocketAddr> {
        self.state.lock().as_ref().map(|r| r.addr)
    }

    // ===== Registration API =====

    /// Register one interaction; returns its id.
    pub fn add_interaction(&self, spec: InteractionSpec) -> Result<String> {
        self.store.add(spec)
    }

    /// Register a batch of interactions; returns ids in array order.
    pub fn add_interactions(&self, specs: Vec<InteractionSpec>) -> Result<Vec<String>> {
        self.store.add_many(specs)
    }

    /// Remove one interaction. Unknown ids are a no-op.
    pub fn remove_interaction(&self, id: &str) {
        self.store.remove(id);
    }

    /// Look up a registered interaction by id.
    pub fn get_interaction(&self, id: &str) -> Option<Arc<Interaction>> {
        self.store.get(id)
    }

    /// Sweep non-persistent interactions and the unmatched-request log.
    /// Persistent fixtures survive.
    pub fn clear_interactions(&self) {
        self.store.clear();
        self.dispatcher.clear_unmatched();
    }

    /// Remove everything, persistent fixtures included.
    pub fn clear_all_interactions(&self) {
        self.store.clear_all();
        self.dispatcher.clear_unmatched();
    }

    // ===== Diagnostics surface =====

    /// Requests that matched no interaction.
    pub fn unmatched_requests(&self) -> Vec<UnmatchedRequest> {
        self.dispatcher.unmatched_requests()
    }

    /// Interactions whose expected call count has not been met.
    pub fn unsatisfied_interactions(&self) -> Vec<Arc<Interaction>> {
        self.store.unsatisfied()
    }

    // ===== Lifecycle API =====

    /// Start listening with the configured defaults.
    pub async fn start(&self) -> Result<SocketAddr> {
        self.start_with(StartOptions::default()).await
    }

    /// Start listening on an explicit port and host.
    pub async fn start_on(&self, port: u16, host: &str) -> Result<SocketAddr> {
        self.start_with(StartOptions {
            port: Some(port),
            host: Some(host.to_string()),
        })
        .await
    }

    /// Start listening. Arguments are validated before a socket is opened;
    /// on success the caller is resumed once the listener is bound.
    pub async fn start_with(&self, options: StartOptions) -> Result<SocketAddr> {
        let host = options.host.unwrap_or_else(|| self.settings.host.clone());
        let ip = resolve_host(&host)?;
        let port = options.port.unwrap_or(self.settings.port);

        if let Some(running) = self.state.lock().as_ref() {
            return Err(Error::AlreadyStarted(running.addr.port()));
        }

        let listener = TcpListener::bind((ip, port)).await.map_err(|e| Error::Bind {
            host: host.clone(),
            port,
            source: e,
        })?;
        let addr = listener.local_addr().map_err(|e| Error::Bind {
            host: host.clone(),
            port,
            source: e,
        })?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let dispatcher = Arc::clone(&self.dispatcher);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let dispatcher = Arc::clone(&dispatcher);
                                tokio::spawn(async move {
                                    let io = TokioIo::new(stream);
                                    let service = service_fn(move |req| {
                                        let dispatcher = Arc::clone(&dispatcher);
                                        async move {
                                            Ok::<_, Infallible>(dispatcher.dispatch(req).await)
                                        }
                                    });
                                    if let Err(e) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!(peer = %peer, error = %e, "connection error");
                                    }
                                });
                            }
                            Err(e) => {
                                error!(error = %e, "accept error");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        info!(address = %addr, "mock server listening");
        *self.state.lock() = Some(Running {
            addr,
            shutdown_tx,
            task,
        });
        Ok(addr)
    }

    /// Stop the listener. Waits for the accept loop to wind down, bounded by
    /// a grace period; stopping a server that is not running is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.state.lock().take() else {
            warn!("stop called but the mock server is not running");
            return Ok(());
        };

        let _ = running.shutdown_tx.send(());
        match tokio::time::timeout(STOP_GRACE, running.task).await {
            Ok(_) => info!(address = %running.addr, "mock server stopped"),
            Err(_) => {
                warn!(address = %running.addr, "mock server did not stop within grace period");
            }
        }
        Ok(())
    }
}
