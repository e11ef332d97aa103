//! Per-device connection lifecycle.
//!
//! One [`DeviceConnection`] owns the session with one physical device:
//! connect with a bounded timeout, poll events, route component state into
//! per-component watch channels, drain outbound commands, and retry forever
//! on failure at the configured interval. Reachability is published through
//! a watch channel consumed by the accessory platform side.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::ApiClient;
use super::client::ClientEvent;
use super::client::Command;
use super::component::Component;
use super::component::ComponentState;

/// Bound on a single connection attempt.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the session loop holds the client lock waiting for an event,
/// so the command drain task gets its turn.
const POLL_WINDOW: Duration = Duration::from_millis(100);

type SharedClient = Arc<Mutex<Box<dyn ApiClient>>>;

/// A live connection to one device.
pub struct DeviceConnection {
    host: String,
    reachable: watch::Receiver<bool>,
    cancelled: Arc<AtomicBool>,
    client: SharedClient,
    session_task: Option<JoinHandle<()>>,
    command_task: Option<JoinHandle<()>>,
}

impl DeviceConnection {
    /// Spawn the connection tasks for one device.
    ///
    /// Discovered components are delivered on `components_tx`; the platform
    /// resolves and translates them as they arrive.
    pub fn spawn(
        host: String,
        retry_interval: Duration,
        client: Box<dyn ApiClient>,
        components_tx: mpsc::Sender<Component>,
    ) -> Self {
        let client = Arc::new(Mutex::new(client));
        let (reachable_tx, reachable_rx) = watch::channel(false);
        let reachable_tx = Arc::new(reachable_tx);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<Command>();
        let cancelled = Arc::new(AtomicBool::new(false));

        let command_client = client.clone();
        let command_host = host.clone();
        let command_task = tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let mut client = command_client.lock().await;
                if let Err(e) = client.send_command(command).await {
                    warn!("failed to send command to {}: {}", command_host, e);
                }
            }
        });

        let session_task = tokio::spawn(session_loop(
            host.clone(),
            retry_interval,
            client.clone(),
            cancelled.clone(),
            reachable_tx,
            components_tx,
            command_tx,
        ));

        Self {
            host,
            reachable: reachable_rx,
            cancelled,
            client,
            session_task: Some(session_task),
            command_task: Some(command_task),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Subscribe to this connection's reachability signal.
    pub fn reachability(&self) -> watch::Receiver<bool> {
        self.reachable.clone()
    }

    /// Tear the connection down: stop the retry loop, abort both tasks, and
    /// disconnect the client. Dropping the session task drops every
    /// component state sender, which ends the translators' subscriptions.
    pub async fn shutdown(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.session_task.take() {
            task.abort();
        }
        if let Some(task) = self.command_task.take() {
            task.abort();
        }
        let mut client = self.client.lock().await;
        if let Err(e) = client.disconnect().await {
            debug!("error disconnecting from {}: {}", self.host, e);
        }
        info!("closed connection to {}", self.host);
    }
}

async fn session_loop(
    host: String,
    retry_interval: Duration,
    client: SharedClient,
    cancelled: Arc<AtomicBool>,
    reachable: Arc<watch::Sender<bool>>,
    components_tx: mpsc::Sender<Component>,
    command_tx: mpsc::UnboundedSender<Command>,
) {
    let mut state_senders: HashMap<u32, watch::Sender<Option<ComponentState>>> = HashMap::new();

    loop {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        let connected = {
            let mut client = client.lock().await;
            match timeout(CONNECT_TIMEOUT, client.connect()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!("failed to connect to {}: {}", host, e);
                    false
                }
                Err(_) => {
                    warn!("connection attempt to {} timed out", host);
                    false
                }
            }
        };

        if connected {
            info!("connected to {}", host);
            reachable.send_replace(true);

            loop {
                if cancelled.load(Ordering::SeqCst) {
                    return;
                }

                // Hold the client lock only for one poll window so queued
                // commands can interleave with inbound events.
                let polled = {
                    let mut client = client.lock().await;
                    timeout(POLL_WINDOW, client.poll_event()).await
                };

                match polled {
                    Err(_) => {
                        tokio::task::yield_now().await;
                    }
                    Ok(None) => {
                        warn!("connection to {} lost", host);
                        break;
                    }
                    Ok(Some(event)) => {
                        handle_event(
                            event,
                            &host,
                            &mut state_senders,
                            &reachable,
                            &components_tx,
                            &command_tx,
                        )
                        .await;
                    }
                }
            }

            reachable.send_replace(false);
            // Dropping the senders ends every subscriber; reconnection will
            // announce components afresh.
            state_senders.clear();
        }

        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        info!("retrying connection to {} in {:?}", host, retry_interval);
        sleep(retry_interval).await;
    }
}

async fn handle_event(
    event: ClientEvent,
    host: &str,
    state_senders: &mut HashMap<u32, watch::Sender<Option<ComponentState>>>,
    reachable: &Arc<watch::Sender<bool>>,
    components_tx: &mpsc::Sender<Component>,
    command_tx: &mpsc::UnboundedSender<Command>,
) {
    match event {
        ClientEvent::EntityDiscovered(info) => {
            debug!("{} announced {} ({})", host, info.name, info.kind);
            let (state_tx, state_rx) = watch::channel(None);
            state_senders.insert(info.key, state_tx);
            let component =
                Component::new(info, state_rx, command_tx.clone(), reachable.subscribe());
            if components_tx.send(component).await.is_err() {
                warn!("platform component channel closed; dropping discovery");
            }
        }
        ClientEvent::State { key, state } => match state_senders.get(&key) {
            Some(sender) => {
                sender.send_replace(Some(state));
            }
            None => debug!("{} reported state for unknown component key {}", host, key),
        },
        ClientEvent::Availability(online) => {
            reachable.send_replace(online);
            if !online {
                debug!("{} reported itself offline", host);
            }
        }
    }
}
