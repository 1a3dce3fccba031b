//! The main application logic, decoupled from the entry point.

use crate::{
    classifier::Classifier,
    commands::{CommandHandler, CommandRequest, ReplyTarget},
    config::Config,
    core::{AdminCheck, AdminList, InboundEvent, MessageTransport, MetadataProvider},
    formatting::NotificationComposer,
    network::{OneBotEventClient, WebSocketConnection},
    notification::{DispatchOutcome, Dispatcher, OneBotClient},
    registry::Registry,
    relay::DepartureRelay,
    store::{JsonFileStore, StateStore},
    task_manager::TaskManager,
};
use anyhow::Result;
use async_channel::Receiver;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace};

/// A handle to the running application, containing all its task handles.
pub struct App {
    task_manager: TaskManager,
    registry: Arc<Registry>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The registry shared by the event workers and the admin commands.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Waits for the shutdown signal and then gracefully shuts down all tasks.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        if !*shutdown_rx.borrow() {
            shutdown_rx.changed().await.ok();
        }
        info!("Shutdown signal received. Waiting for tasks to complete...");

        let panicked = self.task_manager.shutdown().await;
        if panicked > 0 {
            anyhow::bail!("{} tasks panicked during shutdown", panicked);
        }
        Ok(())
    }
}

/// Waits for `signal` and then requests shutdown.
///
/// If the signal cannot be listened for, shutdown is never requested and the
/// sender is held so receivers keep waiting.
pub async fn forward_shutdown_signal<F>(signal: F, shutdown_tx: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Shutdown signal received. Shutting down gracefully...");
            shutdown_tx.send(true).ok();
        }
        Err(e) => {
            error!("Failed to listen for the shutdown signal: {}", e);
            std::future::pending::<()>().await;
            drop(shutdown_tx);
        }
    }
}

/// Builder for the main application.
///
/// Every external collaborator can be overridden, which is how the
/// integration tests run the full pipeline without a chat platform.
pub struct AppBuilder {
    config: Config,
    events_rx_for_test: Option<Receiver<InboundEvent>>,
    websocket_override: Option<Box<dyn WebSocketConnection>>,
    transport_override: Option<Arc<dyn MessageTransport>>,
    metadata_override: Option<Arc<dyn MetadataProvider>>,
    store_override: Option<Arc<dyn StateStore>>,
    admin_check_override: Option<Arc<dyn AdminCheck>>,
}

impl AppBuilder {
    /// Creates a new `AppBuilder` with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            events_rx_for_test: None,
            websocket_override: None,
            transport_override: None,
            metadata_override: None,
            store_override: None,
            admin_check_override: None,
        }
    }

    /// Feeds the workers from `rx` instead of a WebSocket connection.
    pub fn events_rx_for_test(mut self, rx: Receiver<InboundEvent>) -> Self {
        self.events_rx_for_test = Some(rx);
        self
    }

    /// Reads events from `ws` instead of connecting to the configured URL.
    pub fn websocket_override(mut self, ws: Box<dyn WebSocketConnection>) -> Self {
        self.websocket_override = Some(ws);
        self
    }

    pub fn transport_override(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.transport_override = Some(transport);
        self
    }

    pub fn metadata_override(mut self, metadata: Arc<dyn MetadataProvider>) -> Self {
        self.metadata_override = Some(metadata);
        self
    }

    pub fn store_override(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    pub fn admin_check_override(mut self, check: Arc<dyn AdminCheck>) -> Self {
        self.admin_check_override = Some(check);
        self
    }

    /// Builds and initializes all application components, returning a runnable `App`.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx);

        // =========================================================================
        // 1. Collaborators
        // =========================================================================
        let onebot = match (&self.transport_override, &self.metadata_override) {
            (Some(_), Some(_)) => None,
            _ => Some(Arc::new(OneBotClient::from_config(&config.onebot)?)),
        };
        let transport: Arc<dyn MessageTransport> = match self.transport_override {
            Some(transport) => transport,
            None => onebot.clone().map(|c| c as Arc<dyn MessageTransport>).ok_or_else(|| {
                anyhow::anyhow!("no message transport available")
            })?,
        };
        let metadata: Arc<dyn MetadataProvider> = match self.metadata_override {
            Some(metadata) => metadata,
            None => onebot.map(|c| c as Arc<dyn MetadataProvider>).ok_or_else(|| {
                anyhow::anyhow!("no metadata provider available")
            })?,
        };
        let admin_check = self
            .admin_check_override
            .unwrap_or_else(|| Arc::new(AdminList::new(config.admins.clone())));

        // =========================================================================
        // 2. Registry
        // =========================================================================
        let store = self.store_override.unwrap_or_else(|| {
            debug!(path = ?config.state.path, "Using JSON state file");
            Arc::new(JsonFileStore::new(config.state.path.clone()))
        });
        let registry = Arc::new(Registry::load(store).await?);

        // =========================================================================
        // 3. Pipeline
        // =========================================================================
        let relay = DepartureRelay::new(
            Classifier::new(config.platform.clone()),
            registry.clone(),
            NotificationComposer::new(metadata.clone()),
            Dispatcher::new(transport.clone()),
        );
        let router = Arc::new(EventRouter {
            platform: config.platform.clone(),
            prefix: config.commands.prefix.clone(),
            relay,
            commands: CommandHandler::new(registry.clone(), admin_check, metadata),
            transport,
        });

        // =========================================================================
        // 4. Event source
        // =========================================================================
        let events_rx = match self.events_rx_for_test {
            Some(rx) => rx,
            None => {
                let (tx, rx) = async_channel::unbounded();
                let client = OneBotEventClient::new(
                    config.onebot.ws_url.clone(),
                    config.onebot.access_token.clone(),
                    config.platform.clone(),
                    tx,
                );
                let websocket_override = self.websocket_override;
                let client_task_manager = task_manager.clone();
                task_manager.spawn("OneBotEventClient", async move {
                    let mut shutdown_rx = client_task_manager.get_shutdown_rx();
                    let result = match websocket_override {
                        Some(ws) => tokio::select! {
                            biased;
                            _ = shutdown_rx.changed() => Ok(()),
                            res = client.run_with_connection(ws) => res,
                        },
                        None => client.run(shutdown_rx).await,
                    };
                    if let Err(e) = result {
                        error!("OneBot event client failed: {:#}", e);
                    }
                });
                rx
            }
        };

        // =========================================================================
        // 5. Event workers
        // =========================================================================
        let concurrency = config.concurrency.max(1);
        info!("Spawning {} event worker tasks...", concurrency);
        for i in 0..concurrency {
            let events_rx = events_rx.clone();
            let router = router.clone();
            let mut shutdown_rx = task_manager.get_shutdown_rx();
            task_manager.spawn("EventWorker", async move {
                trace!("Event worker {} started", i);
                loop {
                    let event = tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => break,
                        res = events_rx.recv() => match res {
                            Ok(event) => event,
                            Err(_) => {
                                debug!("Event channel closed, worker {} shutting down.", i);
                                break;
                            }
                        },
                    };

                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            debug!("Worker {} interrupted by shutdown.", i);
                            break;
                        }
                        _ = router.route(&event) => {}
                    }
                }
            });
        }

        info!("GroupWatch initialized. Watching for group departures...");

        Ok(App {
            task_manager,
            registry,
        })
    }
}

/// Sends each inbound event either to the admin commands or to the departure relay.
struct EventRouter {
    platform: String,
    prefix: String,
    relay: DepartureRelay,
    commands: CommandHandler,
    transport: Arc<dyn MessageTransport>,
}

impl EventRouter {
    async fn route(&self, event: &InboundEvent) {
        if let Some(request) = CommandRequest::from_event(event, &self.platform, &self.prefix) {
            let reply = self.commands.handle(&request.caller_id, request.command).await;
            let sent = match &request.reply_to {
                ReplyTarget::Group(group_id) => {
                    self.transport.send_group_message(group_id, &reply).await
                }
                ReplyTarget::Private(user_id) => {
                    self.transport.send_private_message(user_id, &reply).await
                }
            };
            if let Err(e) = sent {
                error!(reply_to = ?request.reply_to, error = %e, "Failed to send command reply");
            }
            return;
        }

        if let Some(DispatchOutcome::Failed(reason)) = self.relay.handle_event(event).await {
            debug!(reason = %reason, "Departure notification dropped");
        }
    }
}
