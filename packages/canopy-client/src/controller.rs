//! Session lifecycle: handshake, initial render, patch handling with resync, event forwarding.

use crate::config::ClientConfig;
use crate::error::ClientError;
use canopy_core::{
    EventReceiver, HostBinding, NodeId, Patch, Reconciler, RenderResult, WidgetRegistry, event_channel,
};
use canopy_rpc::{RpcError, RpcSession};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::JoinHandle;

pub const PATCH_METHOD: &str = "patch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Handshaking,
    Live,
}

/// Reply to a `patch` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchStatus {
    Success,
    Error,
    Invalidated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub client_info: PeerInfo,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}

impl InitializeParams {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            client_info: PeerInfo {
                name: config.client_name.clone(),
                version: config.client_version.clone(),
            },
            url: config.url.clone(),
            ticket: config.ticket.clone(),
        }
    }
}

struct Shared<H: HostBinding> {
    session: RpcSession,
    reconciler: Arc<Mutex<Reconciler<H>>>,
}

impl<H: HostBinding> Shared<H> {
    async fn handle_patches(&self, params: Value) -> PatchStatus {
        let mut reconciler = self.reconciler.clone().lock_owned().await;

        let decoded = serde_json::from_value::<Vec<Patch>>(params).map_err(|source| ClientError::Decode {
            what: "patch batch",
            source,
        });
        let status = match decoded {
            Err(err) => {
                tracing::error!(error = %err, "patch batch rejected");
                PatchStatus::Error
            }
            Ok(patches) if patches.iter().any(Patch::is_invalidate) => {
                tracing::info!(count = patches.len(), "server invalidated the tree");
                PatchStatus::Invalidated
            }
            Ok(patches) => match reconciler.apply_patches(&patches) {
                Ok(()) => {
                    tracing::debug!(count = patches.len(), "patches applied");
                    return PatchStatus::Success;
                }
                Err(err) => {
                    tracing::error!(error = %err, consistency = err.is_consistency(), "patch apply failed");
                    PatchStatus::Error
                }
            },
        };

        // The guard moves into the resync task, so later patches wait until the
        // fresh tree is in place. The reply and the render request race.
        let session = self.session.clone();
        tokio::spawn(async move {
            if let Err(err) = resync(&session, &mut reconciler).await {
                tracing::error!(error = %err, "resync failed");
            }
        });
        status
    }
}

/// Fetches a full rendering and replaces the tree with it.
async fn resync<H: HostBinding>(
    session: &RpcSession,
    reconciler: &mut OwnedMutexGuard<Reconciler<H>>,
) -> Result<NodeId, ClientError> {
    let rendering: RenderResult = session.request_as("render", Value::Null).await?;
    let root = reconciler.replace_root(&rendering.into_root())?;
    tracing::info!(root = %root, nodes = reconciler.len(), "tree resynced");
    Ok(root)
}

pub struct AppController<H: HostBinding> {
    shared: Arc<Shared<H>>,
    config: ClientConfig,
    phase: watch::Sender<Phase>,
    events: Option<EventReceiver>,
    forwarder: Option<JoinHandle<()>>,
}

impl<H: HostBinding> AppController<H> {
    /// Builds the reconciler over `host` and registers the `patch` handler on `session`.
    pub fn new(session: RpcSession, host: H, widgets: WidgetRegistry<H>, config: ClientConfig) -> Self {
        let (events_tx, events_rx) = event_channel();
        let shared = Arc::new(Shared {
            session,
            reconciler: Arc::new(Mutex::new(Reconciler::new(host, widgets, events_tx))),
        });

        let weak: Weak<Shared<H>> = Arc::downgrade(&shared);
        shared.session.register(PATCH_METHOD, move |params: Value| {
            let shared = weak.upgrade();
            async move {
                let shared = shared.ok_or_else(|| anyhow::anyhow!("controller is gone"))?;
                let status = shared.handle_patches(params).await;
                Ok::<_, anyhow::Error>(serde_json::to_value(status)?)
            }
        });

        let (phase, _) = watch::channel(Phase::Connecting);
        Self {
            shared,
            config,
            phase,
            events: Some(events_rx),
            forwarder: None,
        }
    }

    pub fn session(&self) -> &RpcSession {
        &self.shared.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Locking this blocks patch handling until the guard is dropped.
    pub fn reconciler(&self) -> &Mutex<Reconciler<H>> {
        &self.shared.reconciler
    }

    /// Runs the handshake and the initial render. Returns the `initialize` result.
    pub async fn start(&mut self) -> Result<Value, ClientError> {
        if self.phase() != Phase::Connecting {
            return Err(ClientError::AlreadyStarted);
        }
        self.phase.send_replace(Phase::Handshaking);

        match self.handshake().await {
            Ok(info) => {
                self.spawn_event_forwarder();
                self.phase.send_replace(Phase::Live);
                Ok(info)
            }
            Err(err) => {
                tracing::error!(error = %err, "handshake failed");
                self.phase.send_replace(Phase::Connecting);
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> Result<Value, ClientError> {
        let session = &self.shared.session;
        let params = serde_json::to_value(InitializeParams::from_config(&self.config))
            .map_err(RpcError::Encode)?;
        let info = session.request("initialize", params).await?;
        tracing::info!(url = %self.config.url, server = %info, "session initialized");
        session.notify("initialized", json!({}))?;

        let mut reconciler = self.shared.reconciler.clone().lock_owned().await;
        resync(session, &mut reconciler).await?;
        Ok(info)
    }

    fn spawn_event_forwarder(&mut self) {
        let Some(mut events) = self.events.take() else {
            return;
        };
        let session = self.shared.session.clone();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let params = match serde_json::to_value(&event) {
                    Ok(params) => params,
                    Err(err) => {
                        tracing::warn!(error = %err, handler = %event.handler_id, "dropping event");
                        continue;
                    }
                };
                match session.notify("event", params) {
                    Ok(()) => {}
                    Err(RpcError::Closed) => break,
                    Err(err) => tracing::warn!(error = %err, "failed to forward event"),
                }
            }
            tracing::debug!("event forwarder stopped");
        }));
    }
}

impl<H: HostBinding> Drop for AppController<H> {
    fn drop(&mut self) {
        self.shared.session.unregister(PATCH_METHOD);
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
