//! The link registry: the host's set of linked controller devices.
//!
//! Holds `LinkId → Device` with insertion order preserved, so control-plane
//! broadcasts always address devices in the order they linked. Waiting for
//! distinct peers runs concurrently — one slow negotiation never blocks
//! another link id.
//!
//! `broadcast` registers every device's `"<cmd>_confirm"` waiter *before*
//! sending the command, then resolves only when every device has confirmed
//! — with exactly N replies in registration order. There is no implicit
//! timeout: a device that never confirms blocks the broadcast indefinitely.
//! `broadcast_with_timeout` is the bounded variant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use padlink_core::protocol::control::{ConfigPayload, StartPayload, COMMAND_CONFIG, COMMAND_START};
use padlink_core::{ControlEnvelope, LinkId};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::application::device::Device;
use crate::config::{HostConfig, TransportKind};
use crate::error::LinkError;
use crate::infrastructure::peer::link::PeerLink;
use crate::infrastructure::peer::webrtc::WebRtcConnector;
use crate::infrastructure::peer::{PeerConnector, RetryPolicy};
use crate::infrastructure::signaling::relay_ws::WsRelayClient;
use crate::infrastructure::signaling::SignalingChannel;

/// Generated link ids are 10 characters, enough for a QR-code room name.
const GENERATED_ID_LEN: usize = 10;

#[derive(Default)]
struct DeviceTable {
    order: Vec<LinkId>,
    by_id: HashMap<LinkId, Arc<Device>>,
}

/// Owns every linked device and the control-plane fan-out.
pub struct LinkRegistry {
    signaling: Arc<SignalingChannel>,
    connector: Arc<dyn PeerConnector>,
    retry: Arc<dyn RetryPolicy>,
    devices: Mutex<DeviceTable>,
}

impl LinkRegistry {
    /// Builds a registry over an already-connected signaling channel and a
    /// peer connector.
    pub fn new(
        signaling: Arc<SignalingChannel>,
        connector: Arc<dyn PeerConnector>,
        retry: Arc<dyn RetryPolicy>,
    ) -> Self {
        Self {
            signaling,
            connector,
            retry,
            devices: Mutex::new(DeviceTable::default()),
        }
    }

    /// Connects to the configured relay and assembles a registry over the
    /// configured transport.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnsupportedTransport`] immediately for an
    /// unknown transport kind — fail fast, before any connection state is
    /// built — and relay connection errors otherwise.
    pub async fn from_config(config: &HostConfig) -> Result<Self, LinkError> {
        match config.transport_kind()? {
            TransportKind::WebRtc => {
                let (relay, incoming) = WsRelayClient::connect(&config.relay_url).await?;
                let signaling = SignalingChannel::new(relay, incoming);
                let connector = Arc::new(WebRtcConnector::new(config.ice_servers.clone()));
                Ok(Self::new(signaling, connector, config.reconnect.policy()))
            }
        }
    }

    /// Waits for the peer using `id` to complete negotiation and registers
    /// the resulting device.
    ///
    /// Concurrent calls for distinct ids proceed independently; the registry
    /// lock is only taken once the link is up.
    ///
    /// # Errors
    ///
    /// Propagates the negotiation failure; no registry entry remains.
    pub async fn await_link(&self, id: LinkId) -> Result<Arc<Device>, LinkError> {
        let link = PeerLink::connect(
            id.clone(),
            Arc::clone(&self.signaling),
            Arc::clone(&self.connector),
            Arc::clone(&self.retry),
        )
        .await?;
        let device = Arc::new(Device::new(link));

        let mut table = self.devices.lock().await;
        if !table.by_id.contains_key(&id) {
            table.order.push(id.clone());
        }
        table.by_id.insert(id.clone(), Arc::clone(&device));
        info!(link = %id, "device linked ({} total)", table.order.len());
        Ok(device)
    }

    /// Waits for a peer on a freshly generated id.
    pub async fn await_random_link(&self) -> Result<Arc<Device>, LinkError> {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(GENERATED_ID_LEN);
        self.await_link(LinkId::new(id)).await
    }

    /// Sends `envelope` to every registered device and resolves once every
    /// one of them replies with the matching `"<cmd>_confirm"` envelope.
    ///
    /// Returns exactly one reply per device, in registration order. Reply
    /// waiters are registered before the command is sent, so a confirmation
    /// arriving immediately cannot be missed.
    pub async fn broadcast(
        &self,
        envelope: &ControlEnvelope,
    ) -> Result<Vec<(LinkId, ControlEnvelope)>, LinkError> {
        let targets: Vec<(LinkId, Arc<Device>)> = {
            let table = self.devices.lock().await;
            table
                .order
                .iter()
                .filter_map(|id| {
                    table
                        .by_id
                        .get(id)
                        .map(|device| (id.clone(), Arc::clone(device)))
                })
                .collect()
        };

        let confirm = envelope.confirm_kind();
        let waiters: Vec<_> = targets
            .iter()
            .map(|(_, device)| device.once(&confirm))
            .collect();

        for (_, device) in &targets {
            device.send_control(envelope).await?;
        }

        let mut replies = Vec::with_capacity(targets.len());
        for ((id, _), waiter) in targets.iter().zip(waiters) {
            replies.push((id.clone(), waiter.recv().await?));
        }
        Ok(replies)
    }

    /// [`Self::broadcast`] bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Timeout`] when any device fails to confirm in
    /// time.
    pub async fn broadcast_with_timeout(
        &self,
        envelope: &ControlEnvelope,
        timeout: Duration,
    ) -> Result<Vec<(LinkId, ControlEnvelope)>, LinkError> {
        tokio::time::timeout(timeout, self.broadcast(envelope))
            .await
            .map_err(|_| LinkError::Timeout)?
    }

    /// Broadcasts the `start` command and awaits every confirmation.
    pub async fn start_check(
        &self,
        payload: &StartPayload,
    ) -> Result<Vec<(LinkId, ControlEnvelope)>, LinkError> {
        self.broadcast(&ControlEnvelope::from_payload(COMMAND_START, payload)?)
            .await
    }

    /// Broadcasts the `config` command and awaits every confirmation.
    pub async fn set_config(
        &self,
        payload: &ConfigPayload,
    ) -> Result<Vec<(LinkId, ControlEnvelope)>, LinkError> {
        self.broadcast(&ControlEnvelope::from_payload(COMMAND_CONFIG, payload)?)
            .await
    }

    /// Tears down the device's peer link and discards the entry. Unknown ids
    /// are a no-op so teardown can be idempotent.
    pub async fn remove_link(&self, id: &LinkId) {
        let device = {
            let mut table = self.devices.lock().await;
            table.order.retain(|known| known != id);
            table.by_id.remove(id)
        };
        if let Some(device) = device {
            device.disconnect().await;
            info!(link = %id, "device removed");
        }
    }

    /// The registered device for `id`, if any.
    pub async fn device(&self, id: &LinkId) -> Option<Arc<Device>> {
        self.devices.lock().await.by_id.get(id).cloned()
    }

    /// Registered link ids in registration order.
    pub async fn link_ids(&self) -> Vec<LinkId> {
        self.devices.lock().await.order.clone()
    }

    /// Number of registered devices.
    pub async fn len(&self) -> usize {
        self.devices.lock().await.order.len()
    }

    /// Whether no device is registered.
    pub async fn is_empty(&self) -> bool {
        self.devices.lock().await.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::peer::mock::MockConnector;
    use crate::infrastructure::peer::ReconnectForever;
    use crate::infrastructure::signaling::mock::LoopbackRelay;

    fn empty_registry() -> LinkRegistry {
        let (relay, incoming) = LoopbackRelay::new();
        let signaling = SignalingChannel::new(relay, incoming);
        let (connector, _control) = MockConnector::new();
        LinkRegistry::new(signaling, connector, Arc::new(ReconnectForever))
    }

    #[tokio::test]
    async fn test_registry_starts_empty() {
        let registry = empty_registry();
        assert!(registry.is_empty().await);
        assert_eq!(registry.len().await, 0);
        assert!(registry.link_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_link_is_a_no_op() {
        let registry = empty_registry();
        registry.remove_link(&LinkId::new("ghost")).await;
        registry.remove_link(&LinkId::new("ghost")).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_broadcast_over_empty_registry_resolves_immediately() {
        let registry = empty_registry();
        let replies = registry
            .broadcast(&ControlEnvelope::new("start", serde_json::json!({})))
            .await
            .unwrap();
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_device_lookup_for_unknown_id_is_none() {
        let registry = empty_registry();
        assert!(registry.device(&LinkId::new("p1")).await.is_none());
    }

    #[tokio::test]
    async fn test_from_config_rejects_unknown_transport_before_connecting() {
        let mut config = HostConfig::default();
        config.transport = "tcp".to_string();
        // The relay URL is unreachable; the transport check must fail first.
        config.relay_url = "ws://192.0.2.1:1".to_string();

        let result = LinkRegistry::from_config(&config).await;
        assert!(matches!(
            result,
            Err(LinkError::UnsupportedTransport(kind)) if kind == "tcp"
        ));
    }
}
