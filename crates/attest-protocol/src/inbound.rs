//! Per-message routing for a conversational endpoint.

use std::sync::Arc;

use chrono::Utc;

use attest_orders::{OrderError, OrderFilter, OrderSelector};
use attest_schemas::{Address, DeviceAddress};
use attest_session::SessionStore;

use crate::envelope::extract_signed_block;
use crate::protocol::VerificationProtocol;
use crate::reply::Reply;

pub struct InboundRouter {
    protocol: Arc<VerificationProtocol>,
    sessions: Arc<SessionStore>,
}

impl InboundRouter {
    pub fn new(protocol: Arc<VerificationProtocol>, sessions: Arc<SessionStore>) -> Self {
        Self { protocol, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Handle one inbound message:
    /// - a signed-message block runs the verification protocol;
    /// - a bare valid address is recorded on the session and bound to the
    ///   endpoint's latest open order, if it has one;
    /// - anything else gets the help text.
    pub async fn handle(&self, device: &DeviceAddress, text: &str) -> Reply {
        let now = Utc::now();
        if let Err(e) = self.sessions.touch(device, now) {
            tracing::error!(device = %device, error = %e, "session touch failed");
            return Reply::GenericError;
        }

        if extract_signed_block(text).is_some() {
            return self.protocol.respond(Some(device), text).await;
        }

        match Address::parse(text.trim()) {
            Ok(address) => self.accept_address(device, address).await,
            Err(_) => Reply::Help,
        }
    }

    async fn accept_address(&self, device: &DeviceAddress, address: Address) -> Reply {
        let claimed_at = match self.sessions.claim_address(device, &address, Utc::now()) {
            Ok(session) => session.last_seen,
            Err(e) => {
                tracing::error!(device = %device, error = %e, "session claim failed");
                return Reply::GenericError;
            }
        };

        let lifecycle = self.protocol.lifecycle();
        let open = OrderFilter::by_device(device.clone()).non_attested();
        let result = match lifecycle.find_order(&open).await {
            Ok(Some(order)) => lifecycle
                .bind_address(&OrderSelector::Id(order.id), &address)
                .await
                .map(|_| ()),
            Ok(None) => {
                lifecycle
                    .record_endpoint_address(device, &address, claimed_at)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Reply::AddressAccepted { address },
            Err(OrderError::AlreadyAttested { unit, .. }) => Reply::AlreadyAttested { unit },
            Err(e) => {
                tracing::warn!(
                    device = %device,
                    code = e.code(),
                    error = %e,
                    "address bind failed"
                );
                Reply::GenericError
            }
        }
    }
}
