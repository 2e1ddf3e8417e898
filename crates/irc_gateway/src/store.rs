//! External collaborator interfaces (§6): the account/network/identity store and the inbound
//! account-event queue. Both are consumed, never implemented, by this crate — concrete
//! implementations (a SQL store, a message broker consumer) live outside it. Encoding them as
//! `async_trait`s rather than free-floating prose lets the supervisor (C7) be driven by an
//! in-memory double in tests.

use async_trait::async_trait;
use irc_common::{AccountId, Identity, NetworkId, Server};
use tokio::sync::mpsc;

use crate::message::Message;

/// `select_accounts` / `select_servers_to_reconnect` / `select_network_identity` (§6). All three
/// are idempotent queries; any error is a hard failure of the current supervisor refresh cycle.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn select_accounts(&self) -> Result<Vec<AccountId>, String>;

    async fn select_servers_to_reconnect(
        &self,
        account: AccountId,
    ) -> Result<Vec<(NetworkId, Server)>, String>;

    async fn select_network_identity(
        &self,
        account: AccountId,
        network: NetworkId,
    ) -> Result<Option<Identity>, String>;
}

/// A handler a newly connected frontend hands the supervisor so it can be subscribed to its
/// account's broadcast streams.
pub type SubscriberHandle = mpsc::Sender<(std::time::Instant, Message)>;

/// The payload of an `AccountEvent` (§6). The core only interprets `ClientConnected`; any other
/// payload is ignored.
pub enum AccountEventPayload {
    ClientConnected(SubscriberHandle),
    Other,
}

pub struct AccountEvent {
    pub account_id: AccountId,
    pub payload: AccountEventPayload,
}

/// A readable queue of `AccountEvent`s. Never blocks the core beyond the read itself.
#[async_trait]
pub trait AccountEventSource: Send {
    async fn next(&mut self) -> Option<AccountEvent>;
}
