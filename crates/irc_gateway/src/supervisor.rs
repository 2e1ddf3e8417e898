//! Given the account → network × identity × server tables, establish or refresh the full map of
//! connections and route newly-connected frontends to them (C7, §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use irc_common::{AccountId, ChanName, Key, NetworkId};

use crate::broadcast::Hub;
use crate::config::Gateway;
use crate::connection::ConnectionStatus;
use crate::errors::SupervisorError;
use crate::registration::connect_and_register;
use crate::store::{AccountEvent, AccountEventPayload, AccountEventSource, AccountStore};

/// `AccountID → NetworkID → Hub`. Single-writer (the supervisor task), multi-reader.
pub type ConnectionMap = Arc<DashMap<AccountId, Arc<DashMap<NetworkId, Arc<Hub>>>>>;

pub fn new_connection_map() -> ConnectionMap {
    Arc::new(DashMap::new())
}

/// Re-scan every account, opening connections for networks that don't already have a live entry.
/// A database error aborts the whole refresh and leaves `existing` untouched (§4.7, §7).
pub async fn reconnect_all(
    existing: ConnectionMap,
    store: &dyn AccountStore,
    cfg: &Gateway,
) -> Result<ConnectionMap, SupervisorError> {
    let accounts = store
        .select_accounts()
        .await
        .map_err(SupervisorError::Store)?;

    for account in accounts {
        let servers = store
            .select_servers_to_reconnect(account)
            .await
            .map_err(SupervisorError::Store)?;

        let account_map = existing
            .entry(account)
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone();

        for (network_id, server) in servers {
            // A stale entry (a hub whose connection already closed) is reclaimed so a fresh
            // attempt can replace it, inheriting its last-known channel map per §9's "resend
            // keys verbatim on reconnect" assumption. A live entry is left alone.
            let stale_channels = match account_map.get(&network_id) {
                Some(hub) if hub.connection().status() == ConnectionStatus::Closed => {
                    Some(hub.connection().channels())
                }
                Some(_) => continue,
                None => None,
            };

            let identity = match store
                .select_network_identity(account, network_id)
                .await
                .map_err(SupervisorError::Store)?
            {
                Some(identity) => identity,
                None => {
                    log::warn!("supervisor: no identity for account {account:?}/{network_id:?}, skipping");
                    continue;
                }
            };

            let channels: HashMap<ChanName, Option<Key>> = stale_channels.unwrap_or_default();

            match connect_and_register(&server, &identity, channels, cfg).await {
                Ok(registered) => {
                    let hub = Hub::spawn(
                        registered.connection,
                        registered.reader,
                        registered.backlog,
                        cfg.subscriber_buffer,
                        cfg_duration(cfg.ping_interval_secs),
                        cfg_duration(cfg.pong_timeout_secs),
                    );
                    account_map.insert(network_id, hub);
                }
                Err(e) => {
                    log::warn!(
                        "supervisor: failed to connect account {account:?}/{network_id:?}: {e}"
                    );
                }
            }
        }
    }

    Ok(existing)
}

fn cfg_duration(secs: u64) -> std::time::Duration {
    std::time::Duration::from_secs(secs)
}

/// Drain `events` forever, subscribing newly connected frontends to their account's existing
/// hubs. Unknown event payloads are ignored; a subscriber error never terminates the loop.
pub async fn run_event_loop(connections: ConnectionMap, mut events: Box<dyn AccountEventSource>) {
    while let Some(AccountEvent { account_id, payload }) = events.next().await {
        match payload {
            AccountEventPayload::ClientConnected(handler) => {
                if let Some(networks) = connections.get(&account_id) {
                    for hub in networks.iter() {
                        hub.value().subscribe(handler.clone());
                    }
                } else {
                    log::info!("supervisor: ClientConnected for unknown account {account_id:?}");
                }
            }
            AccountEventPayload::Other => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_doubles::InMemoryStore;
    use irc_common::Server;

    #[tokio::test]
    async fn reconnect_all_skips_network_with_no_identity() {
        let mut store = InMemoryStore::default();
        store.accounts.push(AccountId(1));
        store.servers.insert(
            AccountId(1),
            vec![(
                NetworkId(1),
                Server {
                    host: "irc.example.org".to_string(),
                    port: 6667,
                    tls: irc_common::TlsMode::None,
                },
            )],
        );
        // No identity registered for (1, 1): the network is skipped, not an error.
        let cfg = Gateway::default();
        let map = new_connection_map();
        let map = reconnect_all(map, &store, &cfg).await.unwrap();
        assert!(map.get(&AccountId(1)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconnect_all_propagates_store_errors() {
        struct FailingStore;

        #[async_trait::async_trait]
        impl AccountStore for FailingStore {
            async fn select_accounts(&self) -> Result<Vec<AccountId>, String> {
                Err("db down".to_string())
            }
            async fn select_servers_to_reconnect(
                &self,
                _account: AccountId,
            ) -> Result<Vec<(NetworkId, irc_common::Server)>, String> {
                unreachable!()
            }
            async fn select_network_identity(
                &self,
                _account: AccountId,
                _network: NetworkId,
            ) -> Result<Option<irc_common::Identity>, String> {
                unreachable!()
            }
        }

        let cfg = Gateway::default();
        let map = new_connection_map();
        let result = reconnect_all(map, &FailingStore, &cfg).await;
        assert!(matches!(result, Err(SupervisorError::Store(_))));
    }
}
