//! In-memory registry of live connectors.
//!
//! One map per user, keyed by [`SessionKey`]. The registry is the single
//! authority for the per-user session cap: every new admission goes through
//! [`SessionRegistry::admit`], which resolves same-dApp replacement and
//! oldest-first eviction under one entry lock so concurrent connects cannot
//! overshoot the cap.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::debug;

use crate::connector::ConnectorHandle;
use crate::session::{MAX_SESSIONS_PER_USER, SessionKey, UserId, now_ms};
use wcb_protocol::ProtocolVersion;

/// One live session slot.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub handle: ConnectorHandle,
    pub dapp_url: String,
    pub peer_id: String,
    pub created_at: i64,
}

impl RegistryEntry {
    pub fn new(handle: ConnectorHandle, dapp_url: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            handle,
            dapp_url: dapp_url.into(),
            peer_id: peer_id.into(),
            created_at: now_ms(),
        }
    }
}

/// Outcome of an admission attempt.
#[derive(Debug)]
pub enum Admission {
    /// Stored without displacing anything.
    Admitted,
    /// An existing session to the same dApp was swapped out in place; the
    /// cap was never consulted.
    Replaced {
        old_key: SessionKey,
        old_peer_id: String,
        old_handle: Option<ConnectorHandle>,
    },
    /// Stored at the cap; the oldest session was removed to make room. The
    /// victim's connector is returned so the caller can close it.
    AdmittedWithEviction {
        victim_key: SessionKey,
        victim_peer_id: String,
        victim: ConnectorHandle,
    },
}

#[derive(Default)]
pub struct SessionRegistry {
    users: DashMap<UserId, HashMap<SessionKey, RegistryEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an entry unconditionally, bypassing replacement and cap
    /// policy. Used for recovery and for connector placeholders.
    pub fn put(&self, user_id: &str, key: SessionKey, entry: RegistryEntry) {
        self.users
            .entry(user_id.to_string())
            .or_default()
            .insert(key, entry);
    }

    /// Admits a freshly settled session, applying same-dApp replacement
    /// first and the per-user cap second.
    pub fn admit(&self, user_id: &str, key: SessionKey, entry: RegistryEntry) -> Admission {
        let mut sessions = self.users.entry(user_id.to_string()).or_default();

        // Reconnecting to a dApp replaces its old slot rather than
        // occupying a second one.
        let replaced = sessions
            .iter()
            .find(|(k, slot)| **k != key && slot.dapp_url == entry.dapp_url && !k.is_placeholder_for(user_id))
            .map(|(k, _)| k.clone());
        if let Some(old_key) = replaced {
            let old = sessions.remove(&old_key);
            debug!(target: "wcb.registry", user_id, url = %entry.dapp_url, "replaced session for same dApp");
            sessions.insert(key, entry);
            return Admission::Replaced {
                old_key,
                old_peer_id: old.as_ref().map(|slot| slot.peer_id.clone()).unwrap_or_default(),
                old_handle: old.map(|slot| slot.handle),
            };
        }
        if sessions.contains_key(&key) {
            let old = sessions.insert(key.clone(), entry);
            return Admission::Replaced {
                old_key: key,
                old_peer_id: old.as_ref().map(|slot| slot.peer_id.clone()).unwrap_or_default(),
                old_handle: old.map(|slot| slot.handle),
            };
        }

        let live = sessions
            .keys()
            .filter(|k| !k.is_placeholder_for(user_id))
            .count();
        let evicted = if live >= MAX_SESSIONS_PER_USER {
            let victim_key = sessions
                .iter()
                .filter(|(k, _)| !k.is_placeholder_for(user_id))
                .min_by_key(|(_, slot)| slot.created_at)
                .map(|(k, _)| k.clone());
            victim_key.and_then(|victim_key| {
                sessions.remove(&victim_key).map(|victim| (victim_key, victim))
            })
        } else {
            None
        };

        sessions.insert(key, entry);
        match evicted {
            Some((victim_key, victim)) => {
                debug!(target: "wcb.registry", user_id, victim = %victim_key, "evicted oldest session at cap");
                Admission::AdmittedWithEviction {
                    victim_key,
                    victim_peer_id: victim.peer_id,
                    victim: victim.handle,
                }
            }
            None => Admission::Admitted,
        }
    }

    /// Looks up a handle. With no key, returns the user's v2 connector if
    /// one is live, settled or placeholder alike.
    pub fn get(&self, user_id: &str, key: Option<&SessionKey>) -> Option<ConnectorHandle> {
        let sessions = self.users.get(user_id)?;
        match key {
            Some(key) => sessions.get(key).map(|slot| slot.handle.clone()),
            None => sessions
                .values()
                .find(|slot| slot.handle.version() == ProtocolVersion::V2)
                .map(|slot| slot.handle.clone()),
        }
    }

    pub fn remove(&self, user_id: &str, key: &SessionKey) -> Option<RegistryEntry> {
        let mut sessions = self.users.get_mut(user_id)?;
        sessions.remove(key)
    }

    pub fn contains(&self, user_id: &str, key: &SessionKey) -> bool {
        self.users
            .get(user_id)
            .is_some_and(|sessions| sessions.contains_key(key))
    }

    /// Live session count, placeholders excluded.
    pub fn count_for_user(&self, user_id: &str) -> usize {
        self.users
            .get(user_id)
            .map(|sessions| {
                sessions
                    .keys()
                    .filter(|k| !k.is_placeholder_for(user_id))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Snapshot of a user's slots, placeholders excluded.
    pub fn entries_for_user(&self, user_id: &str) -> Vec<(SessionKey, RegistryEntry)> {
        self.users
            .get(user_id)
            .map(|sessions| {
                sessions
                    .iter()
                    .filter(|(k, _)| !k.is_placeholder_for(user_id))
                    .map(|(k, slot)| (k.clone(), slot.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::v1_test_handle;

    fn entry(handle: ConnectorHandle, url: &str, peer: &str, created_at: i64) -> RegistryEntry {
        RegistryEntry {
            handle,
            dapp_url: url.into(),
            peer_id: peer.into(),
            created_at,
        }
    }

    #[tokio::test]
    async fn admit_below_cap_is_plain() {
        let registry = SessionRegistry::new();
        let (handle, _sink) = v1_test_handle("u1", "peer-a");
        let admission = registry.admit(
            "u1",
            SessionKey::derive("peer-a"),
            entry(handle, "https://app.example", "peer-a", 1),
        );
        assert!(matches!(admission, Admission::Admitted));
        assert_eq!(registry.count_for_user("u1"), 1);
    }

    #[tokio::test]
    async fn same_url_different_key_replaces_without_eviction() {
        let registry = SessionRegistry::new();
        let mut sinks = Vec::new();
        for i in 0..MAX_SESSIONS_PER_USER {
            let peer = format!("peer-{i}");
            let (handle, sink) = v1_test_handle("u1", &peer);
            sinks.push(sink);
            registry.admit(
                "u1",
                SessionKey::derive(&peer),
                entry(handle, &format!("https://dapp{i}.example"), &peer, i as i64),
            );
        }
        // Re-pair with dapp0 under a fresh peer id.
        let (handle, _sink) = v1_test_handle("u1", "peer-new");
        let admission = registry.admit(
            "u1",
            SessionKey::derive("peer-new"),
            entry(handle, "https://dapp0.example", "peer-new", 99),
        );
        match admission {
            Admission::Replaced { old_key, .. } => {
                assert_eq!(old_key, SessionKey::derive("peer-0"));
            }
            other => panic!("expected replacement, got {other:?}"),
        }
        assert_eq!(registry.count_for_user("u1"), MAX_SESSIONS_PER_USER);
    }

    #[tokio::test]
    async fn at_cap_evicts_oldest() {
        let registry = SessionRegistry::new();
        let mut sinks = Vec::new();
        for i in 0..MAX_SESSIONS_PER_USER {
            let peer = format!("peer-{i}");
            let (handle, sink) = v1_test_handle("u1", &peer);
            sinks.push(sink);
            registry.admit(
                "u1",
                SessionKey::derive(&peer),
                // peer-2 is the oldest slot.
                entry(handle, &format!("https://dapp{i}.example"), &peer, if i == 2 { 1 } else { 10 + i as i64 }),
            );
        }
        let (handle, _sink) = v1_test_handle("u1", "peer-6");
        let admission = registry.admit(
            "u1",
            SessionKey::derive("peer-6"),
            entry(handle, "https://dapp6.example", "peer-6", 100),
        );
        match admission {
            Admission::AdmittedWithEviction { victim_key, victim_peer_id, .. } => {
                assert_eq!(victim_key, SessionKey::derive("peer-2"));
                assert_eq!(victim_peer_id, "peer-2");
            }
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(registry.count_for_user("u1"), MAX_SESSIONS_PER_USER);
        assert!(!registry.contains("u1", &SessionKey::derive("peer-2")));
    }

    #[tokio::test]
    async fn placeholders_do_not_count_toward_cap() {
        let registry = SessionRegistry::new();
        let (handle, _sink) = v1_test_handle("u1", "peer-a");
        registry.put(
            "u1",
            SessionKey::placeholder("u1"),
            entry(handle, "", "", 0),
        );
        assert_eq!(registry.count_for_user("u1"), 0);
        assert!(registry.entries_for_user("u1").is_empty());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let (handle, _sink) = v1_test_handle("u1", "peer-a");
        let key = SessionKey::derive("peer-a");
        registry.put("u1", key.clone(), entry(handle, "https://a", "peer-a", 1));
        assert!(registry.remove("u1", &key).is_some());
        assert!(registry.remove("u1", &key).is_none());
    }
}
