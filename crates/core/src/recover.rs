//! Startup recovery: rebuild live connectors from persisted session records.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::artifacts::{TransportArtifacts, artifact_name};
use crate::connector::{ConnectorHandle, EventSink, V1Connector, V2Connector};
use crate::error::Result;
use crate::gateway::PersistenceGateway;
use crate::registry::{RegistryEntry, SessionRegistry};
use crate::relay::RelayFactory;
use crate::session::{SessionKey, SessionRecord, SessionState};

/// What a recovery pass accomplished.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub restored_v1: usize,
    pub restored_v2: usize,
    /// Records whose session was already live in the registry.
    pub skipped: usize,
    /// Records that could not be restored; they stay persisted for a later
    /// attempt.
    pub failed: usize,
    pub purged_artifacts: usize,
}

/// Restores every persisted session into the registry, reusing already-live
/// connectors so the pass is safe to run repeatedly. Afterwards, relay
/// artifacts belonging to users with no surviving v2 session are purged.
pub async fn recover(
    registry: &SessionRegistry,
    gateway: &dyn PersistenceGateway,
    factory: &dyn RelayFactory,
    artifacts: &dyn TransportArtifacts,
    sink: &EventSink,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let mut keep = HashSet::new();

    for record in gateway.list_sessions().await? {
        let key = record.session_key();
        if matches!(record.session, SessionState::V2(_)) {
            // Live or not, the user's relay state file is still in use.
            keep.insert(artifact_name(&record.user_id));
        }
        if registry.contains(&record.user_id, &key) {
            report.skipped += 1;
            continue;
        }
        match restore_record(registry, factory, sink, &record, key).await {
            Ok(version) => match version {
                RestoredVersion::V1 => report.restored_v1 += 1,
                RestoredVersion::V2 => report.restored_v2 += 1,
            },
            Err(err) => {
                warn!(target: "wcb.recover", user_id = %record.user_id, peer_id = %record.peer_id, %err, "failed to restore session");
                report.failed += 1;
            }
        }
    }

    report.purged_artifacts = artifacts.purge_except(&keep)?;
    info!(
        target: "wcb.recover",
        restored_v1 = report.restored_v1,
        restored_v2 = report.restored_v2,
        skipped = report.skipped,
        failed = report.failed,
        purged = report.purged_artifacts,
        "recovery pass complete"
    );
    Ok(report)
}

enum RestoredVersion {
    V1,
    V2,
}

async fn restore_record(
    registry: &SessionRegistry,
    factory: &dyn RelayFactory,
    sink: &EventSink,
    record: &SessionRecord,
    key: SessionKey,
) -> Result<RestoredVersion> {
    match &record.session {
        SessionState::V1(session) => {
            let parts = factory.v1_resume(session).await?;
            let connector = V1Connector::new(record.user_id.clone(), parts, sink.clone());
            connector.attach(session.clone());
            registry.put(
                &record.user_id,
                key,
                RegistryEntry {
                    handle: ConnectorHandle::V1(connector),
                    dapp_url: record.url.clone(),
                    peer_id: record.peer_id.clone(),
                    created_at: record.date,
                },
            );
            Ok(RestoredVersion::V1)
        }
        SessionState::V2(session) => {
            let connector = match registry
                .get(&record.user_id, None)
                .and_then(|handle| handle.as_v2().cloned())
            {
                Some(connector) => connector,
                None => {
                    let parts = factory.v2_for_user(&record.user_id).await?;
                    let connector =
                        V2Connector::new(record.user_id.clone(), parts, sink.clone());
                    // Placeholder slot keeps the shared connector reachable
                    // even before any topic is restored.
                    registry.put(
                        &record.user_id,
                        SessionKey::placeholder(&record.user_id),
                        RegistryEntry::new(ConnectorHandle::V2(connector.clone()), "", ""),
                    );
                    connector
                }
            };
            connector.attach_session(key.clone(), session.clone());
            registry.put(
                &record.user_id,
                key,
                RegistryEntry {
                    handle: ConnectorHandle::V2(connector),
                    dapp_url: record.url.clone(),
                    peer_id: record.peer_id.clone(),
                    created_at: record.date,
                },
            );
            Ok(RestoredVersion::V2)
        }
    }
}
