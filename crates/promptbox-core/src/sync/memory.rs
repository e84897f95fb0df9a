//! In-process remote store implementing the server half of the wire contract.
//!
//! One `MemoryRemote` holds the data of a single account. Tests drive every
//! sync scenario through it without a network.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::protocol::{
    RegisterDeviceRequest, RegisterDeviceResponse, RemoteStore, ResolveConflictRequest,
    ResolveConflictResponse, ResolveStrategy, SyncRequest, SyncResponse, SyncedEntity,
    WireConflict, WireEntity,
};
use crate::conflict::{classify, Classification, Side, CONFLICT_WINDOW_MS};
use crate::error::{Error, Result};
use crate::models::{validate_device_name, Prompt};
use crate::util::now;

const REMOTE_OWNER: &str = "remote";

/// Losing side of a manual conflict, kept until resolved and purged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: String,
    pub entity_id: String,
    pub device_id: String,
    pub entity: WireEntity,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredEntity {
    entity: WireEntity,
    seq: u64,
}

#[derive(Debug, Default)]
struct RemoteState {
    entities: HashMap<String, StoredEntity>,
    revisions: Vec<Revision>,
    devices: HashMap<String, String>,
    seq: u64,
    offline: bool,
    unauthorized: bool,
    failure_status: Option<u16>,
    sync_calls: usize,
}

impl RemoteState {
    fn put(&mut self, entity: WireEntity) -> u64 {
        self.seq += 1;
        let seq = self.seq;
        self.entities
            .insert(entity.id.clone(), StoredEntity { entity, seq });
        seq
    }

    fn check_available(&self) -> Result<()> {
        if self.offline {
            return Err(Error::Network("remote store unreachable".to_string()));
        }
        if self.unauthorized {
            return Err(Error::Unauthorized("access token rejected".to_string()));
        }
        if let Some(status) = self.failure_status {
            return Err(Error::remote(status, "injected failure"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    window_ms: i64,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new(CONFLICT_WINDOW_MS)
    }
}

impl MemoryRemote {
    pub fn new(window_ms: i64) -> Self {
        Self {
            state: Mutex::new(RemoteState::default()),
            window_ms,
        }
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate losing connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Reject every call as unauthorized.
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.state().unauthorized = unauthorized;
    }

    /// Answer every call with the given HTTP status.
    pub fn set_failure(&self, status: Option<u16>) {
        self.state().failure_status = status;
    }

    pub fn sync_calls(&self) -> usize {
        self.state().sync_calls
    }

    pub fn entity(&self, id: &str) -> Option<WireEntity> {
        self.state()
            .entities
            .get(id)
            .map(|stored| stored.entity.clone())
    }

    pub fn entity_count(&self) -> usize {
        self.state().entities.len()
    }

    pub fn device_count(&self) -> usize {
        self.state().devices.len()
    }

    /// Store an entity as if another device had uploaded it.
    pub fn seed(&self, mut entity: WireEntity) {
        entity.checksum = crate::checksum::checksum(&entity.title, &entity.content);
        entity.version = Some(entity.version.unwrap_or(1).max(1));
        self.state().put(entity);
    }

    /// Revisions recorded for `entity_id`, resolved ones included.
    pub fn revisions(&self, entity_id: &str) -> Vec<Revision> {
        self.state()
            .revisions
            .iter()
            .filter(|revision| revision.entity_id == entity_id)
            .cloned()
            .collect()
    }

    /// Drop resolved revisions. Returns how many were removed.
    pub fn purge_resolved_revisions(&self) -> usize {
        let mut state = self.state();
        let before = state.revisions.len();
        state.revisions.retain(|revision| !revision.resolved);
        before - state.revisions.len()
    }

    fn to_prompt(entity: &WireEntity) -> Result<Prompt> {
        entity.clone().into_prompt(REMOTE_OWNER)
    }

    fn to_wire(prompt: &Prompt, device_id: Option<String>) -> WireEntity {
        let mut entity = WireEntity::from_prompt(prompt);
        entity.device_id = device_id;
        entity
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let mut state = self.state();
        state.check_available()?;
        state.sync_calls += 1;

        let cursor = match request.sync_token.as_deref() {
            Some(token) => Some(
                token
                    .parse::<u64>()
                    .map_err(|_| Error::remote(400, format!("invalid sync token {token}")))?,
            ),
            None => None,
        };

        let mut incoming = Vec::with_capacity(request.entities.len());
        for entity in &request.entities {
            let prompt =
                Self::to_prompt(entity).map_err(|error| Error::remote(400, error.to_string()))?;
            incoming.push(prompt);
        }

        let mut response = SyncResponse::default();
        let mut forced = HashSet::new();

        for client in incoming {
            let id = client.id.as_str();
            let existing = state.entities.get(&id).map(|stored| stored.entity.clone());
            let Some(existing) = existing else {
                let entity = Self::to_wire(&client, Some(request.device_id.clone()));
                response.synced.push(SyncedEntity {
                    client_id: id.clone(),
                    server_id: id,
                    checksum: entity.checksum.clone(),
                    version: client.version,
                });
                state.put(entity);
                continue;
            };

            let server = Self::to_prompt(&existing)?;
            match classify(&client, &server, self.window_ms) {
                Classification::Merged(mut merged) => {
                    if merged != server {
                        merged.version = server.version + 1;
                        state.put(Self::to_wire(&merged, existing.device_id.clone()));
                    }
                    response.synced.push(SyncedEntity {
                        client_id: id.clone(),
                        server_id: id,
                        checksum: merged.checksum.clone(),
                        version: merged.version,
                    });
                }
                Classification::AutoResolved {
                    winner: Side::Local,
                    prompt: mut winner,
                } => {
                    winner.version = server.version + 1;
                    winner.created_at = server.created_at;
                    response.synced.push(SyncedEntity {
                        client_id: id.clone(),
                        server_id: id,
                        checksum: winner.checksum.clone(),
                        version: winner.version,
                    });
                    state.put(Self::to_wire(&winner, Some(request.device_id.clone())));
                }
                Classification::AutoResolved {
                    winner: Side::Remote,
                    ..
                } => {
                    forced.insert(id);
                }
                Classification::Manual { .. } => {
                    let revision = Revision {
                        id: Uuid::new_v4().to_string(),
                        entity_id: id.clone(),
                        device_id: request.device_id.clone(),
                        entity: Self::to_wire(&client, Some(request.device_id.clone())),
                        resolved: false,
                        created_at: now(),
                    };
                    response.conflicts.push(WireConflict {
                        entity_id: id,
                        server_version: existing,
                        client_version: revision.entity.clone(),
                        revision_id: revision.id.clone(),
                    });
                    state.revisions.push(revision);
                }
            }
        }

        let mut changed: Vec<&StoredEntity> = state
            .entities
            .values()
            .filter(|stored| {
                let since_cursor = match (cursor, request.last_sync_at) {
                    (Some(cursor), _) => stored.seq > cursor,
                    (None, Some(since)) => stored.entity.updated_at > since,
                    (None, None) => true,
                };
                since_cursor || forced.contains(&stored.entity.id)
            })
            .collect();
        changed.sort_by_key(|stored| stored.seq);
        response.server_entities = changed
            .into_iter()
            .map(|stored| stored.entity.clone())
            .collect();
        response.sync_token = state.seq.to_string();

        tracing::debug!(
            "Memory remote processed {} entities: {} synced, {} conflicts, {} pulled",
            request.entities.len(),
            response.synced.len(),
            response.conflicts.len(),
            response.server_entities.len()
        );
        Ok(response)
    }

    async fn register_device(
        &self,
        request: &RegisterDeviceRequest,
    ) -> Result<RegisterDeviceResponse> {
        let mut state = self.state();
        state.check_available()?;
        let name = validate_device_name(&request.device_name)
            .map_err(|error| Error::remote(400, error.to_string()))?;

        let device_id = request
            .device_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        state.devices.insert(device_id.clone(), name);
        Ok(RegisterDeviceResponse {
            device_id,
            last_seen_at: now(),
        })
    }

    async fn resolve_conflict(
        &self,
        request: &ResolveConflictRequest,
    ) -> Result<ResolveConflictResponse> {
        let mut state = self.state();
        state.check_available()?;

        let position = state
            .revisions
            .iter()
            .position(|revision| {
                revision.id == request.revision_id && revision.entity_id == request.entity_id
            })
            .ok_or_else(|| {
                Error::remote(404, format!("revision {} not found", request.revision_id))
            })?;
        if state.revisions[position].resolved {
            return Err(Error::remote(
                409,
                format!("revision {} already resolved", request.revision_id),
            ));
        }
        let current = state
            .entities
            .get(&request.entity_id)
            .map(|stored| stored.entity.clone())
            .ok_or_else(|| Error::remote(404, format!("entity {} not found", request.entity_id)))?;

        let mut canonical = Self::to_prompt(&current)?;
        let source = match request.strategy {
            ResolveStrategy::KeepCurrent => None,
            ResolveStrategy::UseRevision => Some(state.revisions[position].entity.clone()),
            ResolveStrategy::ManualMerge => Some(request.merged_data.clone().ok_or_else(|| {
                Error::remote(400, "manual-merge requires mergedData")
            })?),
        };
        if let Some(source) = source {
            let source = Self::to_prompt(&source)?;
            canonical.set_text(source.title, source.content);
            canonical.tags = source.tags;
            canonical.pinned = source.pinned;
            canonical.sort_order = source.sort_order;
            canonical.archived_at = source.archived_at;
        }
        canonical.touch();

        let updated = Self::to_wire(&canonical, current.device_id);
        state.put(updated.clone());
        state.revisions[position].resolved = true;

        Ok(ResolveConflictResponse {
            success: true,
            updated_entity: Some(updated),
            message: Some(format!("Conflict resolved with {:?}", request.strategy)),
        })
    }

    async fn fetch_all(&self) -> Result<Vec<WireEntity>> {
        let state = self.state();
        state.check_available()?;
        let mut entities: Vec<&StoredEntity> = state.entities.values().collect();
        entities.sort_by_key(|stored| stored.seq);
        Ok(entities
            .into_iter()
            .map(|stored| stored.entity.clone())
            .collect())
    }

    async fn clear_all(&self) -> Result<usize> {
        let mut state = self.state();
        state.check_available()?;
        let removed = state.entities.len();
        state.entities.clear();
        state.revisions.clear();
        state.seq += 1;
        Ok(removed)
    }
}
