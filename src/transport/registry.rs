//! Executor Registry (§3 `ExecutorRegistration`, §4.2).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Executor,
    Bridge,
}

#[derive(Debug, Clone)]
pub struct ExecutorRegistration {
    pub connection_id: Uuid,
    pub application: String,
    pub role: Role,
    pub connected_at: DateTime<Utc>,
}

/// Tracks connected executors/bridges by application tag and role, and
/// exposes readiness: only `role == Executor` connections count (§3, §4.2).
#[derive(Default)]
pub struct ExecutorRegistry {
    connections: RwLock<HashMap<Uuid, ExecutorRegistration>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection_id: Uuid, application: String, role: Role) {
        let reg = ExecutorRegistration {
            connection_id,
            application,
            role,
            connected_at: Utc::now(),
        };
        self.connections.write().await.insert(connection_id, reg);
    }

    pub async fn unregister(&self, connection_id: Uuid) {
        self.connections.write().await.remove(&connection_id);
    }

    /// `true` iff at least one `role == Executor` connection is registered
    /// for `application`.
    pub async fn is_ready(&self, application: &str) -> bool {
        self.connections
            .read()
            .await
            .values()
            .any(|r| r.role == Role::Executor && r.application == application)
    }

    /// An immutable snapshot of executor connections for `application`,
    /// for readiness responses and routing (§3: "readers obtain immutable
    /// snapshots").
    pub async fn executors_for(&self, application: &str) -> Vec<ExecutorRegistration> {
        self.connections
            .read()
            .await
            .values()
            .filter(|r| r.role == Role::Executor && r.application == application)
            .cloned()
            .collect()
    }

    /// Pick one executor connection id to route a command to. A
    /// process-local proxy with typically one executor per application
    /// just returns the first; ties are broken by connection order.
    pub async fn pick_executor(&self, application: &str) -> Option<Uuid> {
        self.executors_for(application)
            .await
            .into_iter()
            .min_by_key(|r| r.connected_at)
            .map(|r| r.connection_id)
    }
}
