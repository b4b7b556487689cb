use common::id::AuditRecordId;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A best-effort audit trail record. Saved alongside the operations that
/// produce it, but never allowed to fail them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditRecordId,
    /// Who performed the action: `customer:<id>`, `admin:<name>`,
    /// `bot:<name>`, or `system`.
    pub actor: String,
    pub action: String,
    pub entity: String,
    pub entity_uuid: Option<Uuid>,
    pub detail: serde_json::Value,
    pub created_at: TimestampMs,
}
