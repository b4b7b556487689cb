//! Best-effort audit records.

use common::id::AuditRecordId;
use common::time::TimestampMs;
use tracing::warn;
use uuid::Uuid;

use crate::models::audit::AuditRecord;
use crate::repo::StoreTxn;

/// Save an audit record through the open handle. Audit writes never fail
/// the enclosing operation; errors are logged only.
pub async fn record<T: StoreTxn>(
    txn: &mut T,
    actor: impl Into<String>,
    action: impl Into<String>,
    entity: impl Into<String>,
    entity_uuid: Option<Uuid>,
    detail: serde_json::Value,
    now: TimestampMs,
) {
    let record = AuditRecord {
        id: AuditRecordId::new(0),
        actor: actor.into(),
        action: action.into(),
        entity: entity.into(),
        entity_uuid,
        detail,
        created_at: now,
    };
    if let Err(e) = txn.insert_audit_record(record).await {
        warn!("Failed to save audit record: {e}");
    }
}
