//! Data models for promptbox

mod audit;
mod device;
mod prompt;
mod queue_item;
mod snapshot;
mod sync_conflict;
mod tag;

pub use audit::{AuditAction, AuditEntry, AUDIT_LOG_CAPACITY};
pub use device::{validate_device_name, DeviceIdentity, DeviceType, MAX_DEVICE_NAME_CHARS};
pub use prompt::{
    normalize_tag, normalize_tags, NewPrompt, Prompt, PromptId, PromptPatch, LOCAL_OWNER,
    MAX_CONTENT_CHARS, MAX_RECORD_BYTES, MAX_TITLE_CHARS,
};
pub use queue_item::{QueueItem, QueueOp, QueueStatus, MAX_ATTEMPTS};
pub use snapshot::MigrationSnapshot;
pub use sync_conflict::{ConflictRecord, Resolution};
pub use tag::{Tag, TagCount, TagId};
