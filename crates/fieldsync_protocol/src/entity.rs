//! Domain entities carried by the sync protocol.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed set of entity types the engine synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A work order assigned to a technician.
    Job,
    /// An answer to one checklist item of a job.
    ChecklistResponse,
    /// Photo metadata; the image itself travels as an attachment.
    Photo,
    /// A captured customer signature.
    Signature,
}

impl EntityKind {
    /// Every kind, in a stable order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Job,
        EntityKind::ChecklistResponse,
        EntityKind::Photo,
        EntityKind::Signature,
    ];

    /// Returns the snake_case name used on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Job => "job",
            EntityKind::ChecklistResponse => "checklist_response",
            EntityKind::Photo => "photo",
            EntityKind::Signature => "signature",
        }
    }

    /// Parses a snake_case name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one entity: its kind plus its domain identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity type.
    pub kind: EntityKind,
    /// Domain identifier, unique within the kind.
    pub id: String,
}

impl EntityKey {
    /// Creates a key.
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand for a job key.
    pub fn job(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Job, id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Assigned but not started.
    Scheduled,
    /// Technician is on site.
    InProgress,
    /// Work finished and submitted.
    Completed,
    /// Withdrawn by dispatch.
    Cancelled,
}

/// Job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Current status.
    pub status: JobStatus,
    /// Free-form technician notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// When the job was completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

impl Job {
    /// A job with the given status and nothing else set.
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status,
            notes: None,
            completed_at: None,
        }
    }
}

/// Answer to a checklist item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistValue {
    /// Yes / no item.
    Bool(bool),
    /// Free text item.
    Text(String),
    /// Numeric reading.
    Number(f64),
}

/// Checklist response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistResponse {
    /// Owning job.
    pub job_id: String,
    /// Checklist item being answered.
    pub item_id: String,
    /// The answer.
    pub value: ChecklistValue,
    /// Optional remark.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Photo metadata payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    /// Owning job.
    pub job_id: String,
    /// Caption entered by the technician.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// MIME type of the image.
    pub content_type: String,
    /// Capture time.
    pub captured_at: Timestamp,
}

/// Signature payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Owning job.
    pub job_id: String,
    /// Name of the person who signed.
    pub signer_name: String,
    /// Signing time.
    pub signed_at: Timestamp,
}

/// Typed entity data, one variant per [`EntityKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityData {
    /// Job data.
    Job(Job),
    /// Checklist response data.
    ChecklistResponse(ChecklistResponse),
    /// Photo metadata.
    Photo(Photo),
    /// Signature data.
    Signature(Signature),
}

impl EntityData {
    /// Returns the kind of entity this data describes.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityData::Job(_) => EntityKind::Job,
            EntityData::ChecklistResponse(_) => EntityKind::ChecklistResponse,
            EntityData::Photo(_) => EntityKind::Photo,
            EntityData::Signature(_) => EntityKind::Signature,
        }
    }

    /// Returns the job payload, if this is a job.
    pub fn as_job(&self) -> Option<&Job> {
        match self {
            EntityData::Job(job) => Some(job),
            _ => None,
        }
    }
}

impl From<Job> for EntityData {
    fn from(job: Job) -> Self {
        EntityData::Job(job)
    }
}

impl From<ChecklistResponse> for EntityData {
    fn from(response: ChecklistResponse) -> Self {
        EntityData::ChecklistResponse(response)
    }
}

impl From<Photo> for EntityData {
    fn from(photo: Photo) -> Self {
        EntityData::Photo(photo)
    }
}

impl From<Signature> for EntityData {
    fn from(signature: Signature) -> Self {
        EntityData::Signature(signature)
    }
}
