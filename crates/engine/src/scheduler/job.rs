//! Job records and the messages jobs send back

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::composite::SumParams;
use crate::normalize::NormalizeParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// `Pending -> Running -> {Succeeded, Failed, Canceled}`; a pending job
/// may also be canceled or failed directly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Shared flag a running job checks to stop early
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reported once per job, when it reaches a terminal state
#[derive(Debug, Clone)]
pub struct Completion {
    pub job: JobId,
    pub status: JobStatus,
    pub success: bool,
    pub output: Option<PathBuf>,
    pub description: String,
    /// Failure reason
    pub error: Option<String>,
}

/// Sent by jobs to the scheduler
#[derive(Debug)]
pub(crate) enum Event {
    Started(JobId),
    Finished {
        id: JobId,
        outcome: Result<PathBuf, String>,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum JobKind {
    Normalize {
        input: PathBuf,
        params: NormalizeParams,
        weight: f64,
        /// Cleaned layer name, for the composite summary
        name: String,
    },
    Composite {
        params: SumParams,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct JobRecord {
    pub id: JobId,
    pub description: String,
    pub status: JobStatus,
    pub kind: JobKind,
    pub parent: Option<JobId>,
    pub children: Vec<JobId>,
    pub token: CancelToken,
    /// Where the job writes its raster
    pub target: Option<PathBuf>,
    /// Handed to the executor; a result will come back
    pub dispatched: bool,
    pub output: Option<PathBuf>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(id: JobId, description: String, kind: JobKind, parent: Option<JobId>) -> Self {
        Self {
            id,
            description,
            status: JobStatus::Pending,
            kind,
            parent,
            children: Vec::new(),
            token: CancelToken::default(),
            target: None,
            dispatched: false,
            output: None,
            error: None,
        }
    }

    pub fn completion(&self) -> Completion {
        Completion {
            job: self.id,
            status: self.status,
            success: self.status == JobStatus::Succeeded,
            output: self.output.clone(),
            description: self.description.clone(),
            error: self.error.clone(),
        }
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            description: self.description.clone(),
            status: self.status,
            parent: self.parent,
            children: self.children.clone(),
            output: self.output.clone(),
            error: self.error.clone(),
        }
    }
}

/// Snapshot of a job for hosts
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub id: JobId,
    pub description: String,
    pub status: JobStatus,
    pub parent: Option<JobId>,
    pub children: Vec<JobId>,
    pub output: Option<PathBuf>,
    pub error: Option<String>,
}
