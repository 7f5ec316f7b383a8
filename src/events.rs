// src/events.rs

//! Notifications published to observers.
//!
//! Status events carry only the delta (id, status, return code); output is
//! streamed separately as `job.output` so long-running jobs never resend
//! their whole captured output.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::model::Job;
use crate::types::{JobId, JobStatus, OutputStream};

/// Default capacity of the broadcast channel.
pub const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum JobEvent {
    #[serde(rename = "job.created")]
    Created { job: Box<Job> },

    #[serde(rename = "job.updated")]
    Updated { job: Box<Job> },

    #[serde(rename = "job.deleted")]
    Deleted { id: JobId },

    #[serde(rename = "job.status_changed")]
    StatusChanged {
        id: JobId,
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        return_code: Option<i32>,
    },

    #[serde(rename = "job.output")]
    Output {
        job_id: JobId,
        stream: OutputStream,
        content: String,
    },
}

/// Publish/subscribe channel for [`JobEvent`]s.
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: JobEvent) {
        trace!(?event, "publishing job event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}
