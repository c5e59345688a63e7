//! Content-addressed aggregation jobs
//!
//! - [`key`]: job ids derived from the request and the dump mtimes
//! - [`artifacts`]: the on-disk state of every job
//! - [`manager`]: dispatch, worker pool, reaping

pub mod artifacts;
pub mod key;
pub mod manager;

pub use artifacts::{ArtifactState, ArtifactStore};
pub use key::{is_job_id, job_key, JobRequest};
pub use manager::{AggregatorBuilder, ArtifactBuilder, JobManager, JobStatus};
