pub mod scheduler;

pub use scheduler::{
    JOB_BASELINE_REFRESH, JOB_INGESTION, JOB_RE_EXTRACTION, JobEntry, Scheduler, SchedulerHandle,
};
