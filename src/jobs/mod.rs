pub mod store;

pub use store::{EnqueueOutcome, JobPoll, JobStatus, JobStore};
