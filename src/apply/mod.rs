//! Apply execution: retries, concurrency, commit ordering, and reporting.

mod executor;
mod report;
mod retry;

pub use executor::ApplyExecutor;
pub use report::{ApplyReport, ResourceOutcome, ResourceResult};
pub use retry::RetryPolicy;
