pub mod client;
pub mod error;
pub mod events;
pub mod registry;
pub mod scheduler;

pub use client::{GitHubHostClient, PrDetail, RateLimitInfo};
pub use error::{GitHubError, Result};
pub use events::{NullSink, PrEventSink};
pub use registry::GitHubRegistry;
pub use scheduler::PrScheduler;
