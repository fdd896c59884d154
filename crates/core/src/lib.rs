//! Domain types and pure logic shared by the storage layer, the outbound
//! clients and the reconciliation pass.

pub mod availability;
pub mod deadline;
pub mod normalizer;
pub mod quota;
pub mod types;

pub use availability::{Availability, AvailabilityCode, UnrecognizedAvailabilityCode};
pub use deadline::SoftDeadline;
pub use normalizer::{is_valid_domain_name, normalize_domain_name};
pub use quota::SlidingWindow;
pub use types::{
    DomainCheckResult, DomainStatus, InvalidDomainStatus, NotificationOutcome,
    NotificationRecord, ReconcileSummary, TrackedDomain,
};
