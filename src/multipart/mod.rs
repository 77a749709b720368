//! Multipart upload planning and coordination.

mod coordinator;
pub mod planner;
mod session;

pub use coordinator::{UploadCoordinator, UploadOptions};
pub use planner::{PartPlan, PartRange, PartSizing};
pub use session::{PartRecord, PartStatus, UploadSession, UploadState};
