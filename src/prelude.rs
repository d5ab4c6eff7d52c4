//! The purpose of this module is to alleviate the need to import many of the `[vidgen]` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use vidgen::prelude::*;
//! ```
pub use crate::client::{ApiError, CancelOutcome, GenerationClient, PollResponse, RemoteStatus};
pub use crate::cost::{CostConfig, GenerationCost};
pub use crate::entitlements::{Entitlements, StaticEntitlements};
pub use crate::events::JobEvent;
pub use crate::job::settings::{GenerationRequest, GenerationSettings, Quality, Resolution};
pub use crate::job::{Job, JobId, JobStage, JobStatus};
pub use crate::orchestrator::{Orchestrator, OrchestratorConfig};
pub use crate::poll::{Jitter, PollPolicy};
pub use crate::queue::{Priority, QueueConfig, QueueManager, QueueStatus};
pub use crate::store::JobStore;
pub use crate::{Result, VidgenError};
