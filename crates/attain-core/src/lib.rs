//! attain-core: evaluation session coordinator, data model, and traits.
//!
//! This crate keeps a client-side grading session consistent with the
//! authoritative grading server: snapshot resolution, the single active
//! (student, snapshot) session, optimistic criterion writes reconciled by
//! refetch, and the finalize/reopen lock.

pub mod coordinator;
pub mod error;
pub mod finalization;
pub mod model;
pub mod selection;
pub mod session;
pub mod snapshot;
pub mod traits;
pub mod writes;

pub use coordinator::{CoordinatorConfig, Delivery, EvaluationCoordinator};
pub use error::{BackendError, CoordinatorError, ErrorKind};
pub use finalization::{ClassFinalizeReport, FinalizationState};
pub use session::{Session, SessionKey};
pub use traits::{AuthObserver, GradingBackend};
