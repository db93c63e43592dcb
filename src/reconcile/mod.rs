//! The reconciliation engine.
//!
//! [`ResourceCache`] holds the remote state for one run,
//! [`DependencyResolver`] turns rows into [`TestSpec`]s, [`diff::compare`]
//! decides what to do with each and [`Reconciler`] drives the whole run.

pub mod builder;
pub mod cache;
pub mod diff;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod resolver;
pub mod status;

pub use builder::TestSpec;
pub use cache::{ExistingTest, ResourceCache};
pub use diff::{ChangeSet, Decision, Field, FieldChange};
pub use error::ReconcileError;
pub use orchestrator::{Reconciler, RunMode, RunParams};
pub use report::{RemovalOutcome, RowOutcome, RunCounts, RunReport, RunStatus, Stage};
pub use resolver::{DependencyResolver, Resolved, ResolutionError};
pub use status::{set_status, StatusItem, StatusOutcome, StatusParams, StatusReport};
