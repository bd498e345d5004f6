//! Planning: diff the declared graph against the snapshot and decide what
//! to create, update, replace, and delete.

mod diff;
mod plan;

pub use diff::{ChangeKind, ResourceDiff, StateDiffer};
pub use plan::{Plan, PlanSummary, PlannedDelete, PlannedOp, Planner};
