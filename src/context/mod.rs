//! Context and plan services: the three token-budgeted assemblers.
//!
//! - **manager**: decision/plan context composition within a token budget
//! - **plan**: pre-plan context built from the graph and calibration
//! - **validator**: mid-plan scanning of steps against graph knowledge

mod manager;
mod plan;
mod validator;

pub use manager::{
    AssembledContext, ContextManager, DecisionContextRequest, DocShotRef, SectionInfo,
};
pub use plan::{
    CalibrationSummary, FailedApproach, PlanContext, PlanContextBuilder, SuccessfulPattern,
};
pub use validator::{PlanValidation, PlanValidator, PlanWarning, WarningKind, WarningSeverity};
