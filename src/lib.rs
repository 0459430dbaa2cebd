//! # Conclave
//!
//! Hierarchical delivery-team orchestration - plan, implement, verify, escalate.
//!
//! A router owns companies; companies own divisions and teams; each team turns
//! a goal into tasks and drives role-bound workers until the work is verified
//! or has to be escalated.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                               ROUTER                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────────┐   │
//! │  │ Intent Class.│  │Company Factory│ │ Human Escalation Handler │   │
//! │  └──────────────┘  └──────────────┘  └──────────────────────────┘   │
//! └────────────────────────────┬────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!   ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//!   │   Company   │     │   Company   │     │   Company   │
//!   └──────┬──────┘     └──────┬──────┘     └──────┬──────┘
//!          │                   │                   │
//!     ┌────┴─────┐        ┌────┴─────┐             ▼
//!     ▼          ▼        ▼          ▼       ┌───────────┐
//!  ┌──────┐  ┌──────┐  ┌──────┐  ┌──────┐    │ Division  │
//!  │ Team │  │ Ops  │  │ Team │  │ Team │    └───────────┘
//!  └──┬───┘  └──────┘  └──────┘  └──────┘
//!     │
//!     ├── Planner ──► PlanBreakdown
//!     ├── Implementers ──► TaskRunner (retry, sufficiency, verifier)
//!     └── Verifier ──► fix tasks ──► next iteration
//! ```
//!
//! Failures that a level cannot resolve travel upward as
//! [`EscalationRecord`] values; only the [`Router`] hands them to a human.
//!
//! ## Key Concepts
//!
//! - **Worker**: a role-bound actor that may invoke permitted capabilities
//! - **Capability**: a named action, restricted to the roles that may use it
//! - **Task**: a unit of work with a bounded number of attempts
//! - **Team**: runs plan, implement, verify and iterate for one goal
//! - **Escalation**: an unresolved failure and the chain of levels it crossed

pub mod agent;
pub mod capability;
pub mod category;
pub mod channel;
pub mod company;
pub mod config;
pub mod division;
pub mod docs;
pub mod error;
pub mod escalation;
pub mod hierarchy;
pub mod ops;
pub mod planner;
pub mod prompt;
pub mod retry;
pub mod router;
pub mod routing;
pub mod task;
pub mod team;
pub mod types;
pub mod verifier;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use agent::{Agent, AgentConfig, LanguageModel};
pub use capability::{Capability, CapabilityOutcome, CapabilityRegistry, CapabilitySpec, InvocationRecord};
pub use category::{classify_task, DeployTarget, TaskCategory};
pub use channel::{Event, EventChannel, EventSink};
pub use company::{Company, CompanyHandle, CompanyReport};
pub use config::{EngineConfig, OpsConfig, RetryConfig, TeamConfig};
pub use division::{Division, GoalHandler, GoalKind, TeamUnit, UnitReport};
pub use docs::{DocumentStore, FsDocumentStore, MemoryDocumentStore};
pub use error::{ConclaveError, Result};
pub use escalation::{EscalationContext, EscalationHandler, EscalationRecord};
pub use hierarchy::{OrgHierarchy, OrgTree, UnitKind, UnitStatus};
pub use ops::{OpsDesk, Runbook, ServiceMonitor};
pub use planner::{PlanBreakdown, Planner};
pub use retry::{AttemptRecord, TaskOutcome, TaskRunner};
pub use router::{CompanyFactory, RequestIntent, Router, RouterResponse};
pub use routing::{Domain, Implementers};
pub use task::{Task, TaskKind, TaskPriority, TaskResult, TaskStatus};
pub use team::{Team, TeamReport};
pub use types::{AgentId, Goal, GoalId, TaskId, UnitId, WorkerRole};
pub use verifier::{verify, VerificationVerdict};
pub use worker::{Worker, WorkerRequest, WorkerResponse};
