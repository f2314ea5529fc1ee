//! Request orchestration: planning, routing, tunneling, governance and session
//! memory on top of the retrieval and ledger crates.

pub mod budget;
pub mod cet;
pub mod config;
pub mod distiller;
pub mod governance;
pub mod pipeline;
pub mod planner;
pub mod router;
pub mod tunneler;
pub mod vote;
pub mod worker;

pub use budget::{BudgetReport, PricingConfig, PricingEntry, PricingRate, Usage};
pub use cet::{
    run_property_tests, validate_cet, CetOutput, CetValidation, PropertyCheck, PropertyReport,
    PropertyResult, DEFAULT_PROPERTY_TESTS,
};
pub use config::{EngineConfig, TunnelMode, DEFAULT_CONFIG_FILE};
pub use distiller::{distill, extract_distilled, Distilled};
pub use governance::{
    parse_refine_output, GovernanceLoop, GovernanceTrace, RefineReply, StageOutput, StageText,
};
pub use pipeline::{Answer, AskRequest, Engine, GovernanceNotes};
pub use planner::{plan_tasks, Plan, Task, TaskType};
pub use router::{route_model, Budget, RouterConfig, RouterDecision};
pub use tunneler::{diagnose, tunnel, Domain, Friction, Transform, TunnelInput, TunnelOutput};
pub use vote::{arbitrate, self_consistency_vote, CandidateOutcome, VoteResult};
pub use worker::{DrainReport, IngestWorker};
