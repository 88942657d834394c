pub mod engine;
pub mod router;

pub use engine::{
    FlowDefinition, FlowEngine, StepInput, StepOutcome, TutoringFlow, QUALIFICATION_FIELDS,
    SCHEDULING_FIELDS,
};
pub use router::{Router, StepName};
