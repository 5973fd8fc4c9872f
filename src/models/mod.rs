pub mod entity;
pub mod plan;
pub mod ticket;

pub use entity::{
    collection_name, ChunkKind, Entity, EntityType, FileTier, Relation, RelationKind,
};
pub use plan::{
    AppliedRevision, ImplementationPlan, PlanRevision, PlanValidationFinding, RevisedPlan,
    RevisionType, Severity, Task,
};
pub use ticket::{TicketEntity, TicketPriority, TicketSource, TicketStatus};
