pub mod audit;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod knowledge;
pub mod ports;
pub mod reliability;

pub use chrono;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use config::AppConfig;
pub use conversation::{compact, ConversationExchange, HistoryLimits};
pub use domain::actor::{ActorContext, ActorRole, Profile, SurfaceContext, SurfaceType};
pub use domain::knowledge::{EvidenceTier, RetrievalQuery, RetrievalResult, RetrievedSource};
pub use domain::pending::{Awaiting, PendingTaskCreate, TaskDraft};
pub use domain::plan::{ExecutionPlan, ExecutionResult, PlanStep, StepResult, StepStatus};
pub use domain::session::{ContextPatch, Patch, Session, SessionContext, SessionId};
pub use errors::{ApplicationError, InterfaceError, TaskServiceError};
pub use knowledge::TieredRetriever;
pub use ports::StoreError;
pub use reliability::{MutationOutcome, ReliableTaskCreator};
