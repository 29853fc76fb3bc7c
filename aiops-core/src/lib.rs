pub mod approval;
pub mod executor;
pub mod fakes;
pub mod playbooks;
pub mod rule_engine;
pub mod stores;
pub mod traits;
pub mod watchloop;

pub use approval::{ApprovalManager, ApprovalOutcome};
pub use executor::Executor;
pub use playbooks::PlaybookRegistry;
pub use rule_engine::RuleEngine;
pub use traits::{ClusterApi, EventStore, KvStore, Notifier, ToolInvoker};
pub use watchloop::Watchloop;
