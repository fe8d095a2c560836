//! Request runtime: per-chain bindings, nonce lanes and the orchestrator.

pub mod abort;
pub mod context;
pub mod lanes;
pub mod orchestrator;

pub use abort::{AbortHandle, AbortSignal};
pub use context::{ChainBinding, OrchestratorContext};
pub use orchestrator::{RequestState, TransactionOrchestrator};
