//! Cross-ledger transfer saga
//!
//! State-machine driven orchestration of outbound transfers over the
//! transaction record store and the correspondent gateway.

pub mod orchestrator;
pub mod state;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use orchestrator::{RetryPolicy, TransferOrchestrator};
pub use state::TransferStatus;
pub use store::{MemoryTransferStore, TransferStore};
pub use types::{Destination, TransferKind, TransferRecord, TransferRequest, TransferResponse};
