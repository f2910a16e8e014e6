pub mod chat;
pub mod citations;
pub mod gateway;
pub mod search;
pub mod sse;
pub mod store;
pub mod usage;
pub mod write_behind;

pub use chat::{ChatDeps, ChatError, ChatPhase, ChatSession, ChatSnapshot, TurnHandle, TurnOutcome};
pub use citations::CitationPolicy;
pub use gateway::{Gateway, GatewayError, HttpGateway};
pub use search::{FetchOutcome, SearchPalette, SearchTab};
pub use store::{ChatStore, MemoryStore, RestStore, SearchBackend};
pub use usage::{FileLedgerStorage, LedgerStorage, MemoryLedgerStorage, UsageBus, UsageMeter};
pub use write_behind::{SyncStatus, WriteBehind};
