//! Domain models for civic-chat.

pub mod citation;
pub mod entity;
pub mod message;
pub mod session;
pub mod usage;

pub use citation::{Citation, CitationReport, CredibilityTier, SourceCategory};
pub use entity::{BillEntity, ChatType, CommitteeEntity, EntityRef, MemberEntity};
pub use message::{Feedback, Message, Role};
pub use session::ChatSessionRecord;
pub use usage::{LedgerState, SubscriptionTier, UserProfile, WordLimit};
