// Public modules
pub mod case_study;
pub mod chat_message;
pub mod checkpoint_progress;
pub mod message_create_params;
pub mod session;
pub mod stream_event;

// Re-exports
pub use case_study::{CaseStudy, Checkpoint, ContextMaterials, Difficulty};
pub(crate) use case_study::ApiCaseStudyDetail;
pub use chat_message::{ChatMessage, MessageRole};
pub use checkpoint_progress::CheckpointProgress;
pub use message_create_params::MessageCreateParams;
pub use session::{Session, SessionCreateParams, SessionState};
pub use stream_event::{StreamEvent, TurnStatus};
