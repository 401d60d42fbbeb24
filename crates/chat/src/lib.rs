pub mod coordinator;
pub mod llm;
pub mod responder;
pub mod response;
pub mod transcript;

pub use coordinator::{CallTrace, Coordinator, FallbackDeadlines, Outcome, Step, StepRecord};
pub use llm::{InferenceClient, InferencePayload, OpenAiChatClient};
pub use responder::{Intent, LocalResponder};
pub use response::{FallbackReason, Response, Tier};
pub use transcript::{Role, Transcript, TranscriptEntry};
