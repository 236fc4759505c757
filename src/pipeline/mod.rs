pub mod coordinator;
pub mod splitter;
pub mod types;

pub use coordinator::PipelineCoordinator;
pub use splitter::SentenceSplitter;
pub use types::{InputPayload, PipelineRequest, PipelineResult, TurnContext};
