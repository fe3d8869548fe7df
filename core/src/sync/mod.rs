/// Room view reconciliation: optimistic entries merged with the store stream
pub mod engine;
pub mod view;

pub use engine::{AttachmentHandle, EngineOptions, ReconciliationEngine, RoomAttachment, ViewSnapshot};
pub use view::RoomView;
