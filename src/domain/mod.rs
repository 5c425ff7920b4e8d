mod batch;
mod frame;
mod state;

pub use batch::Batch;
pub use frame::{Frame, FrameMeta, FrameRecord};
pub use state::PersistedState;
