pub mod decoder;
pub mod frame;
pub mod receiver;

pub use frame::{FrameMetadata, PixelFormat, VideoFrame};
pub use receiver::{FrameReceiver, ReceiverEvent};
