pub mod event;
pub mod region;

pub use event::FrameEvent;
pub use region::SharedRegion;
