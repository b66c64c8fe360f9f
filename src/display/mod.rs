pub mod screenshot;

pub use screenshot::ScreenshotSaver;
