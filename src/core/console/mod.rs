pub mod bridge;
pub mod log;

pub use bridge::{ConsoleBridge, ReaderHandles};
pub use log::{ConsoleLog, LogChunk};
