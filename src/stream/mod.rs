//! Incremental decoding of the benchmark event stream: chunk-to-line
//! reassembly, the `event:`/`data:` frame protocol, and payload decoding.

pub mod frame;
pub mod lines;
pub mod payload;

pub use frame::{EventKind, FrameDecoder, StreamEvent};
pub use lines::LineBuffer;
pub use payload::Payload;
