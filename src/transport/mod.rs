pub mod command;
pub mod event_stream;
pub mod frame;
mod stdio;

pub use command::{encode_arg, encode_command, sanitize_arg, sanitize_arg_string};
pub use event_stream::{EventStreamDecoder, FrameOutcome, SessionLink};
pub use frame::{StructuredTraceFrame, TraceKind, TraceValue};
pub use stdio::pump_output;
