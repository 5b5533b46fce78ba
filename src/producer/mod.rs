//! Producer subsystem.
//!
//! Named queue writers are configured under `queues.queue_writers`, resolved
//! once by the `ClientRegistry` at startup, and looked up by name afterwards.

pub mod writer;

pub use writer::QueueWriter;
