//! Payload layer: streaming reader and command builder.
//!
//! Inbound messages are consumed through [`PayloadReader`], a pull-cursor
//! that hands out one node at a time so handlers can stop, skip or drain
//! subtrees. Outbound commands are assembled with [`PayloadWriter`].

pub mod reader;
pub mod writer;

pub use reader::{NodeKind, PayloadReader};
pub use writer::PayloadWriter;
