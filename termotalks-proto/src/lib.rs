//! Shared protocol definitions for the `TermoTalks` wire format.

pub mod codec;
pub mod message;
