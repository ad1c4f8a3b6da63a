//! MeshCore Companion Protocol
//!
//! Types and codecs for talking to a MeshCore companion radio from a host
//! application. The same framing is used over TCP and serial links; only the
//! byte pump differs, and that lives with the caller.
//!
//! # Protocol Overview
//!
//! - **Commands** (host → radio): start with a `CMD_*` byte
//! - **Responses** (radio → host): start with a `RESP_CODE_*` byte
//! - **Push notifications** (radio → host, unsolicited): start with a
//!   `PUSH_CODE_*` byte (0x80+)
//!
//! Responses carry no correlation id. A host must therefore keep at most one
//! request in flight and match replies by their code.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshcore_companion_protocol::{Command, FrameCodec, Message};
//!
//! let wire = FrameCodec::encode(&Command::GetDeviceTime.encode());
//!
//! let mut codec = FrameCodec::new();
//! codec.push(&received_bytes);
//! while let Some(frame) = codec.decode()? {
//!     let message = Message::decode(&frame)?;
//! }
//! ```

mod commands;
mod constants;
mod error;
mod frame;
mod reader;
mod responses;
mod types;

pub use commands::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use responses::*;
pub use types::*;
