// src/protocol/mod.rs

//! nsqd TCP protocol: command encoding, frame decoding, IDENTIFY payloads.

pub mod codec;
pub mod command;
pub mod identify;

pub use codec::{Frame, FrameCodec};
pub use command::{validate_topic_name, Command, MAGIC_V2};
pub use identify::{IdentifyData, IdentifyResponse};
