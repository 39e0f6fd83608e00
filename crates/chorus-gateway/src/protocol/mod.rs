//! Gateway protocol definitions
//!
//! Op codes, the envelope format, payloads and close codes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{classify, CloseAction, CloseCode, ZOMBIE_CLOSE_CODE};
pub use messages::Envelope;
pub use opcodes::OpCode;
pub use payloads::{
    GatewayBotInfo, HelloPayload, IdentifyPayload, IdentifyProperties, ReadyInfo, ResumePayload,
    SessionStartLimit,
};
