//! The wire codec and message catalog (spec §4.1, §2).

pub mod backend;
pub mod codec;
pub mod constants;
pub mod frontend;
pub mod types;

pub use codec::{Decoder, Frame, PayloadReader};
pub use frontend::{FrontendMessage, ObjectKind, StartupRequest};
