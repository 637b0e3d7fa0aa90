pub mod error;
pub mod memory;
pub mod parse;
pub mod port;

pub use error::{MailboxError, Result};
pub use memory::InMemoryMailbox;
pub use port::{InboundEmail, MailboxPort, OutboundReply};
