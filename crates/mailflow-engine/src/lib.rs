pub mod bus;
pub mod cancel;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod pools;
pub mod ports;
pub mod state;
pub mod stats;
pub mod summary;
pub mod urgency;

pub use bus::EventBus;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use ports::UserPorts;
pub use state::{UserHandle, UserRegistry};
