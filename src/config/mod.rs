pub mod paths;
pub mod profiles;
pub mod types;

pub use types::{EscalationConfig, HostKeyPolicy, Settings, Verbosity};
