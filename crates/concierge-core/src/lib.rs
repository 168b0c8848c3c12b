pub mod config;
pub mod context;
pub mod error;
pub mod ids;
pub mod types;

pub use config::ConciergeConfig;
pub use context::RequestContext;
pub use error::{ConciergeError, Result};
pub use ids::{CanonicalId, IdShape};
pub use types::*;
