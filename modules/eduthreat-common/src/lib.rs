pub mod canonical;
pub mod config;
pub mod error;
pub mod types;

pub use canonical::{canonical_url, canonical_url_set};
pub use config::Config;
pub use error::EduThreatError;
pub use types::*;
