pub mod config;
pub mod error;
pub mod score;
pub mod textprep;
pub mod traits;
pub mod types;

pub use config::Config;
pub use error::BriefwireError;
pub use traits::*;
pub use types::*;
