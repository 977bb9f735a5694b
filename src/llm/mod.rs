pub mod oracle;
pub mod prompts;
pub mod utils;

#[cfg(feature = "gemini")]
pub mod client;
#[cfg(feature = "gemini")]
pub mod types;

pub use oracle::*;
pub use utils::parse_json_response;

#[cfg(feature = "gemini")]
pub use client::*;
