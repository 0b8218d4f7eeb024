pub mod codec;
pub mod config;
pub mod error;
pub mod external;
pub mod library;
pub mod pdf;
pub mod pipeline;
