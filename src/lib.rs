pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod options;
pub mod process;
pub mod provider;
pub mod supervisor;
pub mod util;

pub use api::Converter;
pub use error::{GatewayError, Result};
pub use options::ConversionOptions;
pub use provider::Provider;
