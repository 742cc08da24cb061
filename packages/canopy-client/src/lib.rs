pub mod config;
pub mod controller;
pub mod error;
pub mod logging;

pub use config::ClientConfig;
pub use controller::{AppController, InitializeParams, PATCH_METHOD, PatchStatus, PeerInfo, Phase};
pub use error::ClientError;
pub use logging::init_tracing;
