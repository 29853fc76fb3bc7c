pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
pub mod shutdown;

pub use config::Config;
pub use error::{Error, Result};
pub use shutdown::shutdown_signal;

/// Process-wide init: a rustls crypto provider install the way the teacher's
/// own `common::init()` does, plus color support detection for the
/// owo-colors banners used in shutdown/startup logging.
pub fn init() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}
