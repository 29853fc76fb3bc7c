pub mod health;
pub mod server;
pub mod webhook;

pub use health::Readiness;
pub use server::build_router;
pub use webhook::{IngressConfig, IngressState};
