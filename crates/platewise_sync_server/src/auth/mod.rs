mod gatekeeper;
mod origin;

pub use gatekeeper::{DenyReason, Gatekeeper, GatekeeperError, Unauthorized};
pub use origin::{ClientOrigin, OriginPolicy};
