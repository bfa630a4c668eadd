pub mod admin;
pub mod auth;
pub mod sync;

pub use admin::admin_routes;
pub use auth::auth_routes;
pub use sync::sync_routes;
