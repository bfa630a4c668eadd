mod repo;
mod schema;

pub use repo::{NewSession, Session, SessionRepo, hash_token};
pub use schema::init_database;
