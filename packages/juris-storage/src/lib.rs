pub mod cache;
pub mod db;
pub mod documents;
pub mod models;
pub mod qdrant;
pub mod schema;
pub mod statutes;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
