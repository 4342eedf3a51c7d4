pub mod database;
pub mod error;
pub mod files;
pub mod graphs;
pub mod row_helpers;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use graphs::{GraphRepo, GraphStatus, GraphSummary};
