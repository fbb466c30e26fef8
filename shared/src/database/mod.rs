pub mod checkins;
pub mod locations;
pub mod models;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}
