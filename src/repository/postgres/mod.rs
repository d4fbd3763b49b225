//! PostgreSQL backend

mod books;
mod loans;
mod reports;
mod users;

use async_trait::async_trait;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::Book,
};

use super::StorageHealth;

pub use loans::PgLoanTransaction;

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StorageHealth for PgStore {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Map constraint failures to domain errors; anything else stays a storage failure
pub(super) fn map_constraint_error(error: sqlx::Error, conflict_message: &str) -> AppError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            return AppError::Conflict(conflict_message.to_string());
        }
        if db.is_check_violation() {
            return AppError::InvariantViolation(db.message().to_string());
        }
    }
    AppError::Database(error)
}

/// Columns of a joined `books` row aliased with a `b_` prefix
pub(super) const BOOK_COLUMNS: &str = "b.id AS b_id, b.title AS b_title, b.author AS b_author, \
     b.isbn AS b_isbn, b.published_date AS b_published_date, b.genre AS b_genre, \
     b.total_copies AS b_total_copies, b.available_copies AS b_available_copies, \
     b.created_at AS b_created_at, b.updated_at AS b_updated_at";

/// Read the `b_`-prefixed book of a LEFT JOIN; `None` when the book row is missing
pub(super) fn joined_book(row: &PgRow) -> Result<Option<Book>, sqlx::Error> {
    let id: Option<Uuid> = row.try_get("b_id")?;
    let Some(id) = id else {
        return Ok(None);
    };

    Ok(Some(Book {
        id,
        title: row.try_get("b_title")?,
        author: row.try_get("b_author")?,
        isbn: row.try_get("b_isbn")?,
        published_date: row.try_get("b_published_date")?,
        genre: row.try_get("b_genre")?,
        total_copies: row.try_get("b_total_copies")?,
        available_copies: row.try_get("b_available_copies")?,
        created_at: row.try_get("b_created_at")?,
        updated_at: row.try_get("b_updated_at")?,
    }))
}

/// Escape `%`, `_` and `\` for use inside an ILIKE pattern
pub(super) fn like_pattern(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}
