//! Books repository for database operations

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Book, BookQuery, UpdateBook},
    repository::CatalogStore,
};

use super::{like_pattern, map_constraint_error, PgStore};

const DUPLICATE_BOOK: &str = "Book already exists";

/// OR-ed filters: `$1` title pattern, `$2` author pattern, `$3` genres.
/// With no filter at all every book matches.
const SEARCH_FILTER: &str = r#"
    ($1::TEXT IS NULL AND $2::TEXT IS NULL AND cardinality($3::TEXT[]) = 0)
    OR ($1::TEXT IS NOT NULL AND title ILIKE $1)
    OR ($2::TEXT IS NOT NULL AND author ILIKE $2)
    OR genre = ANY($3::TEXT[])
"#;

#[async_trait]
impl CatalogStore for PgStore {
    async fn create_book(&self, book: Book) -> AppResult<Book> {
        sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (
                id, title, author, isbn, published_date, genre,
                total_copies, available_copies, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(book.id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(book.published_date)
        .bind(&book.genre)
        .bind(book.total_copies)
        .bind(book.available_copies)
        .bind(book.created_at)
        .bind(book.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_constraint_error(e, DUPLICATE_BOOK))
    }

    async fn get_book(&self, id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(book)
    }

    async fn find_available(&self, id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(
            "SELECT * FROM books WHERE id = $1 AND available_copies > 0",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(book)
    }

    async fn update_book(&self, id: Uuid, update: UpdateBook) -> AppResult<Option<Book>> {
        let mut tx = self.pool.begin().await?;

        // Lock the row so the merge sees the counters borrow/return left behind
        let current = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(current) = current else {
            return Ok(None);
        };

        let merged = update.apply_to(&current)?;

        let on_loan: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE book_id = $1 AND status = 'BORROWED'",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        merged.ensure_covers_loans(on_loan)?;

        let book = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET
                title = $2, author = $3, isbn = $4, published_date = $5, genre = $6,
                total_copies = $7, available_copies = $8, updated_at = $9
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&merged.title)
        .bind(&merged.author)
        .bind(&merged.isbn)
        .bind(merged.published_date)
        .bind(&merged.genre)
        .bind(merged.total_copies)
        .bind(merged.available_copies)
        .bind(merged.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_constraint_error(e, DUPLICATE_BOOK))?;

        tx.commit().await?;

        Ok(Some(book))
    }

    async fn delete_book(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM books b
            WHERE b.id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM loans l WHERE l.book_id = b.id AND l.status = 'BORROWED'
              )
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM books WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        if exists {
            return Err(AppError::Conflict(
                "Book has copies on loan and cannot be deleted".to_string(),
            ));
        }

        Ok(false)
    }

    async fn search_books(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        let title = query.title_filter().map(like_pattern);
        let author = query.author_filter().map(like_pattern);
        let genres = query.genres();

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM books WHERE {}", SEARCH_FILTER))
                .bind(&title)
                .bind(&author)
                .bind(&genres)
                .fetch_one(&self.pool)
                .await?;

        let books = sqlx::query_as::<_, Book>(&format!(
            "SELECT * FROM books WHERE {} ORDER BY title, id LIMIT $4 OFFSET $5",
            SEARCH_FILTER
        ))
        .bind(&title)
        .bind(&author)
        .bind(&genres)
        .bind(query.limit())
        .bind(query.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok((books, total))
    }
}
