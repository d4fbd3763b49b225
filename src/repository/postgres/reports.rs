//! Report queries

use async_trait::async_trait;
use sqlx::Row;

use crate::{
    error::AppResult,
    models::{AvailabilitySummary, BookBorrowCount, MemberBorrowCount, UserSummary},
    repository::ReportStore,
};

use super::{joined_book, PgStore, BOOK_COLUMNS};

#[async_trait]
impl ReportStore for PgStore {
    async fn most_borrowed_books(&self, limit: Option<i64>) -> AppResult<Vec<BookBorrowCount>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT c.book_id, c.total_borrows, {}
            FROM (
                SELECT book_id, COUNT(*) AS total_borrows FROM loans GROUP BY book_id
            ) c
            LEFT JOIN books b ON b.id = c.book_id
            ORDER BY c.total_borrows DESC, c.book_id
            LIMIT $1
            "#,
            BOOK_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            result.push(BookBorrowCount {
                book_id: row.try_get("book_id")?,
                total_borrows: row.try_get("total_borrows")?,
                book: joined_book(&row)?,
            });
        }

        Ok(result)
    }

    async fn most_active_members(&self, limit: Option<i64>) -> AppResult<Vec<MemberBorrowCount>> {
        let rows = sqlx::query(
            r#"
            SELECT c.user_id, c.total_borrows,
                   u.id AS u_id, u.name AS u_name, u.email AS u_email, u.role AS u_role
            FROM (
                SELECT user_id, COUNT(*) AS total_borrows FROM loans GROUP BY user_id
            ) c
            LEFT JOIN users u ON u.id = c.user_id
            ORDER BY c.total_borrows DESC, c.user_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let user_id: Option<uuid::Uuid> = row.try_get("u_id")?;
            let user = match user_id {
                Some(id) => Some(UserSummary {
                    id,
                    name: row.try_get("u_name")?,
                    email: row.try_get("u_email")?,
                    role: row.try_get("u_role")?,
                }),
                None => None,
            };

            result.push(MemberBorrowCount {
                user_id: row.try_get("user_id")?,
                total_borrows: row.try_get("total_borrows")?,
                user,
            });
        }

        Ok(result)
    }

    async fn availability_summary(&self) -> AppResult<AvailabilitySummary> {
        let (total, available): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(total_copies), 0)::BIGINT,
                   COALESCE(SUM(available_copies), 0)::BIGINT
            FROM books
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(AvailabilitySummary::new(total, available))
    }
}
