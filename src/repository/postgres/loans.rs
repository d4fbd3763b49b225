//! Loans repository: ledger queries and the borrow/return transaction

use async_trait::async_trait;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Book, Loan, LoanDetails},
    repository::{LoanLedger, LoanTransaction, LoanTransactions},
};

use super::{joined_book, map_constraint_error, PgStore, BOOK_COLUMNS};

#[async_trait]
impl LoanLedger for PgStore {
    async fn find_active_loan(&self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE user_id = $1 AND book_id = $2 AND status = 'BORROWED'",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(loan)
    }

    async fn history(&self, user_id: Uuid) -> AppResult<Vec<LoanDetails>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT l.*, {}
            FROM loans l
            LEFT JOIN books b ON b.id = l.book_id
            WHERE l.user_id = $1
            ORDER BY l.borrowed_date DESC, l.id
            "#,
            BOOK_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let loan = Loan {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                book_id: row.try_get("book_id")?,
                status: row.try_get("status")?,
                borrowed_date: row.try_get("borrowed_date")?,
                returned_date: row.try_get("returned_date")?,
            };
            result.push(LoanDetails::new(loan, joined_book(&row)?));
        }

        Ok(result)
    }
}

#[async_trait]
impl LoanTransactions for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn LoanTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLoanTransaction { tx }))
    }
}

/// Borrow/return unit of work on one database transaction.
///
/// sqlx rolls the transaction back when it is dropped uncommitted.
pub struct PgLoanTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LoanTransaction for PgLoanTransaction {
    async fn find_active_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE user_id = $1 AND book_id = $2 AND status = 'BORROWED'",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(loan)
    }

    async fn create_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Loan> {
        let loan = Loan::new(user_id, book_id);

        // loans_active_pair_idx rejects a second active loan for the pair
        sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (id, user_id, book_id, status, borrowed_date)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(loan.id)
        .bind(loan.user_id)
        .bind(loan.book_id)
        .bind(loan.status)
        .bind(loan.borrowed_date)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_constraint_error(e, "Already borrowed the book"))
    }

    async fn close_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans SET
                status = 'RETURNED',
                returned_date = GREATEST(
                    date_trunc('microseconds', clock_timestamp()),
                    borrowed_date + INTERVAL '1 microsecond'
                )
            WHERE user_id = $1 AND book_id = $2 AND status = 'BORROWED'
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_constraint_error(e, "Borrowed record not found"))?;

        Ok(loan)
    }

    async fn find_available(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(
            "SELECT * FROM books WHERE id = $1 AND available_copies > 0",
        )
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(book)
    }

    async fn decrement_available(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET available_copies = available_copies - 1, updated_at = NOW()
            WHERE id = $1 AND available_copies > 0
            RETURNING *
            "#,
        )
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(book)
    }

    async fn increment_available(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET available_copies = available_copies + 1, updated_at = NOW()
            WHERE id = $1 AND available_copies < total_copies
            RETURNING *
            "#,
        )
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(book)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
