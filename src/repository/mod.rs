//! Repository layer: storage traits and the backends implementing them.
//!
//! The catalog store owns `available_copies`; the loan ledger owns loan
//! records. Borrow and return go through a [`LoanTransaction`], which exposes
//! the conditional writes of both stores inside a single unit of work.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        AvailabilitySummary, Book, BookBorrowCount, BookQuery, Loan, LoanDetails,
        MemberBorrowCount, NewUser, UpdateBook, User,
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// User accounts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` if the email is already registered
    async fn create_user(&self, user: NewUser) -> AppResult<User>;
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>>;
    /// Case-insensitive lookup
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>>;
}

/// Book records and their copy counters
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Fails with `Conflict` if the ISBN is already catalogued
    async fn create_book(&self, book: Book) -> AppResult<Book>;
    async fn get_book(&self, id: Uuid) -> AppResult<Option<Book>>;
    /// The book, only if at least one copy is available
    async fn find_available(&self, id: Uuid) -> AppResult<Option<Book>>;
    /// Admin edit. `None` if the book does not exist; the merged record must
    /// keep `available_copies <= total_copies`.
    async fn update_book(&self, id: Uuid, update: UpdateBook) -> AppResult<Option<Book>>;
    /// `false` if the book does not exist; `Conflict` while it has active loans
    async fn delete_book(&self, id: Uuid) -> AppResult<bool>;
    /// One page of matching books and the total number of matches
    async fn search_books(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)>;
}

/// Loan records (read side)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoanLedger: Send + Sync {
    async fn find_active_loan(&self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>>;
    /// All loans of a user, most recent first, with the current book snapshot
    async fn history(&self, user_id: Uuid) -> AppResult<Vec<LoanDetails>>;
}

/// Aggregate reports
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// `None` ranks every book
    async fn most_borrowed_books(&self, limit: Option<i64>) -> AppResult<Vec<BookBorrowCount>>;
    async fn most_active_members(
        &self,
        limit: Option<i64>,
    ) -> AppResult<Vec<MemberBorrowCount>>;
    async fn availability_summary(&self) -> AppResult<AvailabilitySummary>;
}

/// Opens borrow/return units of work
#[async_trait]
pub trait LoanTransactions: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn LoanTransaction>>;
}

/// One borrow or return, applied entirely or not at all.
///
/// Dropping the transaction without calling [`LoanTransaction::commit`] rolls
/// back every write made through it.
#[async_trait]
pub trait LoanTransaction: Send {
    // Loan ledger
    async fn find_active_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>>;
    /// Inserts a BORROWED loan. `Conflict` if the pair already has one.
    async fn create_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Loan>;
    /// Flips the active loan of the pair to RETURNED; `None` if there is none
    async fn close_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>>;

    // Catalog store
    async fn find_available(&mut self, book_id: Uuid) -> AppResult<Option<Book>>;
    /// `available_copies - 1` where `available_copies > 0`; `None` otherwise
    async fn decrement_available(&mut self, book_id: Uuid) -> AppResult<Option<Book>>;
    /// `available_copies + 1` where `available_copies < total_copies`; `None` otherwise
    async fn increment_available(&mut self, book_id: Uuid) -> AppResult<Option<Book>>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

/// Backend liveness
#[async_trait]
pub trait StorageHealth: Send + Sync {
    async fn ping(&self) -> AppResult<()>;
}

/// Main repository struct: every store, served by one backend
#[derive(Clone)]
pub struct Repository {
    pub users: Arc<dyn UserStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub ledger: Arc<dyn LoanLedger>,
    pub reports: Arc<dyn ReportStore>,
    pub transactions: Arc<dyn LoanTransactions>,
    pub health: Arc<dyn StorageHealth>,
}

impl Repository {
    /// Build a repository whose stores are all served by `backend`
    pub fn new<B>(backend: Arc<B>) -> Self
    where
        B: UserStore
            + CatalogStore
            + LoanLedger
            + ReportStore
            + LoanTransactions
            + StorageHealth
            + 'static,
    {
        Self {
            users: backend.clone(),
            catalog: backend.clone(),
            ledger: backend.clone(),
            reports: backend.clone(),
            transactions: backend.clone(),
            health: backend,
        }
    }

    /// Repository backed by PostgreSQL
    pub fn postgres(pool: Pool<Postgres>) -> Self {
        Self::new(Arc::new(PgStore::new(pool)))
    }

    /// Repository backed by process memory
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }
}
