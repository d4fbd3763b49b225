//! In-process backend.
//!
//! Every table sits behind its own mutex and each write is a single
//! check-and-set inside one critical section. Loan transactions additionally
//! hold a per-book async lock for their whole lifetime, the way a row lock does
//! in PostgreSQL, and keep an undo log that is replayed when they are dropped
//! uncommitted. Lock order is `loans` before `books`.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        user::normalize_email, AvailabilitySummary, Book, BookBorrowCount, BookQuery, Loan,
        LoanDetails, MemberBorrowCount, NewUser, UpdateBook, User, UserSummary,
    },
};

use super::{
    CatalogStore, LoanLedger, LoanTransaction, LoanTransactions, ReportStore, StorageHealth,
    UserStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct UserTable {
    rows: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
}

#[derive(Default)]
struct BookTable {
    rows: HashMap<Uuid, Book>,
    by_isbn: HashMap<String, Uuid>,
}

#[derive(Default)]
struct LoanTable {
    rows: HashMap<Uuid, Loan>,
    /// (user, book) -> active loan id
    active: HashMap<(Uuid, Uuid), Uuid>,
    /// Loan ids per user, in insertion order
    by_user: HashMap<Uuid, Vec<Uuid>>,
}

#[derive(Default)]
struct Tables {
    users: Mutex<UserTable>,
    books: Mutex<BookTable>,
    loans: Mutex<LoanTable>,
    book_locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl Tables {
    fn book_lock(&self, book_id: Uuid) -> Arc<AsyncMutex<()>> {
        lock(&self.book_locks).entry(book_id).or_default().clone()
    }

    fn available(&self, book_id: Uuid) -> Option<Book> {
        lock(&self.books)
            .rows
            .get(&book_id)
            .filter(|b| b.available_copies > 0)
            .cloned()
    }

    fn decrement(&self, book_id: Uuid) -> Option<Book> {
        let mut books = lock(&self.books);
        let book = books.rows.get_mut(&book_id)?;
        if book.available_copies <= 0 {
            return None;
        }
        book.available_copies -= 1;
        book.updated_at = Utc::now();
        Some(book.clone())
    }

    fn increment(&self, book_id: Uuid) -> Option<Book> {
        let mut books = lock(&self.books);
        let book = books.rows.get_mut(&book_id)?;
        if book.available_copies >= book.total_copies {
            return None;
        }
        book.available_copies += 1;
        book.updated_at = Utc::now();
        Some(book.clone())
    }

    fn active_loan(&self, user_id: Uuid, book_id: Uuid) -> Option<Loan> {
        let loans = lock(&self.loans);
        loans
            .active
            .get(&(user_id, book_id))
            .and_then(|id| loans.rows.get(id))
            .cloned()
    }

    fn insert_loan(&self, loan: Loan) -> AppResult<Loan> {
        let mut loans = lock(&self.loans);
        let key = (loan.user_id, loan.book_id);
        if loans.active.contains_key(&key) {
            return Err(AppError::Conflict("Already borrowed the book".to_string()));
        }
        loans.active.insert(key, loan.id);
        loans.by_user.entry(loan.user_id).or_default().push(loan.id);
        loans.rows.insert(loan.id, loan.clone());
        Ok(loan)
    }

    fn close_loan(&self, user_id: Uuid, book_id: Uuid) -> Option<Loan> {
        let mut loans = lock(&self.loans);
        let id = loans.active.remove(&(user_id, book_id))?;
        let loan = loans.rows.get_mut(&id)?;
        loan.close(Utc::now());
        Some(loan.clone())
    }

    fn remove_loan(&self, id: Uuid) {
        let mut loans = lock(&self.loans);
        if let Some(loan) = loans.rows.remove(&id) {
            let key = (loan.user_id, loan.book_id);
            if loans.active.get(&key) == Some(&id) {
                loans.active.remove(&key);
            }
            if let Some(ids) = loans.by_user.get_mut(&loan.user_id) {
                ids.retain(|l| *l != id);
            }
        }
    }

    fn reopen_loan(&self, id: Uuid) {
        let mut guard = lock(&self.loans);
        let loans = &mut *guard;
        if let Some(loan) = loans.rows.get_mut(&id) {
            loan.reopen();
            let key = (loan.user_id, loan.book_id);
            loans.active.insert(key, id);
        }
    }
}

/// Backend keeping every table in process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageHealth for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut users = lock(&self.tables.users);
        let key = normalize_email(&user.email);
        if users.by_email.contains_key(&key) {
            return Err(AppError::Conflict("User is already registered".to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            password: user.password_hash,
            role: user.role,
            created_at: Utc::now(),
        };
        users.by_email.insert(key, user.id);
        users.rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(lock(&self.tables.users).rows.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let users = lock(&self.tables.users);
        Ok(users
            .by_email
            .get(&normalize_email(email))
            .and_then(|id| users.rows.get(id))
            .cloned())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn create_book(&self, book: Book) -> AppResult<Book> {
        let mut books = lock(&self.tables.books);
        if books.by_isbn.contains_key(&book.isbn) {
            return Err(AppError::Conflict("Book already exists".to_string()));
        }
        books.by_isbn.insert(book.isbn.clone(), book.id);
        books.rows.insert(book.id, book.clone());
        Ok(book)
    }

    async fn get_book(&self, id: Uuid) -> AppResult<Option<Book>> {
        Ok(lock(&self.tables.books).rows.get(&id).cloned())
    }

    async fn find_available(&self, id: Uuid) -> AppResult<Option<Book>> {
        Ok(self.tables.available(id))
    }

    async fn update_book(&self, id: Uuid, update: UpdateBook) -> AppResult<Option<Book>> {
        let book_lock = self.tables.book_lock(id);
        let _held = book_lock.lock().await;

        let loans = lock(&self.tables.loans);
        let mut books = lock(&self.tables.books);
        let Some(current) = books.rows.get(&id).cloned() else {
            return Ok(None);
        };

        let merged = update.apply_to(&current)?;
        let on_loan = loans.active.keys().filter(|(_, book_id)| *book_id == id).count();
        merged.ensure_covers_loans(on_loan as i64)?;

        if merged.isbn != current.isbn {
            if books.by_isbn.contains_key(&merged.isbn) {
                return Err(AppError::Conflict("Book already exists".to_string()));
            }
            books.by_isbn.remove(&current.isbn);
            books.by_isbn.insert(merged.isbn.clone(), id);
        }
        books.rows.insert(id, merged.clone());

        Ok(Some(merged))
    }

    async fn delete_book(&self, id: Uuid) -> AppResult<bool> {
        let book_lock = self.tables.book_lock(id);
        let _held = book_lock.lock().await;

        let loans = lock(&self.tables.loans);
        let mut books = lock(&self.tables.books);

        if !books.rows.contains_key(&id) {
            return Ok(false);
        }
        if loans.active.keys().any(|(_, book_id)| *book_id == id) {
            return Err(AppError::Conflict(
                "Book has copies on loan and cannot be deleted".to_string(),
            ));
        }

        if let Some(book) = books.rows.remove(&id) {
            books.by_isbn.remove(&book.isbn);
        }
        Ok(true)
    }

    async fn search_books(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        let books = lock(&self.tables.books);
        let mut matching: Vec<&Book> = books.rows.values().filter(|b| query.matches(b)).collect();
        matching.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .cloned()
            .collect();

        Ok((page, total))
    }
}

#[async_trait]
impl LoanLedger for MemoryStore {
    async fn find_active_loan(&self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>> {
        Ok(self.tables.active_loan(user_id, book_id))
    }

    async fn history(&self, user_id: Uuid) -> AppResult<Vec<LoanDetails>> {
        let loans: Vec<Loan> = {
            let loans = lock(&self.tables.loans);
            loans
                .by_user
                .get(&user_id)
                .map(|ids| {
                    ids.iter()
                        .rev()
                        .filter_map(|id| loans.rows.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        let books = lock(&self.tables.books);
        let mut history: Vec<LoanDetails> = loans
            .into_iter()
            .map(|loan| {
                let book = books.rows.get(&loan.book_id).cloned();
                LoanDetails::new(loan, book)
            })
            .collect();
        history.sort_by(|a, b| b.borrowed_date.cmp(&a.borrowed_date));

        Ok(history)
    }
}

/// Borrow counts keyed by `key`, highest first, ties by id
fn rank_by<F>(loans: &LoanTable, key: F, limit: Option<i64>) -> Vec<(Uuid, i64)>
where
    F: Fn(&Loan) -> Uuid,
{
    let mut counts: HashMap<Uuid, i64> = HashMap::new();
    for loan in loans.rows.values() {
        *counts.entry(key(loan)).or_default() += 1;
    }

    let mut ranked: Vec<(Uuid, i64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    if let Some(limit) = limit {
        ranked.truncate(limit.max(0) as usize);
    }
    ranked
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn most_borrowed_books(&self, limit: Option<i64>) -> AppResult<Vec<BookBorrowCount>> {
        let ranked = rank_by(&lock(&self.tables.loans), |l| l.book_id, limit);

        let books = lock(&self.tables.books);
        Ok(ranked
            .into_iter()
            .map(|(book_id, total_borrows)| BookBorrowCount {
                book_id,
                total_borrows,
                book: books.rows.get(&book_id).cloned(),
            })
            .collect())
    }

    async fn most_active_members(&self, limit: Option<i64>) -> AppResult<Vec<MemberBorrowCount>> {
        let ranked = rank_by(&lock(&self.tables.loans), |l| l.user_id, limit);

        let users = lock(&self.tables.users);
        Ok(ranked
            .into_iter()
            .map(|(user_id, total_borrows)| MemberBorrowCount {
                user_id,
                total_borrows,
                user: users.rows.get(&user_id).map(UserSummary::from),
            })
            .collect())
    }

    async fn availability_summary(&self) -> AppResult<AvailabilitySummary> {
        let books = lock(&self.tables.books);
        let (total, available) = books.rows.values().fold((0i64, 0i64), |acc, b| {
            (
                acc.0 + i64::from(b.total_copies),
                acc.1 + i64::from(b.available_copies),
            )
        });

        Ok(AvailabilitySummary::new(total, available))
    }
}

#[async_trait]
impl LoanTransactions for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn LoanTransaction>> {
        Ok(Box::new(MemoryTransaction {
            tables: self.tables.clone(),
            held: HashMap::new(),
            undo: Vec::new(),
        }))
    }
}

enum Undo {
    RemoveLoan(Uuid),
    ReopenLoan(Uuid),
    /// Give back a copy taken by this transaction
    Increment(Uuid),
    /// Take back a copy returned by this transaction
    Decrement(Uuid),
}

pub struct MemoryTransaction {
    tables: Arc<Tables>,
    held: HashMap<Uuid, OwnedMutexGuard<()>>,
    undo: Vec<Undo>,
}

impl MemoryTransaction {
    /// Serialize with every other transaction touching `book_id`
    async fn hold(&mut self, book_id: Uuid) {
        if self.held.contains_key(&book_id) {
            return;
        }
        let guard = self.tables.book_lock(book_id).lock_owned().await;
        self.held.insert(book_id, guard);
    }

    fn undo_all(&mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::RemoveLoan(id) => self.tables.remove_loan(id),
                Undo::ReopenLoan(id) => self.tables.reopen_loan(id),
                Undo::Increment(book_id) => {
                    self.tables.increment(book_id);
                }
                Undo::Decrement(book_id) => {
                    self.tables.decrement(book_id);
                }
            }
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            tracing::debug!(steps = self.undo.len(), "Rolling back uncommitted loan transaction");
            self.undo_all();
        }
    }
}

#[async_trait]
impl LoanTransaction for MemoryTransaction {
    async fn find_active_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>> {
        self.hold(book_id).await;
        Ok(self.tables.active_loan(user_id, book_id))
    }

    async fn create_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Loan> {
        self.hold(book_id).await;
        let loan = self.tables.insert_loan(Loan::new(user_id, book_id))?;
        self.undo.push(Undo::RemoveLoan(loan.id));
        Ok(loan)
    }

    async fn close_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>> {
        self.hold(book_id).await;
        let loan = self.tables.close_loan(user_id, book_id);
        if let Some(loan) = &loan {
            self.undo.push(Undo::ReopenLoan(loan.id));
        }
        Ok(loan)
    }

    async fn find_available(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
        self.hold(book_id).await;
        Ok(self.tables.available(book_id))
    }

    async fn decrement_available(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
        self.hold(book_id).await;
        let book = self.tables.decrement(book_id);
        if book.is_some() {
            self.undo.push(Undo::Increment(book_id));
        }
        Ok(book)
    }

    async fn increment_available(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
        self.hold(book_id).await;
        let book = self.tables.increment(book_id);
        if book.is_some() {
            self.undo.push(Undo::Decrement(book_id));
        }
        Ok(book)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let mut this = self;
        this.undo.clear();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        let mut this = self;
        this.undo_all();
        Ok(())
    }
}
