//! Loan management service: the borrow/return coordinator

use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Book, Loan, LoanDetails},
    repository::Repository,
};

use super::catalog::book_not_found;

const ALREADY_BORROWED: &str = "Already borrowed the book";
const NOT_AVAILABLE: &str = "Book is not available";
const NOT_BORROWED: &str = "Borrowed record not found";

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
}

impl LoansService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Borrow one copy of a book.
    ///
    /// The loan insert and the copy decrement commit together or not at all.
    /// A book deleted after the first lookup is reported as not found.
    pub async fn borrow(&self, user_id: Uuid, book_id: Uuid) -> AppResult<Loan> {
        self.require_user(user_id).await?;
        self.require_book(book_id).await?;

        let mut tx = self.repository.transactions.begin().await?;

        if tx.find_active_loan(user_id, book_id).await?.is_some() {
            tracing::warn!(%user_id, %book_id, "Borrow rejected: active loan exists");
            return Err(AppError::Conflict(ALREADY_BORROWED.to_string()));
        }

        if tx.find_available(book_id).await?.is_none() {
            self.require_book(book_id).await?;
            tracing::warn!(%user_id, %book_id, "Borrow rejected: no copy available");
            return Err(AppError::Conflict(NOT_AVAILABLE.to_string()));
        }

        let loan = tx.create_loan(user_id, book_id).await?;

        // Conditional write; losing a race for the last copy lands here
        let Some(book) = tx.decrement_available(book_id).await? else {
            self.require_book(book_id).await?;
            tracing::warn!(%user_id, %book_id, "Borrow rejected: last copy taken concurrently");
            return Err(AppError::Conflict(NOT_AVAILABLE.to_string()));
        };

        tx.commit().await?;

        tracing::info!(
            %user_id,
            %book_id,
            loan_id = %loan.id,
            available_copies = book.available_copies,
            "Book borrowed"
        );
        Ok(loan)
    }

    /// Return a borrowed book: closes the active loan and gives the copy back
    pub async fn return_book(&self, user_id: Uuid, book_id: Uuid) -> AppResult<(Loan, Book)> {
        self.require_user(user_id).await?;
        self.require_book(book_id).await?;

        let mut tx = self.repository.transactions.begin().await?;

        let Some(loan) = tx.close_loan(user_id, book_id).await? else {
            self.require_book(book_id).await?;
            tracing::warn!(%user_id, %book_id, "Return rejected: no active loan");
            return Err(AppError::Conflict(NOT_BORROWED.to_string()));
        };

        let Some(book) = tx.increment_available(book_id).await? else {
            tracing::error!(
                %user_id,
                %book_id,
                loan_id = %loan.id,
                "Return aborted: available copies already at total"
            );
            return Err(AppError::InvariantViolation(format!(
                "Book {} already has all its copies available",
                book_id
            )));
        };

        tx.commit().await?;

        tracing::info!(
            %user_id,
            %book_id,
            loan_id = %loan.id,
            available_copies = book.available_copies,
            "Book returned"
        );
        Ok((loan, book))
    }

    /// Loan history of a user, most recent first
    pub async fn history(&self, user_id: Uuid) -> AppResult<Vec<LoanDetails>> {
        self.require_user(user_id).await?;
        self.repository.ledger.history(user_id).await
    }

    async fn require_user(&self, user_id: Uuid) -> AppResult<()> {
        match self.repository.users.get_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("User with id {} not found", user_id))),
        }
    }

    async fn require_book(&self, book_id: Uuid) -> AppResult<()> {
        match self.repository.catalog.get_book(book_id).await? {
            Some(_) => Ok(()),
            None => Err(book_not_found(book_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::*;
    use crate::{
        models::{CreateBook, LoanStatus, NewUser, Role, UpdateBook},
        repository::{
            CatalogStore, LoanTransaction, LoanTransactions, MemoryStore, UserStore,
        },
    };

    struct Library {
        store: MemoryStore,
        service: LoansService,
    }

    impl Library {
        fn new() -> Self {
            let store = MemoryStore::new();
            let service = LoansService::new(Repository::new(Arc::new(store.clone())));
            Self { store, service }
        }

        async fn member(&self, name: &str) -> Uuid {
            self.store
                .create_user(NewUser {
                    name: name.to_string(),
                    email: format!("{}@arrakis.org", name.to_lowercase()),
                    password_hash: "hash".to_string(),
                    role: Role::Member,
                })
                .await
                .unwrap()
                .id
        }

        async fn book(&self, copies: i32) -> Uuid {
            self.book_with_isbn(copies, "9780441013593").await
        }

        async fn book_with_isbn(&self, copies: i32, isbn: &str) -> Uuid {
            self.store
                .create_book(Book::new(CreateBook {
                    title: "Dune".to_string(),
                    author: "Frank Herbert".to_string(),
                    isbn: isbn.to_string(),
                    published_date: NaiveDate::from_ymd_opt(1965, 8, 1).unwrap(),
                    genre: "Science Fiction".to_string(),
                    total_copies: copies,
                    available_copies: copies,
                }))
                .await
                .unwrap()
                .id
        }

        async fn available(&self, book_id: Uuid) -> i32 {
            self.store
                .get_book(book_id)
                .await
                .unwrap()
                .unwrap()
                .available_copies
        }
    }

    fn is_conflict(result: &AppResult<impl std::fmt::Debug>, expected: &str) -> bool {
        matches!(result, Err(AppError::Conflict(message)) if message == expected)
    }

    #[tokio::test]
    async fn test_copies_run_out() {
        let library = Library::new();
        let book = library.book(2).await;
        let (a, b, c) = (
            library.member("Paul").await,
            library.member("Jessica").await,
            library.member("Stilgar").await,
        );

        library.service.borrow(a, book).await.unwrap();
        assert_eq!(library.available(book).await, 1);
        library.service.borrow(b, book).await.unwrap();
        assert_eq!(library.available(book).await, 0);

        let result = library.service.borrow(c, book).await;
        assert!(is_conflict(&result, NOT_AVAILABLE));
        assert_eq!(library.available(book).await, 0);
        assert!(library.service.history(c).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_pair_borrowed_twice() {
        let library = Library::new();
        let book = library.book(5).await;
        let user = library.member("Paul").await;

        library.service.borrow(user, book).await.unwrap();
        let result = library.service.borrow(user, book).await;
        assert!(is_conflict(&result, ALREADY_BORROWED));
        assert_eq!(library.available(book).await, 4);
    }

    #[tokio::test]
    async fn test_borrow_return_cycle() {
        let library = Library::new();
        let book = library.book(1).await;
        let user = library.member("Paul").await;

        let result = library.service.return_book(user, book).await;
        assert!(is_conflict(&result, NOT_BORROWED));

        let loan = library.service.borrow(user, book).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Borrowed);
        assert_eq!(library.available(book).await, 0);

        let (returned, snapshot) = library.service.return_book(user, book).await.unwrap();
        assert_eq!(returned.id, loan.id);
        assert_eq!(snapshot.available_copies, 1);
        assert_eq!(library.available(book).await, 1);

        let result = library.service.return_book(user, book).await;
        assert!(is_conflict(&result, NOT_BORROWED));
        assert_eq!(library.available(book).await, 1);

        let history = library.service.history(user).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, LoanStatus::Returned);
        assert!(history[0].returned_date.unwrap() > history[0].borrowed_date);
        assert_eq!(history[0].book.as_ref().map(|b| b.id), Some(book));

        // A returned pair can be borrowed again; history shows the newest first
        let again = library.service.borrow(user, book).await.unwrap();
        let history = library.service.history(user).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, again.id);
        assert_eq!(history[0].status, LoanStatus::Borrowed);
    }

    #[tokio::test]
    async fn test_unknown_user_or_book() {
        let library = Library::new();
        let book = library.book(1).await;
        let user = library.member("Paul").await;

        assert!(matches!(
            library.service.borrow(Uuid::new_v4(), book).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            library.service.borrow(user, Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            library.service.return_book(user, Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            library.service.history(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(library.available(book).await, 1);
    }

    #[tokio::test]
    async fn test_admin_edit_cannot_strand_loans() {
        let library = Library::new();
        let book = library.book(2).await;
        let (paul, jessica) = (library.member("Paul").await, library.member("Jessica").await);
        library.service.borrow(paul, book).await.unwrap();
        library.service.borrow(jessica, book).await.unwrap();

        let shrink = UpdateBook {
            total_copies: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            library.store.update_book(book, shrink).await,
            Err(AppError::Conflict(_))
        ));
        let restock = UpdateBook {
            available_copies: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            library.store.update_book(book, restock).await,
            Err(AppError::Conflict(_))
        ));

        library.service.return_book(paul, book).await.unwrap();
        let (loan, snapshot) = library.service.return_book(jessica, book).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Returned);
        assert_eq!((snapshot.total_copies, snapshot.available_copies), (2, 2));

        // With every copy back the shelf can shrink
        let shrink = UpdateBook {
            total_copies: Some(1),
            available_copies: Some(1),
            ..Default::default()
        };
        let updated = library.store.update_book(book, shrink).await.unwrap().unwrap();
        assert_eq!((updated.total_copies, updated.available_copies), (1, 1));
        library.service.borrow(jessica, book).await.unwrap();
    }

    #[derive(Clone, Copy)]
    enum Rig {
        LoseDecrement,
        LoseIncrement,
        DeleteBookFirst(Uuid),
    }

    /// Transaction whose conditional writes fail on demand
    struct Rigged {
        inner: Box<dyn LoanTransaction>,
        rig: Rig,
    }

    #[async_trait]
    impl LoanTransaction for Rigged {
        async fn find_active_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>> {
            self.inner.find_active_loan(user_id, book_id).await
        }

        async fn create_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Loan> {
            self.inner.create_loan(user_id, book_id).await
        }

        async fn close_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>> {
            self.inner.close_loan(user_id, book_id).await
        }

        async fn find_available(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
            self.inner.find_available(book_id).await
        }

        async fn decrement_available(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
            match self.rig {
                Rig::LoseDecrement => Ok(None),
                _ => self.inner.decrement_available(book_id).await,
            }
        }

        async fn increment_available(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
            match self.rig {
                Rig::LoseIncrement => Ok(None),
                _ => self.inner.increment_available(book_id).await,
            }
        }

        async fn commit(self: Box<Self>) -> AppResult<()> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> AppResult<()> {
            self.inner.rollback().await
        }
    }

    struct RiggedTransactions {
        store: MemoryStore,
        rig: Rig,
    }

    #[async_trait]
    impl LoanTransactions for RiggedTransactions {
        async fn begin(&self) -> AppResult<Box<dyn LoanTransaction>> {
            if let Rig::DeleteBookFirst(book_id) = self.rig {
                self.store.delete_book(book_id).await?;
            }
            Ok(Box::new(Rigged {
                inner: self.store.begin().await?,
                rig: self.rig,
            }))
        }
    }

    fn rigged_service(library: &Library, rig: Rig) -> LoansService {
        let mut repository = Repository::new(Arc::new(library.store.clone()));
        repository.transactions = Arc::new(RiggedTransactions {
            store: library.store.clone(),
            rig,
        });
        LoansService::new(repository)
    }

    #[tokio::test]
    async fn test_failed_increment_keeps_loan_open() {
        let library = Library::new();
        let book = library.book(1).await;
        let user = library.member("Paul").await;
        let loan = library.service.borrow(user, book).await.unwrap();

        let service = rigged_service(&library, Rig::LoseIncrement);
        let result = service.return_book(user, book).await;
        assert!(matches!(result, Err(AppError::InvariantViolation(_))));

        let history = library.service.history(user).await.unwrap();
        assert_eq!(history[0].id, loan.id);
        assert_eq!(history[0].status, LoanStatus::Borrowed);
        assert_eq!(library.available(book).await, 0);

        library.service.return_book(user, book).await.unwrap();
    }

    #[tokio::test]
    async fn test_book_deleted_before_transaction_is_not_found() {
        let library = Library::new();
        let book = library.book(1).await;
        let user = library.member("Paul").await;

        let service = rigged_service(&library, Rig::DeleteBookFirst(book));
        assert!(matches!(
            service.borrow(user, book).await,
            Err(AppError::NotFound(_))
        ));
        assert!(library.service.history(user).await.unwrap().is_empty());

        let other = library.book_with_isbn(1, "9780306406157").await;
        let service = rigged_service(&library, Rig::DeleteBookFirst(other));
        assert!(matches!(
            service.return_book(user, other).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_decrement_discards_loan() {
        let library = Library::new();
        let book = library.book(1).await;
        let user = library.member("Paul").await;

        let service = rigged_service(&library, Rig::LoseDecrement);

        let result = service.borrow(user, book).await;
        assert!(is_conflict(&result, NOT_AVAILABLE));
        assert!(library.service.history(user).await.unwrap().is_empty());
        assert_eq!(library.available(book).await, 1);

        // The pair is free again
        library.service.borrow(user, book).await.unwrap();
    }
}
