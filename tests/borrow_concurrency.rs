//! Concurrency properties of the borrow/return coordinator on the in-memory backend

use chrono::NaiveDate;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use library_server::{
    error::AppError,
    models::{Book, CreateBook, NewUser, Role},
    repository::Repository,
    services::loans::LoansService,
};

async fn member(repository: &Repository, n: usize) -> Uuid {
    repository
        .users
        .create_user(NewUser {
            name: format!("Fremen {}", n),
            email: format!("fremen{}@sietch.org", n),
            password_hash: "hash".to_string(),
            role: Role::Member,
        })
        .await
        .unwrap()
        .id
}

async fn book(repository: &Repository, copies: i32) -> Uuid {
    repository
        .catalog
        .create_book(Book::new(CreateBook {
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            isbn: Uuid::new_v4().to_string(),
            published_date: NaiveDate::from_ymd_opt(1965, 8, 1).unwrap(),
            genre: "Science Fiction".to_string(),
            total_copies: copies,
            available_copies: copies,
        }))
        .await
        .unwrap()
        .id
}

async fn available(repository: &Repository, book_id: Uuid) -> i32 {
    repository
        .catalog
        .get_book(book_id)
        .await
        .unwrap()
        .unwrap()
        .available_copies
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_copy_goes_to_exactly_one_borrower() {
    let repository = Repository::memory();
    let service = LoansService::new(repository.clone());
    let book_id = book(&repository, 1).await;

    let mut handles = Vec::new();
    for n in 0..16 {
        let user_id = member(&repository, n).await;
        let service = service.clone();
        handles.push(tokio::spawn(async move { service.borrow(user_id, book_id).await }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(AppError::Conflict(message)) => assert_eq!(message, "Book is not available"),
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(available(&repository, book_id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_pair_borrowed_concurrently() {
    let repository = Repository::memory();
    let service = LoansService::new(repository.clone());
    let book_id = book(&repository, 5).await;
    let user_id = member(&repository, 0).await;

    let (first, second) = tokio::join!(
        tokio::spawn({
            let service = service.clone();
            async move { service.borrow(user_id, book_id).await }
        }),
        tokio::spawn({
            let service = service.clone();
            async move { service.borrow(user_id, book_id).await }
        }),
    );
    let results = [first.unwrap(), second.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AppError::Conflict(m)) if m == "Already borrowed the book")));
    assert_eq!(available(&repository, book_id).await, 4);
    assert_eq!(service.history(user_id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_returns_close_once() {
    let repository = Repository::memory();
    let service = LoansService::new(repository.clone());
    let book_id = book(&repository, 1).await;
    let user_id = member(&repository, 0).await;
    assert_ok!(service.borrow(user_id, book_id).await);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(
            async move { service.return_book(user_id, book_id).await },
        ));
    }

    let mut returned = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            returned += 1;
        }
    }

    assert_eq!(returned, 1);
    assert_eq!(available(&repository, book_id).await, 1);
    assert_err!(service.return_book(user_id, book_id).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_churn_keeps_counts_in_bounds() {
    let repository = Repository::memory();
    let service = LoansService::new(repository.clone());
    let book_id = book(&repository, 3).await;

    let mut handles = Vec::new();
    for n in 0..12 {
        let user_id = member(&repository, n).await;
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let mut cycles = 0;
            for _ in 0..20 {
                if service.borrow(user_id, book_id).await.is_ok() {
                    let (_, book) = service.return_book(user_id, book_id).await?;
                    assert!(book.copies_are_consistent());
                    cycles += 1;
                }
                tokio::task::yield_now().await;
            }
            Ok::<_, AppError>(cycles)
        }));
    }

    let mut total_cycles = 0;
    for handle in handles {
        total_cycles += handle.await.unwrap().unwrap();
    }

    assert!(total_cycles > 0);
    assert_eq!(available(&repository, book_id).await, 3);
    let book = repository.catalog.get_book(book_id).await.unwrap().unwrap();
    assert!(book.copies_are_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_books_do_not_block_each_other() {
    let repository = Repository::memory();
    let service = LoansService::new(repository.clone());
    let user_id = member(&repository, 0).await;

    let mut books = Vec::new();
    for _ in 0..8 {
        books.push(book(&repository, 1).await);
    }

    let handles: Vec<_> = books
        .iter()
        .map(|book_id| {
            let service = service.clone();
            let book_id = *book_id;
            tokio::spawn(async move { service.borrow(user_id, book_id).await })
        })
        .collect();

    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }
    for book_id in books {
        assert_eq!(available(&repository, book_id).await, 0);
    }
    assert_eq!(service.history(user_id).await.unwrap().len(), 8);
}
