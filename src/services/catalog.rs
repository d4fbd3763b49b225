//! Catalog management service

use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{Book, BookQuery, CreateBook, UpdateBook},
    repository::Repository,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Search books with OR-ed filters, one page at a time
    pub async fn search_books(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        self.repository.catalog.search_books(query).await
    }

    /// Get book by ID
    pub async fn get_book(&self, id: Uuid) -> AppResult<Book> {
        self.repository
            .catalog
            .get_book(id)
            .await?
            .ok_or_else(|| book_not_found(id))
    }

    /// Create a new book; the ISBN must not be catalogued yet
    pub async fn create_book(&self, book: CreateBook) -> AppResult<Book> {
        let book = book.normalized();
        book.validate()?;

        let book = self.repository.catalog.create_book(Book::new(book)).await?;
        tracing::info!(book_id = %book.id, isbn = %book.isbn, "Book created");
        Ok(book)
    }

    /// Partial update; the merged record must keep `available_copies <= total_copies`
    pub async fn update_book(&self, id: Uuid, update: UpdateBook) -> AppResult<Book> {
        let update = update.normalized();
        update.validate()?;

        let book = self
            .repository
            .catalog
            .update_book(id, update)
            .await?
            .ok_or_else(|| book_not_found(id))?;

        tracing::info!(
            book_id = %book.id,
            total_copies = book.total_copies,
            available_copies = book.available_copies,
            "Book updated"
        );
        Ok(book)
    }

    /// Delete a book that has no copy on loan
    pub async fn delete_book(&self, id: Uuid) -> AppResult<()> {
        if !self.repository.catalog.delete_book(id).await? {
            return Err(book_not_found(id));
        }
        tracing::info!(book_id = %id, "Book deleted");
        Ok(())
    }
}

pub(crate) fn book_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Book with id {} not found", id))
}
