//! Book (catalog entry) model and related types

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::error::{AppError, AppResult};

/// Default and maximum page size for catalog listings
pub const MAX_PAGE_LIMIT: i64 = 50;

static ISBN_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[0-9]{9}[0-9X]|[0-9]{13})$").expect("valid ISBN regex"));

/// Book model (storage + API)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub published_date: NaiveDate,
    pub genre: String,
    pub total_copies: i32,
    pub available_copies: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    pub fn new(book: CreateBook) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: book.title,
            author: book.author,
            isbn: normalize_isbn(&book.isbn),
            published_date: book.published_date,
            genre: book.genre,
            total_copies: book.total_copies,
            available_copies: book.available_copies,
            created_at: now,
            updated_at: now,
        }
    }

    /// `0 <= available_copies <= total_copies`
    pub fn copies_are_consistent(&self) -> bool {
        copies_within_bounds(self.total_copies, self.available_copies)
    }

    pub fn borrowed_copies(&self) -> i32 {
        self.total_copies - self.available_copies
    }

    /// Every active loan must still hold a copy that is not on the shelf
    pub fn ensure_covers_loans(&self, active_loans: i64) -> AppResult<()> {
        if i64::from(self.borrowed_copies()) < active_loans {
            return Err(AppError::Conflict(format!(
                "Book has {} copies on loan; at most {} copies can be available",
                active_loans,
                i64::from(self.total_copies) - active_loans
            )));
        }
        Ok(())
    }
}

pub fn copies_within_bounds(total_copies: i32, available_copies: i32) -> bool {
    total_copies >= 0 && available_copies >= 0 && available_copies <= total_copies
}

/// Strip hyphens and spaces, upper-case a trailing `x`
pub fn normalize_isbn(isbn: &str) -> String {
    isbn.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// ISBN-10 or ISBN-13 with a valid check digit
pub fn is_valid_isbn(isbn: &str) -> bool {
    let isbn = normalize_isbn(isbn);
    if !ISBN_SHAPE.is_match(&isbn) {
        return false;
    }

    let digits: Vec<u32> = isbn
        .chars()
        .map(|c| if c == 'X' { 10 } else { c.to_digit(10).unwrap_or(0) })
        .collect();

    if digits.len() == 10 {
        let sum: u32 = digits
            .iter()
            .enumerate()
            .map(|(i, d)| (10 - i as u32) * d)
            .sum();
        sum % 11 == 0
    } else {
        let sum: u32 = digits
            .iter()
            .enumerate()
            .map(|(i, d)| if i % 2 == 0 { *d } else { d * 3 })
            .sum();
        sum % 10 == 0
    }
}

fn validate_isbn(isbn: &str) -> Result<(), ValidationError> {
    if is_valid_isbn(isbn) {
        Ok(())
    } else {
        let mut error = ValidationError::new("isbn");
        error.message = Some("Invalid ISBN".into());
        Err(error)
    }
}

fn copies_error() -> ValidationError {
    let mut error = ValidationError::new("copies");
    error.message =
        Some("Available copies count should be less than or equal to total copies".into());
    error
}

fn validate_create_copies(book: &CreateBook) -> Result<(), ValidationError> {
    if book.available_copies > book.total_copies {
        return Err(copies_error());
    }
    Ok(())
}

fn validate_update_copies(book: &UpdateBook) -> Result<(), ValidationError> {
    match (book.total_copies, book.available_copies) {
        (Some(total), Some(available)) if available > total => Err(copies_error()),
        _ => Ok(()),
    }
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[validate(schema(function = "validate_create_copies"))]
pub struct CreateBook {
    #[validate(length(min = 1, max = 150, message = "Title should be between 1 and 150 characters"))]
    pub title: String,
    #[validate(length(min = 2, max = 100, message = "Author should be between 2 and 100 characters"))]
    pub author: String,
    #[validate(custom(function = "validate_isbn"))]
    pub isbn: String,
    pub published_date: NaiveDate,
    #[validate(length(min = 3, max = 30, message = "Genre should be between 3 and 30 characters"))]
    pub genre: String,
    #[validate(range(min = 0, message = "Total copies should be at least 0"))]
    pub total_copies: i32,
    #[validate(range(min = 0, message = "Available copies should be at least 0"))]
    pub available_copies: i32,
}

impl CreateBook {
    pub fn normalized(self) -> Self {
        Self {
            title: self.title.trim().to_string(),
            author: self.author.trim().to_string(),
            isbn: self.isbn.trim().to_string(),
            genre: self.genre.trim().to_string(),
            ..self
        }
    }
}

/// Partial book update (admin edit)
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_update_copies"))]
pub struct UpdateBook {
    #[validate(length(min = 1, max = 150, message = "Title should be between 1 and 150 characters"))]
    pub title: Option<String>,
    #[validate(length(min = 2, max = 100, message = "Author should be between 2 and 100 characters"))]
    pub author: Option<String>,
    #[validate(custom(function = "validate_isbn"))]
    pub isbn: Option<String>,
    pub published_date: Option<NaiveDate>,
    #[validate(length(min = 3, max = 30, message = "Genre should be between 3 and 30 characters"))]
    pub genre: Option<String>,
    #[validate(range(min = 0, message = "Total copies should be at least 0"))]
    pub total_copies: Option<i32>,
    #[validate(range(min = 0, message = "Available copies should be at least 0"))]
    pub available_copies: Option<i32>,
}

impl UpdateBook {
    pub fn normalized(self) -> Self {
        let trim = |s: Option<String>| s.map(|s| s.trim().to_string());
        Self {
            title: trim(self.title),
            author: trim(self.author),
            isbn: trim(self.isbn),
            genre: trim(self.genre),
            ..self
        }
    }

    /// Merge the edit into `book`, re-checking the copy invariant on the result
    pub fn apply_to(&self, book: &Book) -> AppResult<Book> {
        let merged = Book {
            id: book.id,
            title: self.title.clone().unwrap_or_else(|| book.title.clone()),
            author: self.author.clone().unwrap_or_else(|| book.author.clone()),
            isbn: self
                .isbn
                .as_deref()
                .map(normalize_isbn)
                .unwrap_or_else(|| book.isbn.clone()),
            published_date: self.published_date.unwrap_or(book.published_date),
            genre: self.genre.clone().unwrap_or_else(|| book.genre.clone()),
            total_copies: self.total_copies.unwrap_or(book.total_copies),
            available_copies: self.available_copies.unwrap_or(book.available_copies),
            created_at: book.created_at,
            updated_at: Utc::now(),
        };

        if !merged.copies_are_consistent() {
            return Err(AppError::Validation(format!(
                "Available copies ({}) should be less than or equal to total copies ({})",
                merged.available_copies, merged.total_copies
            )));
        }

        Ok(merged)
    }
}

/// Catalog search parameters.
///
/// Filters are OR-ed; `genre` accepts a comma-separated list. `page` and `limit`
/// are kept as raw strings so that junk values fall back to the defaults.
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BookQuery {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl BookQuery {
    pub fn title_filter(&self) -> Option<&str> {
        non_empty(self.title.as_deref())
    }

    pub fn author_filter(&self) -> Option<&str> {
        non_empty(self.author.as_deref())
    }

    pub fn genres(&self) -> Vec<String> {
        self.genre
            .as_deref()
            .map(|g| {
                g.split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_filters(&self) -> bool {
        self.title_filter().is_some() || self.author_filter().is_some() || !self.genres().is_empty()
    }

    /// Page number, starting at 1
    pub fn page(&self) -> i64 {
        parse_positive(self.page.as_deref()).unwrap_or(1)
    }

    pub fn limit(&self) -> i64 {
        parse_positive(self.limit.as_deref())
            .unwrap_or(MAX_PAGE_LIMIT)
            .min(MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.limit())
    }

    /// In-memory equivalent of the SQL filter
    pub fn matches(&self, book: &Book) -> bool {
        if !self.has_filters() {
            return true;
        }
        let contains = |haystack: &str, needle: &str| {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        };

        self.title_filter().is_some_and(|t| contains(&book.title, t))
            || self.author_filter().is_some_and(|a| contains(&book.author, a))
            || self.genres().iter().any(|g| g == &book.genre)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_positive(value: Option<&str>) -> Option<i64> {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_book() -> CreateBook {
        CreateBook {
            title: "The Pragmatic Programmer".to_string(),
            author: "Andrew Hunt".to_string(),
            isbn: "978-0-306-40615-7".to_string(),
            published_date: NaiveDate::from_ymd_opt(1999, 10, 20).unwrap(),
            genre: "Software".to_string(),
            total_copies: 2,
            available_copies: 2,
        }
    }

    #[test]
    fn test_normalize_isbn() {
        assert_eq!(normalize_isbn("978-0-306-40615-7"), "9780306406157");
        assert_eq!(normalize_isbn("0 8044 2957 x"), "080442957X");
    }

    #[test]
    fn test_isbn_check_digits() {
        assert!(is_valid_isbn("978-0-306-40615-7"));
        assert!(is_valid_isbn("0-306-40615-2"));
        assert!(is_valid_isbn("080442957X"));
        assert!(!is_valid_isbn("9780306406158"));
        assert!(!is_valid_isbn("0306406153"));
        assert!(!is_valid_isbn("12345"));
        assert!(!is_valid_isbn("X803064061"));
        // Unicode digits are not ISBN digits
        assert!(!is_valid_isbn("\u{660}".repeat(10).as_str()));
    }

    #[test]
    fn test_create_book_validation() {
        assert!(create_book().validate().is_ok());

        let too_many = CreateBook {
            available_copies: 3,
            ..create_book()
        };
        assert!(too_many.validate().is_err());

        let negative = CreateBook {
            total_copies: -1,
            available_copies: -1,
            ..create_book()
        };
        assert!(negative.validate().is_err());

        let bad_isbn = CreateBook {
            isbn: "1234567890".to_string(),
            ..create_book()
        };
        let errors = bad_isbn.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("isbn"));
    }

    #[test]
    fn test_update_revalidates_merged_copies() {
        let book = Book::new(create_book());

        let shrink = UpdateBook {
            total_copies: Some(1),
            ..Default::default()
        };
        assert!(shrink.validate().is_ok());
        assert!(matches!(shrink.apply_to(&book), Err(AppError::Validation(_))));

        let grow = UpdateBook {
            total_copies: Some(5),
            available_copies: Some(4),
            title: Some("Second edition".to_string()),
            ..Default::default()
        };
        let merged = grow.apply_to(&book).unwrap();
        assert_eq!(merged.total_copies, 5);
        assert_eq!(merged.available_copies, 4);
        assert_eq!(merged.title, "Second edition");
        assert_eq!(merged.isbn, book.isbn);
        assert_eq!(merged.id, book.id);
    }

    #[test]
    fn test_copy_counts_must_cover_active_loans() {
        let book = Book {
            total_copies: 3,
            available_copies: 1,
            ..Book::new(create_book())
        };
        assert!(book.ensure_covers_loans(2).is_ok());
        assert!(book.ensure_covers_loans(0).is_ok());
        assert!(matches!(book.ensure_covers_loans(3), Err(AppError::Conflict(_))));
    }

    #[test]
    fn test_query_pagination_defaults() {
        let query = BookQuery::default();
        assert_eq!(query.page(), 1);
        assert_eq!(query.limit(), 50);
        assert_eq!(query.offset(), 0);

        let query = BookQuery {
            page: Some("3".to_string()),
            limit: Some("500".to_string()),
            ..Default::default()
        };
        assert_eq!(query.limit(), 50);
        assert_eq!(query.offset(), 100);

        let query = BookQuery {
            page: Some("abc".to_string()),
            limit: Some("-4".to_string()),
            ..Default::default()
        };
        assert_eq!(query.page(), 1);
        assert_eq!(query.limit(), 50);
    }

    #[test]
    fn test_query_filters_are_ored() {
        let book = Book::new(create_book());

        let by_genre = BookQuery {
            genre: Some("Fiction, Software".to_string()),
            ..Default::default()
        };
        assert_eq!(by_genre.genres(), vec!["Fiction", "Software"]);
        assert!(by_genre.matches(&book));

        let by_title_or_author = BookQuery {
            title: Some("nothing like it".to_string()),
            author: Some("hunt".to_string()),
            ..Default::default()
        };
        assert!(by_title_or_author.matches(&book));

        let miss = BookQuery {
            title: Some("dune".to_string()),
            ..Default::default()
        };
        assert!(!miss.matches(&book));

        let blank = BookQuery {
            title: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!blank.has_filters());
        assert!(blank.matches(&book));
    }
}
