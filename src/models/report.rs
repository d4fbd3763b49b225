//! Aggregate report rows

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{book::Book, user::UserSummary};

pub const MAX_REPORT_LIMIT: i64 = 100;

/// Borrow count for one book
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookBorrowCount {
    pub book_id: Uuid,
    pub total_borrows: i64,
    /// Current book snapshot, absent if the book was deleted
    pub book: Option<Book>,
}

/// Borrow count for one member
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MemberBorrowCount {
    pub user_id: Uuid,
    pub total_borrows: i64,
    pub user: Option<UserSummary>,
}

/// Copy totals across the catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AvailabilitySummary {
    pub total_books: i64,
    pub total_available_books: i64,
    pub total_borrowed_books: i64,
}

impl AvailabilitySummary {
    pub fn new(total_books: i64, total_available_books: i64) -> Self {
        Self {
            total_books,
            total_available_books,
            total_borrowed_books: total_books - total_available_books,
        }
    }
}

/// Ranking report parameters
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    /// Number of rows (1-100); every row when absent
    pub limit: Option<i64>,
}

impl ReportQuery {
    pub fn limit(&self) -> Option<i64> {
        self.limit
            .filter(|l| *l > 0)
            .map(|l| l.min(MAX_REPORT_LIMIT))
    }
}
