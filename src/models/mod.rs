//! Data models for the library server

pub mod book;
pub mod loan;
pub mod report;
pub mod user;

// Re-export commonly used types
pub use book::{Book, BookQuery, CreateBook, UpdateBook};
pub use loan::{Loan, LoanDetails, LoanRequest, LoanStatus};
pub use report::{AvailabilitySummary, BookBorrowCount, MemberBorrowCount, ReportQuery};
pub use user::{NewUser, Role, User, UserClaims, UserSummary};
