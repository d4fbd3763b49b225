//! Loan (borrow record) model and related types

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, FromRow, Postgres};
use utoipa::ToSchema;
use uuid::Uuid;

use super::book::Book;

/// Loan lifecycle: BORROWED, then RETURNED exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoanStatus {
    Borrowed,
    Returned,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Borrowed => "BORROWED",
            LoanStatus::Returned => "RETURNED",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BORROWED" => Ok(LoanStatus::Borrowed),
            "RETURNED" => Ok(LoanStatus::Returned),
            _ => Err(format!("Invalid loan status: {}", s)),
        }
    }
}

impl sqlx::Type<Postgres> for LoanStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }
}

impl<'r> Decode<'r, Postgres> for LoanStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for LoanStatus {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// Loan model from storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Loan {
    pub id: Uuid,
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub status: LoanStatus,
    pub borrowed_date: DateTime<Utc>,
    pub returned_date: Option<DateTime<Utc>>,
}

impl Loan {
    /// A fresh active loan. Timestamps are kept at microsecond precision, like PostgreSQL.
    pub fn new(user_id: Uuid, book_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            book_id,
            status: LoanStatus::Borrowed,
            borrowed_date: Utc::now().trunc_subsecs(6),
            returned_date: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Borrowed
    }

    /// BORROWED -> RETURNED. Returns false if the loan was already closed.
    pub fn close(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = LoanStatus::Returned;
        self.returned_date = Some(return_timestamp(self.borrowed_date, now));
        true
    }

    /// RETURNED -> BORROWED, used only to undo an uncommitted close
    pub(crate) fn reopen(&mut self) {
        self.status = LoanStatus::Borrowed;
        self.returned_date = None;
    }
}

/// The return date is strictly later than the borrow date, even when both
/// land on the same clock tick.
pub fn return_timestamp(borrowed_date: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(6);
    if now > borrowed_date {
        now
    } else {
        borrowed_date + Duration::microseconds(1)
    }
}

/// Loan joined with the current snapshot of its book (absent if the book was deleted)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    pub id: Uuid,
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub status: LoanStatus,
    pub borrowed_date: DateTime<Utc>,
    pub returned_date: Option<DateTime<Utc>>,
    pub book: Option<Book>,
}

impl LoanDetails {
    pub fn new(loan: Loan, book: Option<Book>) -> Self {
        Self {
            id: loan.id,
            user_id: loan.user_id,
            book_id: loan.book_id,
            status: loan.status,
            borrowed_date: loan.borrowed_date,
            returned_date: loan.returned_date,
            book,
        }
    }
}

/// Borrow or return request: the (user, book) pair
#[derive(Debug, Clone, Copy, Deserialize, Serialize, ToSchema)]
pub struct LoanRequest {
    pub user_id: Uuid,
    pub book_id: Uuid,
}
