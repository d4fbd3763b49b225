//! Loan management endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Book, Loan, LoanDetails, LoanRequest},
};

use super::AuthenticatedUser;

/// Return response: the closed loan and the book after the copy came back
#[derive(Serialize, ToSchema)]
pub struct ReturnResponse {
    pub loan: Loan,
    pub book: Book,
}

/// Borrow a book
#[utoipa::path(
    post,
    path = "/loans/borrow",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = LoanRequest,
    responses(
        (status = 200, description = "Book borrowed", body = Loan),
        (status = 403, description = "Members can only borrow for themselves", body = crate::error::ErrorResponse),
        (status = 404, description = "User or book not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Already borrowed or no copy available", body = crate::error::ErrorResponse)
    )
)]
pub async fn borrow_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<LoanRequest>,
) -> AppResult<Json<Loan>> {
    claims.require_self_or_admin(request.user_id)?;

    let loan = state
        .services
        .loans
        .borrow(request.user_id, request.book_id)
        .await?;
    Ok(Json(loan))
}

/// Return a borrowed book
#[utoipa::path(
    post,
    path = "/loans/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = LoanRequest,
    responses(
        (status = 200, description = "Book returned", body = ReturnResponse),
        (status = 403, description = "Members can only return their own loans", body = crate::error::ErrorResponse),
        (status = 404, description = "User or book not found", body = crate::error::ErrorResponse),
        (status = 409, description = "No active loan for this book", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<LoanRequest>,
) -> AppResult<Json<ReturnResponse>> {
    claims.require_self_or_admin(request.user_id)?;

    let (loan, book) = state
        .services
        .loans
        .return_book(request.user_id, request.book_id)
        .await?;
    Ok(Json(ReturnResponse { loan, book }))
}

/// Get the loan history of a user
#[utoipa::path(
    get,
    path = "/users/{id}/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Loans, most recent first", body = Vec<LoanDetails>),
        (status = 403, description = "Members can only see their own loans", body = crate::error::ErrorResponse),
        (status = 404, description = "User not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_user_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<LoanDetails>>> {
    claims.require_self_or_admin(user_id)?;

    let loans = state.services.loans.history(user_id).await?;
    Ok(Json(loans))
}
