//! Report endpoints (admin only)

use axum::{
    extract::{Query, State},
    Json,
};

use crate::{
    error::AppResult,
    models::{AvailabilitySummary, BookBorrowCount, MemberBorrowCount, ReportQuery},
};

use super::AuthenticatedUser;

/// Most borrowed books
#[utoipa::path(
    get,
    path = "/reports/books/most-borrowed",
    tag = "reports",
    security(("bearer_auth" = [])),
    params(ReportQuery),
    responses(
        (status = 200, description = "Books by number of loans", body = Vec<BookBorrowCount>),
        (status = 403, description = "Admin only", body = crate::error::ErrorResponse)
    )
)]
pub async fn most_borrowed_books(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<ReportQuery>,
) -> AppResult<Json<Vec<BookBorrowCount>>> {
    claims.require_admin()?;

    let rows = state.services.reports.most_borrowed_books(&query).await?;
    Ok(Json(rows))
}

/// Most active members
#[utoipa::path(
    get,
    path = "/reports/members/most-active",
    tag = "reports",
    security(("bearer_auth" = [])),
    params(ReportQuery),
    responses(
        (status = 200, description = "Members by number of loans", body = Vec<MemberBorrowCount>),
        (status = 403, description = "Admin only", body = crate::error::ErrorResponse)
    )
)]
pub async fn most_active_members(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<ReportQuery>,
) -> AppResult<Json<Vec<MemberBorrowCount>>> {
    claims.require_admin()?;

    let rows = state.services.reports.most_active_members(&query).await?;
    Ok(Json(rows))
}

/// Copy totals across the catalog
#[utoipa::path(
    get,
    path = "/reports/books/availability-summary",
    tag = "reports",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Total, available and borrowed copies", body = AvailabilitySummary),
        (status = 403, description = "Admin only", body = crate::error::ErrorResponse)
    )
)]
pub async fn availability_summary(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<AvailabilitySummary>> {
    claims.require_admin()?;

    let summary = state.services.reports.availability_summary().await?;
    Ok(Json(summary))
}
