//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{auth, books, health, loans, reports};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Library API",
        version = "1.0.0",
        description = "Library management REST API: catalog, loans and reports"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Auth
        auth::signup,
        auth::login,
        auth::me,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        // Loans
        loans::borrow_book,
        loans::return_book,
        loans::get_user_loans,
        // Reports
        reports::most_borrowed_books,
        reports::most_active_members,
        reports::availability_summary,
    ),
    components(
        schemas(
            // Auth
            auth::AuthResponse,
            crate::models::user::SignupRequest,
            crate::models::user::LoginRequest,
            crate::models::user::Role,
            crate::models::user::UserSummary,
            // Books
            books::BookPage,
            crate::models::book::Book,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            // Loans
            loans::ReturnResponse,
            crate::models::loan::Loan,
            crate::models::loan::LoanStatus,
            crate::models::loan::LoanDetails,
            crate::models::loan::LoanRequest,
            // Reports
            crate::models::report::BookBorrowCount,
            crate::models::report::MemberBorrowCount,
            crate::models::report::AvailabilitySummary,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Authentication endpoints"),
        (name = "books", description = "Catalog management"),
        (name = "loans", description = "Borrowing and returning books"),
        (name = "reports", description = "Usage reports")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_loan_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/loans/borrow"));
        assert!(doc.paths.paths.contains_key("/loans/return"));
        assert!(doc.paths.paths.contains_key("/users/{id}/loans"));
    }
}
