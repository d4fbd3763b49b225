//! Statistics and reports service

use crate::{
    error::AppResult,
    models::{AvailabilitySummary, BookBorrowCount, MemberBorrowCount, ReportQuery},
    repository::Repository,
};

#[derive(Clone)]
pub struct ReportsService {
    repository: Repository,
}

impl ReportsService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Books ranked by number of loans, highest first
    pub async fn most_borrowed_books(&self, query: &ReportQuery) -> AppResult<Vec<BookBorrowCount>> {
        self.repository.reports.most_borrowed_books(query.limit()).await
    }

    /// Members ranked by number of loans, highest first
    pub async fn most_active_members(
        &self,
        query: &ReportQuery,
    ) -> AppResult<Vec<MemberBorrowCount>> {
        self.repository.reports.most_active_members(query.limit()).await
    }

    pub async fn availability_summary(&self) -> AppResult<AvailabilitySummary> {
        self.repository.reports.availability_summary().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::repository::MockReportStore;

    #[tokio::test]
    async fn test_limit_is_clamped_or_unbounded() {
        let mut reports = MockReportStore::new();
        reports
            .expect_most_borrowed_books()
            .withf(|limit| *limit == Some(100))
            .times(1)
            .returning(|_| Ok(Vec::new()));
        reports
            .expect_most_active_members()
            .withf(|limit| limit.is_none())
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let mut repository = Repository::memory();
        repository.reports = Arc::new(reports);
        let service = ReportsService::new(repository);

        let books = service
            .most_borrowed_books(&ReportQuery { limit: Some(5000) })
            .await
            .unwrap();
        assert!(books.is_empty());
        service
            .most_active_members(&ReportQuery::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_catalog_summary() {
        let service = ReportsService::new(Repository::memory());
        let summary = service.availability_summary().await.unwrap();
        assert_eq!(summary, AvailabilitySummary::default());
    }
}
