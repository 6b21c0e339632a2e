use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::repo::RepoError;
use crate::routes::redirect;
use crate::views;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("login required")] Unauthorized,
    #[error("too many requests")] TooManyRequests,
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            // conflicts and ownership checks are handled where they can happen;
            // one reaching this point is a bug
            RepoError::Conflict | RepoError::Forbidden => {
                log::error!("unhandled repository outcome: {e}");
                ApiError::Internal
            }
            RepoError::Internal(msg) => {
                log::error!("repository failure: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::FOUND,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Unauthorized = self {
            return redirect("/login");
        }
        let status = self.status_code();
        HttpResponse::build(status)
            .content_type(views::HTML)
            .body(views::error_page(status.as_u16(), &self.to_string()))
    }
}
