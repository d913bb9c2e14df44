pub mod admin;
pub mod auth;

use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: i64 = 50;

pub fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

/// Paginated list response.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
