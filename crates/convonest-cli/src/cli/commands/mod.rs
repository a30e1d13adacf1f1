//! CLI command handlers.

pub mod auth;
pub mod board;
pub mod config;
pub mod posts;

/// Short local date for listings.
fn format_date(at: chrono::DateTime<chrono::Utc>) -> String {
    at.with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}
