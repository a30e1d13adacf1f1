//! Core ConvoNest library (session, request gateway, voting, listings, config).

pub mod access;
pub mod api;
pub mod config;
pub mod error;
pub mod forum;
pub mod gateway;
pub mod listing;
pub mod logging;
pub mod notice;
pub mod session;
pub mod validation;
pub mod votes;

pub use error::{ApiError, ApiResult, ErrorKind};
pub use forum::{Forum, PostThread};
