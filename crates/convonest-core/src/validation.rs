//! Form checks that run before anything is sent.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ApiError, ApiResult};

pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\S+@\S+\.\S+$").ok());

/// A post as typed by the user.
#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub title: String,
    pub body: String,
    pub tag: String,
}

#[derive(Debug, Clone, Default)]
pub struct AnnouncementDraft {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub photo_url: Option<String>,
}

/// # Errors
/// `ValidationFailed` naming the first bad field.
pub fn validate_login(email: &str, password: &str) -> ApiResult<()> {
    validate_email(email)?;
    validate_password(password)
}

/// # Errors
/// `ValidationFailed` naming the first bad field.
pub fn validate_registration(form: &RegistrationForm) -> ApiResult<()> {
    required("name", &form.name, "Name is required")?;
    validate_email(&form.email)?;
    validate_password(&form.password)?;
    required(
        "confirm_password",
        &form.confirm_password,
        "Please confirm your password",
    )?;
    if form.password != form.confirm_password {
        return Err(ApiError::validation(
            "confirm_password",
            "Passwords do not match",
        ));
    }
    if let Some(url) = &form.photo_url {
        validate_image_url("photo_url", url)?;
    }
    Ok(())
}

/// # Errors
/// `ValidationFailed` naming the first bad field.
pub fn validate_post(draft: &PostDraft) -> ApiResult<()> {
    required("title", &draft.title, "Title is required")?;
    required("body", &draft.body, "Description is required")?;
    required("tag", &draft.tag, "Pick a tag")
}

/// # Errors
/// `ValidationFailed` naming the first bad field.
pub fn validate_announcement(draft: &AnnouncementDraft) -> ApiResult<()> {
    required("title", &draft.title, "Title is required")?;
    required(
        "description",
        &draft.description,
        "Description is required",
    )
}

/// Returns the trimmed comment text.
///
/// # Errors
/// `ValidationFailed` when the comment is blank.
pub fn validate_comment(text: &str) -> ApiResult<String> {
    required("comment", text, "Comment cannot be empty")?;
    Ok(text.trim().to_string())
}

fn required(field: &'static str, value: &str, message: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::validation(field, message));
    }
    Ok(())
}

fn validate_email(email: &str) -> ApiResult<()> {
    required("email", email, "Email is required")?;
    let valid = EMAIL_PATTERN
        .as_ref()
        .is_none_or(|pattern| pattern.is_match(email.trim()));
    if !valid {
        return Err(ApiError::validation(
            "email",
            "Entered value is not a valid email",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> ApiResult<()> {
    required("password", password, "Password is required")?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(
            "password",
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}

fn validate_image_url(field: &'static str, raw: &str) -> ApiResult<()> {
    match url::Url::parse(raw.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ApiError::validation(field, "Image must be an http(s) URL")),
    }
}
