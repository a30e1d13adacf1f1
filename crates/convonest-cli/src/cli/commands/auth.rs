//! Login, logout, registration and whoami.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use convonest_core::Forum;
use convonest_core::validation::RegistrationForm;

pub async fn login(forum: &Forum, email: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => read_password("Password: ")?,
    };
    let principal = forum.login(email, &password).await?;
    println!("Logged in as {} <{}>", principal.label(), principal.identifier);
    Ok(())
}

pub async fn login_with_google(forum: &Forum, id_token: &str) -> Result<()> {
    let principal = forum.login_with_google(id_token).await?;
    println!(
        "Logged in with Google as {} <{}>",
        principal.label(),
        principal.identifier
    );
    Ok(())
}

pub fn logout(forum: &Forum) -> Result<()> {
    let was_logged_in = forum.session().is_authenticated();
    forum.logout().context("clear stored session")?;
    if was_logged_in {
        println!("Logged out.");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}

pub async fn register(
    forum: &Forum,
    name: &str,
    email: &str,
    password: Option<String>,
    photo_url: Option<String>,
) -> Result<()> {
    let (password, confirm_password) = match password {
        Some(password) => (password.clone(), password),
        None => (
            read_password("Password: ")?,
            read_password("Confirm password: ")?,
        ),
    };
    let form = RegistrationForm {
        name: name.to_string(),
        email: email.to_string(),
        password,
        confirm_password,
        photo_url,
    };
    let principal = forum.register(&form).await?;
    println!(
        "Registered and logged in as {} <{}>",
        principal.label(),
        principal.identifier
    );
    Ok(())
}

pub async fn whoami(forum: &Forum) -> Result<()> {
    let Some(principal) = forum.session().current_principal() else {
        println!("Not logged in.");
        return Ok(());
    };

    println!("{} <{}>", principal.label(), principal.identifier);
    println!("Signed in with: {}", principal.provider);
    match forum.profile().await {
        Ok(profile) => {
            println!("Role: {:?}", profile.role);
            println!("Status: {:?}", profile.status);
            println!("Posts: {}", profile.posts);
        }
        Err(e) => tracing::debug!("Profile unavailable: {e}"),
    }
    Ok(())
}

/// Reads one line from stdin, prompting on stderr.
fn read_password(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    io::stderr().flush().ok();

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        anyhow::bail!("No password given");
    }
    Ok(password)
}
