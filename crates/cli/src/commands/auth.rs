//! `tether login`, `tether logout`, `tether whoami`.

use anyhow::Context;
use chrono::{Local, Utc};
use console::{style, Term};
use tether_client::{Client, ClientConfig};

use super::signed_in_client;

pub async fn login(config: ClientConfig, email: String, password: Option<String>) -> anyhow::Result<()> {
    let password = match password {
        Some(p) => p,
        None => Term::stderr()
            .read_secure_line()
            .context("failed to read password")?,
    };

    let client = Client::connect(config)?;
    let profile = client.api.sign_in(&email, &password).await?;
    let session = client
        .store()
        .get()
        .context("sign-in did not produce a session")?;

    println!();
    println!(
        "  {} Signed in as {}",
        style("✓").green(),
        style(profile.display_name.as_deref().unwrap_or(&profile.id)).bold()
    );
    println!(
        "  Session valid until {}",
        session.expires_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    println!();
    Ok(())
}

pub fn logout(config: ClientConfig) -> anyhow::Result<()> {
    let client = Client::connect(config)?;
    let was_signed_in = client.restore()?.is_some();
    client.api.sign_out();

    if was_signed_in {
        println!("  Signed out.");
    } else {
        println!("  Not signed in.");
    }
    Ok(())
}

pub fn whoami(config: ClientConfig, json: bool) -> anyhow::Result<()> {
    let client = signed_in_client(config)?;
    let session = client.store().get().context("session vanished")?;
    let user_id = client.api.viewer_id()?;

    if json {
        let value = serde_json::json!({
            "userId": user_id,
            "expiresAt": session.expires_at,
            "expired": session.is_expired(Utc::now()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    println!("  User:    {}", style(&user_id).bold());
    let expiry = session.expires_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    if session.is_expired(Utc::now()) {
        println!("  Access:  expired at {expiry} (renewed on next request)");
    } else {
        println!("  Access:  valid until {expiry}");
    }
    println!();
    Ok(())
}
