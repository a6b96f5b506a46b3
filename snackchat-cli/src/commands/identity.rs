//! `whoami` and `nick`.

use std::path::Path;

use anyhow::{Result, bail};
use shared::identity::IdentityProvider;

use crate::identity::FileIdentity;

pub fn whoami(identity_path: &Path) -> Result<()> {
    let identity = FileIdentity::load_or_create(identity_path)?;
    println!("sender id: {}", identity.sender_id());
    println!(
        "display name: {}",
        identity.display_name().unwrap_or("(not set)")
    );
    println!("stored at {}", identity.path().display());
    Ok(())
}

/// Saves a new display name. Names are not checked for uniqueness.
pub fn nick(identity_path: &Path, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("display name must not be empty");
    }

    let mut identity = FileIdentity::load_or_create(identity_path)?;
    identity.set_display_name(name.to_string());
    identity.save()?;
    println!("display name set to {name}");
    Ok(())
}
