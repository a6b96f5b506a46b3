//! Writes the OpenAPI document for the relay API.

use crate::openapi::ApiDoc;
use anyhow::Context;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use utoipa::OpenApi;

/// Renders the OpenAPI document.
///
/// `output` selects the destination: `None` or `"yaml"` streams YAML to
/// stdout, `"json"` streams JSON, and anything else is a file path whose
/// extension picks the format (YAML unless it ends in `.json`).
///
/// # Errors
/// Returns an error if rendering fails or the file cannot be written.
pub fn generate_spec(output: Option<&str>) -> anyhow::Result<()> {
    let openapi = ApiDoc::openapi();

    match output {
        Some("json") => io::stdout().write_all(openapi.to_pretty_json()?.as_bytes())?,
        None | Some("yaml") => io::stdout().write_all(openapi.to_yaml()?.as_bytes())?,
        Some(path) => {
            let path = Path::new(path);
            let rendered = match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => openapi.to_pretty_json()?,
                _ => openapi.to_yaml()?,
            };
            fs::write(path, rendered)
                .with_context(|| format!("writing OpenAPI document to {}", path.display()))?;
            println!("OpenAPI spec written to {}", path.display());
        }
    }

    Ok(())
}
