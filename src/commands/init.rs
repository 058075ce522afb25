use crate::commands::Out;
use crate::{Config, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the data directory, its subdirectories and:
/// - Creates an initial `config.json` file using `upstream_url` and `time_zone` along with default
///   settings
/// - Moves `token_file`, if given, into its default location in the data dir.
/// - Creates the SQLite budget store.
///
/// # Arguments
/// - `home` - The directory that will be the root of data directory, e.g. `$HOME/budgetboard`
/// - `upstream_url` - The base URL of the Firefly-III server.
/// - `token_file` - A file holding a Firefly-III personal access token. When omitted, the token
///   must be written to `$BUDGETBOARD_HOME/.secrets/upstream_token` before the ledger is used.
/// - `time_zone` - The IANA time zone that budget months are computed in.
///
/// # Errors
/// - Returns an error if any file operations fail.
pub async fn init(
    home: &Path,
    upstream_url: &str,
    token_file: Option<&Path>,
    time_zone: &str,
) -> Result<Out<()>> {
    let config = Config::create(home, upstream_url, token_file, time_zone)
        .await
        .context("Unable to create the data directory and configs")?;
    Ok(format!(
        "Successfully created the budgetboard directory at {}",
        config.root().display()
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_then_init_again_fails() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("home");
        let out = init(&home, "http://localhost:8080", None, "Europe/Paris")
            .await
            .unwrap();
        assert!(out.message().contains("Successfully created"));
        assert!(home.join("config.json").is_file());

        let err = init(&home, "http://localhost:8080", None, "Europe/Paris")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Unable to create"));
    }
}
