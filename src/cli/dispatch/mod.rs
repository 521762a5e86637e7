use crate::cli::{actions::Action, globals::GlobalArgs};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Turn parsed arguments into the action to run.
/// # Errors
/// Returns an error if a required argument is missing
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let directory_url = matches
        .get_one::<String>("directory-url")
        .cloned()
        .context("missing required argument: --directory-url")?;

    let app_name = matches
        .get_one::<String>("app-name")
        .cloned()
        .context("missing required argument: --app-name")?;

    let app_password = matches
        .get_one::<String>("app-password")
        .map(|s| SecretString::from(s.clone()))
        .context("missing required argument: --app-password")?;

    let mut globals = GlobalArgs::new(directory_url);
    globals.set_credentials(app_name, app_password);

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        secure_cookies: matches.get_flag("secure-cookies"),
        globals,
    })
}
