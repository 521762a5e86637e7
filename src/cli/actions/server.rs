use crate::{cli::actions::Action, directory::DirectoryClient, gateway, sso::Sso};
use anyhow::Result;
use tracing::info;

/// Handle the server action
/// # Errors
/// Returns an error if the directory client cannot be built or the server fails
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            secure_cookies,
            globals,
        } => {
            let directory = DirectoryClient::new(
                &globals.app_name,
                globals.app_password,
                &globals.directory_url,
            )?;

            info!(
                directory = %directory.base_url(),
                app = %globals.app_name,
                secure_cookies,
                "starting SSO gateway"
            );

            let sso = Sso::builder(directory)
                .secure_cookies(secure_cookies)
                .build();

            gateway::new(port, sso).await?;
        }
    }

    Ok(())
}
