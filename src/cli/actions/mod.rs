use crate::cli::globals::GlobalArgs;

pub mod server;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        secure_cookies: bool,
        globals: GlobalArgs,
    },
}

impl Action {
    /// Run the action.
    /// # Errors
    /// Returns an error if the action fails
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Server { .. } => server::handle(self).await,
        }
    }
}
