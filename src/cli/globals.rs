use secrecy::SecretString;

/// Directory connection settings shared by every action.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub directory_url: String,
    pub app_name: String,
    pub app_password: SecretString,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(directory_url: String) -> Self {
        Self {
            directory_url,
            app_name: String::new(),
            app_password: SecretString::default(),
        }
    }

    pub fn set_credentials(&mut self, app_name: String, app_password: SecretString) {
        self.app_name = app_name;
        self.app_password = app_password;
    }
}
