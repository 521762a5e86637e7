pub mod health;
pub use self::health::{health, live};

pub mod whoami;
pub use self::whoami::whoami;
