use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("portero")
        .about("Cookie-based single sign-on gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("PORTERO_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("directory-url")
                .long("directory-url")
                .help("Directory base URL, example: https://crowd.tld/crowd")
                .env("PORTERO_DIRECTORY_URL")
                .required(true),
        )
        .arg(
            Arg::new("app-name")
                .long("app-name")
                .help("Application name registered in the directory")
                .env("PORTERO_APP_NAME")
                .required(true),
        )
        .arg(
            Arg::new("app-password")
                .long("app-password")
                .help("Application password registered in the directory")
                .env("PORTERO_APP_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("secure-cookies")
                .long("secure-cookies")
                .help("Always mark the session cookie as Secure")
                .env("PORTERO_SECURE_COOKIES")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("PORTERO_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
