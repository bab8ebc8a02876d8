use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum DiscordError {
    #[error("No Discord bot token configured")]
    #[diagnostic(
        code(pricewatch::discord::missing_token),
        help("Set DISCORD_TOKEN or `token` under [discord] in the config file")
    )]
    MissingToken,

    #[error("Discord client failed")]
    #[diagnostic(
        code(pricewatch::discord::client_failed),
        help("Check that the bot token is valid and has not been regenerated ({token_preview})")
    )]
    ClientFailed {
        #[source]
        cause: serenity::Error,
        token_preview: String,
    },

    #[error("Command registration failed")]
    #[diagnostic(
        code(pricewatch::discord::command_registration_failed),
        help("Failed to register slash command '{command_name}'")
    )]
    CommandRegistrationFailed {
        command_name: String,
        #[source]
        cause: serenity::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] pricewatch_core::PricewatchError),
}

pub type Result<T> = std::result::Result<T, DiscordError>;

/// First and last few characters of a token, enough to tell two tokens apart
pub fn token_preview(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 10 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
