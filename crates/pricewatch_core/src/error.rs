use miette::Diagnostic;
use thiserror::Error;

use crate::id::{ChannelId, GuildId};

#[derive(Error, Diagnostic, Debug)]
pub enum PricewatchError {
    #[error("Price source request failed")]
    #[diagnostic(
        code(pricewatch_core::upstream),
        help("The price API at {endpoint} did not answer successfully; the next tick retries")
    )]
    Upstream {
        endpoint: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid {field}: {reason}")]
    #[diagnostic(code(pricewatch_core::validation))]
    Validation { field: String, reason: String },

    #[error("Channel not found")]
    #[diagnostic(
        code(pricewatch_core::channel_not_found),
        help("Channel {channel_id} no longer exists in guild {guild_id}; remove its mapping")
    )]
    ChannelNotFound {
        guild_id: GuildId,
        channel_id: ChannelId,
    },

    #[error("Missing permission")]
    #[diagnostic(
        code(pricewatch_core::missing_permission),
        help("Grant the bot '{permission}' in guild {guild_id}")
    )]
    MissingPermission {
        permission: String,
        guild_id: GuildId,
    },

    #[error("Failed to persist guild configuration")]
    #[diagnostic(
        code(pricewatch_core::persistence),
        help("Check that {location} is writable; in-memory changes are kept until restart")
    )]
    Persistence {
        location: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Chat platform request failed")]
    #[diagnostic(
        code(pricewatch_core::platform),
        help("The platform rejected '{operation}'")
    )]
    Platform {
        operation: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Configuration error")]
    #[diagnostic(
        code(pricewatch_core::configuration),
        help("Check {field} in {config_path}: expected {expected}")
    )]
    Configuration {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: ConfigError,
    },
}

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, PricewatchError>;

#[derive(Debug, Error)]
#[error("{0}")]
struct StringError(String);

impl PricewatchError {
    pub fn upstream(
        endpoint: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Upstream {
            endpoint: endpoint.into(),
            cause: Box::new(cause),
        }
    }

    pub fn upstream_msg(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            endpoint: endpoint.into(),
            cause: Box::new(StringError(message.into())),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(
        location: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Persistence {
            location: location.into(),
            cause: Box::new(cause),
        }
    }

    pub fn platform(
        operation: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Platform {
            operation: operation.into(),
            cause: Box::new(cause),
        }
    }

    pub fn platform_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Platform {
            operation: operation.into(),
            cause: Box::new(StringError(message.into())),
        }
    }

    /// Whether the message is safe to show verbatim to the person who issued a command
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
