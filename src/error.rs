use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable")]
    StorageUnavailable(#[source] BoxError),
    #[error("guild document {guild_id} is corrupt")]
    Corrupt {
        guild_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode guild document {guild_id}")]
    Encode {
        guild_id: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("team catalog unreachable")]
    Unreachable(#[source] BoxError),
    #[error("team catalog is malformed")]
    Malformed(#[source] serde_json::Error),
}

/// Faults that cannot be turned into a reply and are handed back to the caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    BadRequest,
    NotFound,
}

/// A request the user got wrong. Rendered back to them as an ephemeral message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Got no {0}.")]
    MissingParameter(&'static str),
    #[error("Unknown command '/{0}'.")]
    UnknownCommand(String),
    #[error("This command can only be used in a server.")]
    NotInGuild,
    #[error("Guild not registered.")]
    GuildNotRegistered,
    #[error("Channel is not subscribed to that team.")]
    NotSubscribed,
}

impl Rejection {
    pub fn kind(&self) -> RejectionKind {
        match self {
            Self::MissingParameter(_) | Self::UnknownCommand(_) | Self::NotInGuild => {
                RejectionKind::BadRequest
            }
            Self::GuildNotRegistered | Self::NotSubscribed => RejectionKind::NotFound,
        }
    }
}
