/// Shared error type used across all Mintage crates.
///
/// The `Display` strings of the validation variants are the user-visible
/// `bad request` subreasons; callers render them behind an
/// `error: bad request - ` prefix.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid {0} identifier")]
    InvalidIdentifier(&'static str),

    #[error("unrecognized identifier scheme")]
    UnknownScheme,

    #[error("unrecognized {0} prefix")]
    UnknownPrefix(&'static str),

    #[error("no minter for namespace")]
    MinterUnavailable,

    #[error("identifier already exists")]
    AlreadyExists,

    #[error("no such identifier")]
    NoSuchIdentifier,

    #[error("unauthorized")]
    Unauthorized,

    #[error("use of reserved metadata element name")]
    ReservedName,

    #[error("empty element name")]
    EmptyName,

    #[error("element '{element}': {message}")]
    ElementValidation { element: String, message: String },

    #[error("no such user in co-owner list")]
    UnknownUser,

    /// Other validation failure; the message is the full subreason.
    #[error("{0}")]
    BadRequest(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("XML: {0}")]
    Xml(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is a caller mistake (rendered as `bad request`)
    /// rather than a server-side failure.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Error::InvalidIdentifier(_)
                | Error::UnknownScheme
                | Error::UnknownPrefix(_)
                | Error::MinterUnavailable
                | Error::AlreadyExists
                | Error::NoSuchIdentifier
                | Error::ReservedName
                | Error::EmptyName
                | Error::ElementValidation { .. }
                | Error::UnknownUser
                | Error::BadRequest(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
