//! Server-side error taxonomy: a `thiserror`-derived enum plus a
//! `Result<T>` alias, with each NNTP-code-bearing variant able to render
//! its own wire line.

use thiserror::Error;

/// Errors that can occur while serving an NNTP session.
#[derive(Error, Debug)]
pub enum ServerError {
    /// IO error during network or file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed journal JSON record.
    #[error("journal JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid CIDR literal in a blacklist record.
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    /// A data file read was detected as corrupt.
    #[error("invalid article number")]
    InvalidArticleNumber,

    /// 411: No such newsgroup.
    #[error("411 No such newsgroup")]
    NoSuchGroup,

    /// 412: No newsgroup selected.
    #[error("412 No newsgroup selected")]
    NoGroupSelected,

    /// 420: Current article number is invalid.
    #[error("420 Current article number is invalid")]
    NoCurrentArticle,

    /// 423: No article with that number.
    #[error("423 No article with that number")]
    NoSuchArticleNumber,

    /// 430: No article with that message-id.
    #[error("430 No article with that message-id")]
    NoSuchArticleId,

    /// 435: Article not wanted (IHAVE: already present).
    #[error("435 Article not wanted")]
    ArticleNotWanted,

    /// 437: Article rejected.
    #[error("437 Article rejected: {0}")]
    ArticleRejected(String),

    /// 440: Posting not permitted.
    #[error("440 Posting not permitted")]
    PostingNotPermitted,

    /// 441: Posting failed, with a reason.
    #[error("441 Posting failed: {0}")]
    PostingFailed(String),

    /// 450: Authorization required.
    #[error("450 Authorization required")]
    AuthorizationRequired,

    /// 452: Authorization rejected.
    #[error("452 Authorization rejected")]
    AuthorizationRejected,

    /// 480: Authentication required.
    #[error("480 Authentication required")]
    NotAuthenticated,

    /// A moderator-only action attempted by a non-moderator session.
    #[error("480 Not a moderator")]
    NotModerator,

    /// 500: Unknown command.
    #[error("500 Unknown command")]
    UnknownCommand,

    /// 501: Syntax error.
    #[error("501 Syntax error")]
    SyntaxError,

    /// Connection closed by the peer (EOF).
    #[error("connection closed")]
    ConnectionClosed,

    /// Catch-all for conditions that don't map to an NNTP code and should
    /// terminate the connection.
    #[error("{0}")]
    Other(String),
}

impl ServerError {
    /// The 3-digit NNTP reply code for errors that map to a single response
    /// line rather than terminating the connection.
    pub fn code(&self) -> Option<u16> {
        use ServerError::*;
        match self {
            NoSuchGroup => Some(411),
            NoGroupSelected => Some(412),
            NoCurrentArticle => Some(420),
            NoSuchArticleNumber => Some(423),
            NoSuchArticleId => Some(430),
            ArticleNotWanted => Some(435),
            ArticleRejected(_) => Some(437),
            PostingNotPermitted => Some(440),
            PostingFailed(_) => Some(441),
            AuthorizationRequired => Some(450),
            AuthorizationRejected => Some(452),
            NotAuthenticated | NotModerator => Some(480),
            UnknownCommand => Some(500),
            SyntaxError => Some(501),
            InvalidArticleNumber => Some(423),
            _ => None,
        }
    }

    /// The short message that follows the code on the wire.
    pub fn reply_text(&self) -> String {
        match self {
            ServerError::InvalidArticleNumber => "invalid article number".to_string(),
            other => other
                .to_string()
                .splitn(2, ' ')
                .nth(1)
                .unwrap_or("error")
                .to_string(),
        }
    }
}

/// Result type alias using [`ServerError`].
pub type Result<T> = std::result::Result<T, ServerError>;
