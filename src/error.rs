use std::fmt::Display;

use reqwest::StatusCode;

#[derive(Debug)]
pub enum Error {
    Internal(String),
    Reqwest(reqwest::Error),
    RequestReturnedError(StatusCode),
    Io(std::io::Error),
    Json(serde_json::Error),
    UnexpectedHtml(String),
    Postgres(tokio_postgres::Error),
    Pool(deadpool_postgres::PoolError),
    CreatePool(deadpool_postgres::CreatePoolError),
    Migration(refinery::Error),
    WebDriverSession(fantoccini::error::NewSessionError),
    WebDriver(fantoccini::error::CmdError),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
            Self::Reqwest(_) => write!(f, "reqwest error"),
            Self::RequestReturnedError(status) => {
                write!(f, "request returned status '{}'", status)
            }
            Self::Io(_) => write!(f, "io error"),
            Self::Json(_) => write!(f, "json error"),
            Self::UnexpectedHtml(msg) => write!(f, "unexpected html: {}", msg),
            Self::Postgres(_) => write!(f, "postgres error"),
            Self::Pool(_) => write!(f, "connection pool error"),
            Self::CreatePool(_) => write!(f, "failed creating connection pool"),
            Self::Migration(_) => write!(f, "database migration failed"),
            Self::WebDriverSession(_) => write!(f, "failed starting webdriver session"),
            Self::WebDriver(_) => write!(f, "webdriver command failed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Internal(_) | Self::RequestReturnedError(_) | Self::UnexpectedHtml(_) => None,
            Self::Reqwest(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Postgres(err) => Some(err),
            Self::Pool(err) => Some(err),
            Self::CreatePool(err) => Some(err),
            Self::Migration(err) => Some(err),
            Self::WebDriverSession(err) => Some(err),
            Self::WebDriver(err) => Some(err),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Reqwest(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Postgres(err)
    }
}

impl From<deadpool_postgres::PoolError> for Error {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err)
    }
}

impl From<deadpool_postgres::CreatePoolError> for Error {
    fn from(err: deadpool_postgres::CreatePoolError) -> Self {
        Self::CreatePool(err)
    }
}

impl From<refinery::Error> for Error {
    fn from(err: refinery::Error) -> Self {
        Self::Migration(err)
    }
}

impl From<fantoccini::error::NewSessionError> for Error {
    fn from(err: fantoccini::error::NewSessionError) -> Self {
        Self::WebDriverSession(err)
    }
}

impl From<fantoccini::error::CmdError> for Error {
    fn from(err: fantoccini::error::CmdError) -> Self {
        Self::WebDriver(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn display_includes_status() {
        let err = Error::RequestReturnedError(StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "request returned status '404 Not Found'");
    }

    #[test]
    fn io_error_is_exposed_as_source() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.source().is_some());
        assert!(Error::Internal("x".into()).source().is_none());
    }
}
