use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    /// Returned by `serve` once shutdown was requested.
    #[error("http: Server closed")]
    ServerClosed,

    #[error("graceful shutdown deadline exceeded")]
    ShutdownDeadline,

    #[error("http server error: {0}")]
    Io(#[from] std::io::Error),
}

impl HttpError {
    pub fn as_label(&self) -> &'static str {
        match self {
            HttpError::ServerClosed => "http_server_closed",
            HttpError::ShutdownDeadline => "http_shutdown_deadline",
            HttpError::Io(_) => "http_io",
        }
    }
}
