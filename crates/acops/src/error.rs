use thiserror::Error;

/// Failure of a call against a cloud provider API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("{code}: {message} (status {status}, request {request_id})")]
    Api {
        status: u16,
        code: String,
        message: String,
        request_id: String,
    },

    /// The request never produced a provider response.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("credentials error: {0}")]
    Credentials(String),

    /// Rejected locally before any call was made.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl CloudError {
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Api {
            status,
            code: code.into(),
            message: message.into(),
            request_id: String::new(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            CloudError::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn is_not_found(&self, not_found_code: &str) -> bool {
        self.code() == Some(not_found_code)
    }

    /// Transport failure caused by the socket being closed underneath the client.
    pub fn is_transient_descriptor(&self) -> bool {
        match self {
            CloudError::Transport(msg) => msg.to_lowercase().contains("bad file descriptor"),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return CloudError::Decode(err.to_string());
        }
        // reqwest hides the io error behind its source chain
        let mut msg = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(s) = source {
            msg.push_str(": ");
            msg.push_str(&s.to_string());
            source = s.source();
        }
        CloudError::Transport(msg)
    }
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;
