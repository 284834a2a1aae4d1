use thiserror::Error;

#[derive(Debug, Error)]
pub enum VendorError {
    /// The request never produced a usable HTTP response.
    #[error("vendor transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The vendor answered with a non-zero response code.
    #[error("vendor api error {code} (http {status}): {message}")]
    Api {
        code: String,
        message: String,
        status: u16,
    },

    #[error("failed to decode vendor response: {0}")]
    Decode(String),

    #[error("invalid vendor configuration: {0}")]
    Config(String),
}

/// Vendor codes that arrive over HTTP 200 but never succeed on retry.
pub const PERMANENT_CODES: &[&str] = &[
    // signature rejected
    "8521",
    // device not bound to the account
    "1006",
];

impl VendorError {
    /// The request itself is wrong: a 4xx answer or a known permanent vendor code.
    pub fn is_permanent(&self) -> bool {
        match self {
            VendorError::Api { code, status, .. } => {
                (400..500).contains(status) || PERMANENT_CODES.contains(&code.as_str())
            }
            VendorError::Config(_) => true,
            VendorError::Transport(_) | VendorError::Decode(_) => false,
        }
    }

    /// Server-side failures are worth retrying later; client-side ones are not.
    pub fn is_server_class(&self) -> bool {
        !self.is_permanent()
    }
}
