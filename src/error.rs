use teloxide::RequestError;
use thiserror::Error;

/// Failure of a single Bot API call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The platform answered with an error description.
    #[error("Bot API error: {0}")]
    Api(#[from] teloxide::ApiError),

    /// Flood control: the platform asked us to wait before calling again.
    #[error("rate limited, retry after {seconds}s")]
    RetryAfter { seconds: u64 },

    /// Network, decoding or I/O failure around the call.
    #[error("request failed: {0}")]
    Request(RequestError),

    #[error("file download failed: {0}")]
    Download(#[from] teloxide::DownloadError),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl From<RequestError> for ApiError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::RetryAfter(wait) => ApiError::RetryAfter {
                seconds: wait.duration().as_secs(),
            },
            RequestError::Api(api) => ApiError::Api(api),
            other => ApiError::Request(other),
        }
    }
}

impl ApiError {
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::RetryAfter { seconds } => Some(*seconds),
            _ => None,
        }
    }
}

/// The fault kinds the bot core distinguishes between.
#[derive(Debug, Error)]
pub enum BotError {
    /// No bot token configured, or the platform rejected it. Fatal at startup.
    #[error("Telegram bot credential is missing or invalid (set TELEGRAM_API_KEY)")]
    CredentialMissing,

    /// Fetching inbound events failed.
    #[error("transport fault: {0}")]
    Transport(#[source] ApiError),

    /// An outbound action could not be delivered.
    #[error("failed to deliver {action}: {source}")]
    Delivery {
        action: &'static str,
        #[source]
        source: ApiError,
    },

    /// A dispatched handler returned an error or panicked.
    #[error("handler '{handler}' failed: {reason}")]
    Handler { handler: String, reason: String },

    #[error("command registration throttled, retry after {retry_after}s")]
    RegistrationThrottled { retry_after: u64 },
}

impl BotError {
    pub fn delivery(action: &'static str, source: ApiError) -> Self {
        BotError::Delivery { action, source }
    }

    /// Seconds to wait if this is a rate-limited delivery.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            BotError::Delivery { source, .. } | BotError::Transport(source) => source.retry_after(),
            BotError::RegistrationThrottled { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_only_for_flood_control() {
        let throttled = BotError::delivery("setMyCommands", ApiError::RetryAfter { seconds: 30 });
        assert_eq!(throttled.retry_after(), Some(30));

        let rejected = BotError::delivery(
            "sendMessage",
            ApiError::Api(teloxide::ApiError::Unknown("chat not found".to_string())),
        );
        assert_eq!(rejected.retry_after(), None);
        assert_eq!(BotError::CredentialMissing.retry_after(), None);
    }

    #[test]
    fn test_request_error_mapping() {
        let api: ApiError = RequestError::Api(teloxide::ApiError::InvalidToken).into();
        assert!(matches!(api, ApiError::Api(teloxide::ApiError::InvalidToken)));

        let io: ApiError =
            RequestError::from(std::sync::Arc::new(std::io::Error::other("reset"))).into();
        assert!(matches!(io, ApiError::Request(_)));
        assert_eq!(io.retry_after(), None);
    }

    #[test]
    fn test_delivery_message_names_action() {
        let err = BotError::delivery("sendMessage", ApiError::RetryAfter { seconds: 3 });
        assert_eq!(
            err.to_string(),
            "failed to deliver sendMessage: rate limited, retry after 3s"
        );
    }
}
