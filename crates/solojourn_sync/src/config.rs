//! Configuration for the sync client.

use std::time::Duration;

/// Default event hub URL.
pub const DEFAULT_SOCKET_URL: &str = "wss://api.solojourn.com/socket";

/// Default REST base URL.
pub const DEFAULT_API_URL: &str = "https://api.solojourn.com";

/// Environment variable overriding the event hub URL.
pub const SOCKET_URL_ENV: &str = "SOLOJOURN_SOCKET_URL";

/// Environment variable overriding the REST base URL.
pub const API_URL_ENV: &str = "SOLOJOURN_API_URL";

/// Configuration shared by the socket client and the stores.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Event hub URL.
    pub socket_url: String,
    /// REST base URL.
    pub api_url: String,
    /// ID of the signed-in user, used to recognise the user's own echoes.
    pub user_id: Option<String>,
    /// Reconnection policy.
    pub retry: RetryConfig,
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
    /// Page size for the feed.
    pub feed_page_size: u32,
    /// Page size for message history.
    pub message_page_size: u32,
    /// Page size for notifications.
    pub notification_page_size: u32,
    /// How long a typing indicator survives without a fresh `isTyping:true`.
    pub typing_timeout: Duration,
}

impl ClientConfig {
    /// Creates a configuration for the given endpoints.
    pub fn new(socket_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            socket_url: socket_url.into(),
            api_url: api_url.into(),
            user_id: None,
            retry: RetryConfig::default(),
            connect_timeout: Duration::from_secs(20),
            feed_page_size: 10,
            message_page_size: 50,
            notification_page_size: 20,
            typing_timeout: Duration::from_secs(5),
        }
    }

    /// Creates a configuration from `SOLOJOURN_SOCKET_URL` / `SOLOJOURN_API_URL`,
    /// falling back to the production endpoints.
    pub fn from_env() -> Self {
        let socket_url =
            std::env::var(SOCKET_URL_ENV).unwrap_or_else(|_| DEFAULT_SOCKET_URL.to_string());
        let api_url = std::env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Self::new(socket_url, api_url)
    }

    /// Sets the signed-in user.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the reconnection policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the feed page size.
    pub fn with_feed_page_size(mut self, size: u32) -> Self {
        self.feed_page_size = size;
        self
    }

    /// Sets the message history page size.
    pub fn with_message_page_size(mut self, size: u32) -> Self {
        self.message_page_size = size;
        self
    }

    /// Sets the notification page size.
    pub fn with_notification_page_size(mut self, size: u32) -> Self {
        self.notification_page_size = size;
        self
    }

    /// Sets the typing indicator silence window.
    pub fn with_typing_timeout(mut self, timeout: Duration) -> Self {
        self.typing_timeout = timeout;
        self
    }

    /// Returns true if `user_id` is the signed-in user.
    pub fn is_self(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_URL, DEFAULT_API_URL)
    }
}

/// Configuration for reconnection backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of reconnection attempts after a failure.
    pub max_attempts: u32,
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a configuration with `max_attempts` retries, waiting
    /// `2^n` seconds before retry `n`.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5 * 60),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before retry `attempt` (1-indexed; 0 means the
    /// initial connect, which is not delayed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::random::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new("ws://localhost:3000", "http://localhost:3000/api")
            .with_user_id("u1")
            .with_feed_page_size(25)
            .with_typing_timeout(Duration::from_secs(3));

        assert_eq!(config.socket_url, "ws://localhost:3000");
        assert_eq!(config.api_url, "http://localhost:3000/api");
        assert_eq!(config.feed_page_size, 25);
        assert_eq!(config.message_page_size, 50);
        assert_eq!(config.typing_timeout, Duration::from_secs(3));
        assert!(config.is_self("u1"));
        assert!(!config.is_self("u2"));
    }

    #[test]
    fn default_retry_is_five_attempts() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert!(!config.add_jitter);
    }

    #[test]
    fn retry_delay_is_power_of_two_seconds() {
        let config = RetryConfig::default();

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        for n in 1..=5u32 {
            assert_eq!(config.delay_for_attempt(n), Duration::from_secs(2u64.pow(n)));
        }
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }

    #[test]
    fn retry_jitter_bounds() {
        let config = RetryConfig::default().with_jitter(true);
        let delay = config.delay_for_attempt(1);
        assert!(delay >= Duration::from_secs(2));
        assert!(delay <= Duration::from_millis(2500));
    }
}
