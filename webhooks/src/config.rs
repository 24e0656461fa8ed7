//! Per-account webhook configuration (spec 4.6, step 1).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::payload::EventKind;

/// The notification delivery configuration for a single account.
/// Loaded fresh for every `notify` job (spec 4.6: "Load webhook
/// config").
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub enabled: bool,
    pub events: HashSet<EventKind>,
    pub headers: HashMap<String, String>,
    pub include_text: bool,
    pub text_size_cap: usize,
    pub timeout: Duration,
    pub user_agent: String,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            enabled: true,
            events: all_event_kinds(),
            headers: HashMap::new(),
            include_text: false,
            text_size_cap: 0,
            timeout: Duration::from_secs(30),
            user_agent: format!("mailengine/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn builder(url: impl Into<String>) -> WebhookConfigBuilder {
        WebhookConfigBuilder::new(url)
    }

    /// Spec 4.6 step 2: "Skip ... if webhooks are disabled globally, or
    /// if the specific event is not subscribed."
    pub fn should_deliver(&self, event: EventKind) -> bool {
        self.enabled && self.events.contains(&event)
    }
}

fn all_event_kinds() -> HashSet<EventKind> {
    [
        EventKind::MessageNew,
        EventKind::MessageDeleted,
        EventKind::MessageUpdated,
        EventKind::MailboxReset,
        EventKind::MailboxDeleted,
        EventKind::MailboxNew,
        EventKind::AuthenticationError,
        EventKind::ConnectError,
        EventKind::MessageSent,
        EventKind::MessageFailed,
        EventKind::MessageBounce,
        EventKind::Test,
    ]
    .into_iter()
    .collect()
}

/// Builder for [`WebhookConfig`].
#[derive(Debug, Clone)]
pub struct WebhookConfigBuilder {
    config: WebhookConfig,
}

impl WebhookConfigBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            config: WebhookConfig::new(url),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn events(mut self, events: HashSet<EventKind>) -> Self {
        self.config.events = events;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(key.into(), value.into());
        self
    }

    pub fn include_text(mut self, include: bool, size_cap: usize) -> Self {
        self.config.include_text = include;
        self.config.text_size_cap = size_cap;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn build(self) -> WebhookConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_never_delivers() {
        let config = WebhookConfig::builder("https://example.com/hook")
            .enabled(false)
            .build();
        assert!(!config.should_deliver(EventKind::MessageNew));
    }

    #[test]
    fn unsubscribed_event_is_skipped() {
        let mut events = HashSet::new();
        events.insert(EventKind::MessageNew);
        let config = WebhookConfig::builder("https://example.com/hook")
            .events(events)
            .build();
        assert!(config.should_deliver(EventKind::MessageNew));
        assert!(!config.should_deliver(EventKind::MessageDeleted));
    }
}
