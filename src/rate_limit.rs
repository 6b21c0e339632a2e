use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::config::{env_flag, env_parse};
use crate::models::Id;

/// Writes that count against a user's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Message,
    DirectMessage,
}

/// Per-action limits; windows in seconds in the environment.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub message_limit: usize,
    pub message_window: Duration,
    pub dm_limit: usize,
    pub dm_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_flag("RATE_LIMIT_ENABLED"),
            message_limit: env_parse("RL_MESSAGE_LIMIT", 10),
            message_window: Duration::from_secs(env_parse("RL_MESSAGE_WINDOW", 60)),
            dm_limit: env_parse("RL_DM_LIMIT", 20),
            dm_window: Duration::from_secs(env_parse("RL_DM_WINDOW", 60)),
        }
    }

    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::from_env() }
    }

    fn budget(&self, action: Action) -> (usize, Duration) {
        match action {
            Action::Message => (self.message_limit, self.message_window),
            Action::DirectMessage => (self.dm_limit, self.dm_window),
        }
    }
}

/// Timestamps of recent admitted writes, oldest first.
#[derive(Default)]
struct Window(VecDeque<Instant>);

impl Window {
    fn try_admit(&mut self, now: Instant, limit: usize, span: Duration) -> bool {
        while self.0.front().is_some_and(|t| now.duration_since(*t) >= span) {
            self.0.pop_front();
        }
        if self.0.len() >= limit {
            return false;
        }
        self.0.push_back(now);
        true
    }
}

/// Process-local sliding-window limiter keyed by action and user.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<(Action, Id), Window>>,
    cfg: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self { windows: Arc::new(DashMap::new()), cfg }
    }

    /// Record an attempt by `user`; false once the action's budget is spent.
    pub fn allow(&self, action: Action, user: Id) -> bool {
        if !self.cfg.enabled {
            return true;
        }
        let (limit, span) = self.cfg.budget(action);
        let admitted = self.windows.entry((action, user)).or_default().try_admit(Instant::now(), limit, span);
        if !admitted {
            debug!(?action, user, "rate limited");
        }
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(limit: usize, window: Duration) -> RateLimitConfig {
        RateLimitConfig { enabled: true, message_limit: limit, message_window: window, dm_limit: limit, dm_window: window }
    }

    #[test]
    fn window_frees_up_after_span() {
        let mut w = Window::default();
        let start = Instant::now();
        let span = Duration::from_secs(10);
        for _ in 0..3 { assert!(w.try_admit(start, 3, span)); }
        assert!(!w.try_admit(start + Duration::from_secs(5), 3, span));
        assert!(w.try_admit(start + span, 3, span));
    }

    #[test]
    fn limits_are_per_user_and_per_action() {
        let rl = RateLimiter::new(cfg(1, Duration::from_secs(60)));
        assert!(rl.allow(Action::Message, 1));
        assert!(!rl.allow(Action::Message, 1));
        assert!(rl.allow(Action::Message, 2));
        assert!(rl.allow(Action::DirectMessage, 1));
        assert!(!rl.allow(Action::DirectMessage, 1));
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let rl = RateLimiter::new(RateLimitConfig { enabled: false, ..cfg(1, Duration::from_secs(60)) });
        for _ in 0..10 { assert!(rl.allow(Action::Message, 1)); }
    }
}
