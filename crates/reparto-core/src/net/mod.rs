//! Connectivity tracking and degraded-mode detection.
//!
//! The host application tells the monitor when the device goes on- or
//! offline; the sync engine feeds it the outcome of every remote call.
//! A rolling window over those outcomes declares "degraded" when the
//! link is up but unreliable enough that sync should back off.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

/// Observed connectivity state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Reachable and healthy
    Online,
    /// Reachable, but the recent failure ratio warrants backing off
    Degraded,
    /// Not reachable; sync runs are not started
    Offline,
}

impl Connectivity {
    /// Lowercase label for display
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the rolling outcome window
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// How many recent call outcomes to keep
    pub window_size: usize,
    /// Failure ratio at or above which the link counts as degraded
    pub degraded_threshold: f64,
    /// Outcomes required before the ratio is trusted
    pub min_samples: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            degraded_threshold: 0.5,
            min_samples: 5,
        }
    }
}

/// Tracks online/offline plus a rolling window of remote-call outcomes
pub struct ConnectivityMonitor {
    online: bool,
    config: MonitorConfig,
    window: VecDeque<bool>,
}

impl ConnectivityMonitor {
    /// Create a monitor; the device is assumed online until told otherwise
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            online: true,
            config,
            window: VecDeque::with_capacity(config.window_size),
        }
    }

    /// Record an explicit connectivity transition; returns whether the
    /// flag changed. The outcome window resets on every transition so a
    /// flaky stretch before going offline does not linger as "degraded"
    /// once the link comes back.
    pub fn set_online(&mut self, online: bool) -> bool {
        if self.online == online {
            return false;
        }
        self.online = online;
        self.window.clear();
        true
    }

    /// Record the outcome of one remote call (`true` = transport success)
    pub fn record_outcome(&mut self, success: bool) {
        if self.window.len() == self.config.window_size {
            self.window.pop_front();
        }
        self.window.push_back(success);
    }

    /// Failures over window size; `0.0` until `min_samples` outcomes exist
    #[must_use]
    pub fn failure_ratio(&self) -> f64 {
        if self.window.len() < self.config.min_samples {
            return 0.0;
        }
        let failures = self.window.iter().filter(|success| !**success).count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = failures as f64 / self.window.len() as f64;
        ratio
    }

    /// Current state, combining the explicit flag and the rolling window
    #[must_use]
    pub fn state(&self) -> Connectivity {
        if !self.online {
            return Connectivity::Offline;
        }
        if self.failure_ratio() >= self.config.degraded_threshold {
            Connectivity::Degraded
        } else {
            Connectivity::Online
        }
    }

    /// Whether the explicit online flag is set
    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.online
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
