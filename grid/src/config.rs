use std::time::Duration;

pub const DEFAULT_POINTS_PER_NODE: usize = 100;
pub const DEFAULT_CORRELATION_TIMEOUT: Duration = Duration::from_millis(4000);

/// Configuration for one grid node.
#[derive(Clone, Debug)]
pub struct GridConfig {
    /// Virtual points each node contributes to the hash ring.
    ///
    /// Every node of a cluster must use the same value, otherwise rings
    /// disagree on ownership.
    pub points_per_node: usize,

    /// How long a correlated request waits for its `Answer`.
    pub correlation_timeout: Duration,

    /// Buffer sends and dispatches while the cluster is unhealthy.
    pub health_buffering: bool,

    /// Health assumed before the membership subsystem reports anything.
    pub initially_healthy: bool,

    /// Capacity of each local queue. `None` means unbounded.
    pub mailbox_capacity: Option<usize>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            points_per_node: DEFAULT_POINTS_PER_NODE,
            correlation_timeout: DEFAULT_CORRELATION_TIMEOUT,
            health_buffering: true,
            initially_healthy: true,
            mailbox_capacity: None,
        }
    }
}

impl GridConfig {
    /// Clamped to at least one point, so a member node always owns keys.
    pub fn with_points_per_node(mut self, points: usize) -> Self {
        self.points_per_node = points.max(1);
        self
    }

    pub fn with_correlation_timeout(mut self, timeout: Duration) -> Self {
        self.correlation_timeout = timeout;
        self
    }

    pub fn with_health_buffering(mut self, enabled: bool) -> Self {
        self.health_buffering = enabled;
        self
    }

    pub fn with_initially_healthy(mut self, healthy: bool) -> Self {
        self.initially_healthy = healthy;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = Some(capacity);
        self
    }

    /// Health a freshly created gate starts with.
    pub(crate) fn starts_open(&self) -> bool {
        !self.health_buffering || self.initially_healthy
    }
}
