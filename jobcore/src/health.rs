use serde::Serialize;

/// Diagnostic view of the job queue depth.
///
/// An unhealthy result never stops the manager from accepting submissions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    pub healthy: bool,
    pub queued: usize,
    pub message: String,
}

impl QueueHealth {
    pub fn check(queued: usize, overflow_threshold: usize) -> Self {
        if queued < overflow_threshold {
            Self {
                healthy: true,
                queued,
                message: format!("Queue contains {} entries", queued),
            }
        } else {
            Self {
                healthy: false,
                queued,
                message: format!(
                    "{} entries in job queue: this exceeds the warning threshold ({})",
                    queued, overflow_threshold
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_below_threshold() {
        let health = QueueHealth::check(3, 10);
        assert!(health.healthy);
        assert_eq!(health.message, "Queue contains 3 entries");
    }

    #[test]
    fn unhealthy_at_threshold() {
        let health = QueueHealth::check(10, 10);
        assert!(!health.healthy);
        assert_eq!(health.queued, 10);
        assert!(health.message.contains("warning threshold (10)"));
    }
}
