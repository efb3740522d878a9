//! PID / command name filtering of per-task events.

/// Allow-list of tasks.
///
/// An empty filter accepts every task. Otherwise a task is accepted when its
/// pid is listed, or when its command name contains one of the listed
/// substrings.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    pids: Vec<i32>,
    comms: Vec<String>,
}

impl TaskFilter {
    pub fn new(pids: Vec<i32>, comms: Vec<String>) -> Self {
        Self { pids, comms }
    }

    pub fn pids(&self) -> &[i32] {
        &self.pids
    }

    pub fn comms(&self) -> &[String] {
        &self.comms
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty() && self.comms.is_empty()
    }

    pub fn accept(&self, pid: i32, comm: &str) -> bool {
        if self.is_empty() {
            return true;
        }

        self.pids.contains(&pid) || self.comms.iter().any(|c| comm.contains(c.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::TaskFilter;
    use proptest::prelude::*;

    #[test]
    fn test_empty_filter_accepts_all() {
        let f = TaskFilter::default();

        assert!(f.accept(1, "init"));
        assert!(f.accept(-1, ""));
    }

    #[test]
    fn test_pid_or_comm() {
        let f = TaskFilter::new(vec![42, 42], vec!["worker".into()]);

        assert!(f.accept(42, "bash"));
        assert!(f.accept(7, "kworker/0:1"));
        assert!(!f.accept(7, "bash"));
        // Substring match is case sensitive.
        assert!(!f.accept(7, "Worker"));
    }

    #[test]
    fn test_comm_only() {
        let f = TaskFilter::new(vec![], vec!["rcu".into(), "ksoftirqd".into()]);

        assert!(f.accept(12, "rcu_preempt"));
        assert!(f.accept(13, "ksoftirqd/1"));
        assert!(!f.accept(14, "systemd"));
    }

    proptest! {
        #[test]
        fn prop_accept_matches_definition(
            pids in proptest::collection::vec(0i32..64, 0..4),
            comms in proptest::collection::vec("[a-c]{1,2}", 0..3),
            pid in 0i32..64,
            comm in "[a-c]{0,6}",
        ) {
            let f = TaskFilter::new(pids.clone(), comms.clone());
            let expected = (pids.is_empty() && comms.is_empty())
                || pids.contains(&pid)
                || comms.iter().any(|c| comm.contains(c.as_str()));

            prop_assert_eq!(f.accept(pid, &comm), expected);
        }
    }
}
