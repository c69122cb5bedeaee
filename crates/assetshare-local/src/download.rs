use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// How a waited-on download ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Done,
    Cancelled,
}

/// Outcome of `begin`: either this caller performs the fetch, or it waits on
/// the one already in flight.
pub enum DownloadTicket {
    Go,
    Wait(oneshot::Receiver<DownloadOutcome>),
}

/// Guarantees at most one in-flight download per path. Waiters are notified
/// in enqueue order when the download ends or is cancelled.
pub struct DownloadCoordinator {
    table: Mutex<HashMap<String, Vec<oneshot::Sender<DownloadOutcome>>>>,
}

impl DownloadCoordinator {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the download for `path`, or join the waiter list of the
    /// download already in flight.
    pub fn begin(&self, path: &str) -> DownloadTicket {
        let mut table = self.table.lock().unwrap();
        match table.get_mut(path) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                DownloadTicket::Wait(rx)
            }
            None => {
                table.insert(path.to_string(), Vec::new());
                DownloadTicket::Go
            }
        }
    }

    /// Finish the download for `path` and wake all waiters, FIFO.
    pub fn end(&self, path: &str) {
        let waiters = self.table.lock().unwrap().remove(path);
        for waiter in waiters.into_iter().flatten() {
            let _ = waiter.send(DownloadOutcome::Done);
        }
    }

    /// Abort the download for `path`; waiters observe a cancellation.
    pub fn cancel(&self, path: &str) {
        let waiters = self.table.lock().unwrap().remove(path);
        for waiter in waiters.into_iter().flatten() {
            let _ = waiter.send(DownloadOutcome::Cancelled);
        }
    }

    pub fn is_downloading(&self, path: &str) -> bool {
        self.table.lock().unwrap().contains_key(path)
    }

    /// A receiver to await when a download is in flight, `None` otherwise.
    pub fn wait_if_downloading(&self, path: &str) -> Option<oneshot::Receiver<DownloadOutcome>> {
        let mut table = self.table.lock().unwrap();
        table.get_mut(path).map(|waiters| {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            rx
        })
    }
}

impl Default for DownloadCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight() {
        let coordinator = DownloadCoordinator::new();

        assert!(matches!(coordinator.begin("/f"), DownloadTicket::Go));
        assert!(coordinator.is_downloading("/f"));
        assert!(matches!(coordinator.begin("/f"), DownloadTicket::Wait(_)));

        // a different path is independent
        assert!(matches!(coordinator.begin("/g"), DownloadTicket::Go));
    }

    #[tokio::test]
    async fn test_waiters_notified_on_end() {
        let coordinator = DownloadCoordinator::new();

        assert!(matches!(coordinator.begin("/f"), DownloadTicket::Go));
        let DownloadTicket::Wait(first) = coordinator.begin("/f") else {
            panic!("expected Wait");
        };
        let DownloadTicket::Wait(second) = coordinator.begin("/f") else {
            panic!("expected Wait");
        };

        coordinator.end("/f");

        assert_eq!(first.await.unwrap(), DownloadOutcome::Done);
        assert_eq!(second.await.unwrap(), DownloadOutcome::Done);
        assert!(!coordinator.is_downloading("/f"));
    }

    #[tokio::test]
    async fn test_cancel_delivers_cancellation() {
        let coordinator = DownloadCoordinator::new();

        assert!(matches!(coordinator.begin("/f"), DownloadTicket::Go));
        let rx = coordinator.wait_if_downloading("/f").unwrap();

        coordinator.cancel("/f");
        assert_eq!(rx.await.unwrap(), DownloadOutcome::Cancelled);
    }

    #[test]
    fn test_wait_if_not_downloading() {
        let coordinator = DownloadCoordinator::new();
        assert!(coordinator.wait_if_downloading("/f").is_none());
    }
}
