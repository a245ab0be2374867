use crate::{Metrics, Persister};
use backer_execution::Store;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info};

/// Background task draining the retry queue on a fixed period.
pub struct Syncer {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Syncer {
    pub fn start(
        store: Arc<Store>,
        persister: Persister,
        metrics: Arc<Metrics>,
        period: Duration,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(?period, "started retry worker");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let drained = store.drain_pending();
                        metrics.drained(&drained);
                        if drained.settled > 0 {
                            persister.trigger();
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!("retry worker stopped");
        });
        Self { stop, handle }
    }

    /// Stop the worker and wait for its current pass to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backer_execution::mocks::{fund, funded_store};
    use backer_types::Points;

    #[tokio::test]
    async fn test_drains_until_stopped() {
        let store = Arc::new(funded_store(&[("a", 0)]));
        store.retry_queue().enqueue(fund(&[("a", 250)]));
        store.retry_queue().enqueue(fund(&[("ghost", 5)]));
        let metrics = Arc::new(Metrics::new());
        let persister = Persister::new(store.clone(), None);

        let syncer = Syncer::start(
            store.clone(),
            persister,
            metrics.clone(),
            Duration::from_millis(5),
        );
        for _ in 0..100 {
            if store.retry_queue().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        syncer.stop().await;

        assert_eq!(store.balance("a").unwrap(), Points::from_cents(250));
        assert_eq!(store.retry_queue().pending(), vec![fund(&[("ghost", 5)])]);
        let text = metrics.encode().unwrap();
        assert!(text.contains("backer_deltas_settled_total 1"));
        assert!(text.contains("backer_pending 1"));
    }
}
