use std::{sync::Arc, time::Duration};
use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::info;

use crate::{
    message::Message,
    node::{Node, Runner, ShutdownSignal},
    port::{Sink, Source},
};

/// Emits the current time on `tick` once per period while the flow runs.
pub struct TimerNode {
    id: String,
    period: Duration,
    tick: Arc<Source>,
}

impl TimerNode {
    pub fn new(id: impl Into<String>, period: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            period,
            tick: Source::new("tick"),
        })
    }

    pub fn tick(&self) -> Arc<Source> {
        self.tick.clone()
    }
}

impl Node for TimerNode {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn type_name(&self) -> String {
        "TimerNode".to_string()
    }

    fn sinks(&self) -> Vec<Arc<Sink>> {
        vec![]
    }

    fn sources(&self) -> Vec<Arc<Source>> {
        vec![self.tick.clone()]
    }

    fn as_runner(self: Arc<Self>) -> Option<Arc<dyn Runner>> {
        Some(self)
    }
}

#[async_trait]
impl Runner for TimerNode {
    async fn run(&self, shutdown: ShutdownSignal) {
        // tokio intervals reject a zero period
        let period = self.period.max(Duration::from_millis(1));
        // first tick after one full period, not immediately
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick.emit(Message::new(Utc::now().to_rfc3339()));
                }
                _ = shutdown.recv() => {
                    info!(node = %self.id, "timer stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;
    use crate::nodes::DebugNode;
    use tokio::time::{sleep, timeout};

    #[tokio::test]
    async fn test_timer_ticks_until_stopped() {
        let flow = Flow::new();
        let timer = TimerNode::new("t", Duration::from_millis(10));
        let debug = DebugNode::new("d");
        flow.register_node(timer.clone()).unwrap();
        flow.register_node(debug.clone()).unwrap();
        flow.link_node("t", "tick", "d", "sink").unwrap();

        assert_eq!(flow.start().unwrap(), 1);
        timeout(Duration::from_secs(2), async {
            while debug.received().len() < 2 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timer did not tick");

        let aborted = flow.shutdown().await.unwrap();
        assert!(aborted.is_empty());

        let seen = debug.received().len();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(debug.received().len(), seen);
        assert!(debug.received()[0].as_str().is_some());
    }
}
