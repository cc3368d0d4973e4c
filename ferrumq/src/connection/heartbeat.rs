//! Implements the heartbeat ticker for a connection
//!
//! A connection with heartbeat 0 gets [`HeartBeat::never`], which never
//! yields; otherwise the ticker fires once per negotiated period and the
//! engine decides between sending a heartbeat frame and declaring the peer
//! dead.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::time::Interval;

/// A ticker that never fires when heartbeats are disabled
#[derive(Debug)]
pub(crate) struct HeartBeat {
    interval: Option<Interval>,
}

impl HeartBeat {
    /// A ticker that never yields
    pub(crate) fn never() -> Self {
        Self { interval: None }
    }

    /// A ticker yielding once per `period`
    pub(crate) fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        // the first tick of a tokio interval completes immediately; skip it
        // so the first heartbeat goes out one period after the handshake
        interval.reset();
        Self {
            interval: Some(interval),
        }
    }
}

impl Stream for HeartBeat {
    type Item = ();

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().interval {
            Some(interval) => interval.poll_tick(cx).map(|_| Some(())),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn disabled_heartbeat_never_fires() {
        let mut hb = HeartBeat::never();
        tokio::select! {
            _ = hb.next() => panic!("never() must not yield"),
            _ = tokio::time::sleep(Duration::from_secs(300)) => {}
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_fires_once_per_period() {
        let mut hb = HeartBeat::new(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(hb.next().await.is_some());
    }
}
