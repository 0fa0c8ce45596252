//! Async bridge from a market-data channel into a [`SignalEngine`].

use confluence_core::MarketEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::SharedSignalEngine;

/// Events applied by a feed task, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSummary {
    pub samples: u64,
    pub bars: u64,
    pub depth_snapshots: u64,
    pub resets: u64,
    /// Samples or bars the engine dropped as unusable
    pub rejected: u64,
}

impl FeedSummary {
    /// Total events applied, rejected ones excluded.
    #[must_use]
    pub fn applied(&self) -> u64 {
        self.samples + self.bars + self.depth_snapshots + self.resets
    }
}

/// Spawns a task forwarding every event from `rx` to `engine`.
///
/// The task ends when the channel closes or a `Shutdown` event arrives and
/// returns what it applied. Engine calls are short and never await, so they
/// run inline on the task.
pub fn spawn_feed(
    engine: SharedSignalEngine,
    mut rx: mpsc::Receiver<MarketEvent>,
) -> JoinHandle<FeedSummary> {
    tokio::spawn(async move {
        tracing::info!("market feed started");
        let mut summary = FeedSummary::default();

        while let Some(event) = rx.recv().await {
            tracing::trace!(kind = event.kind(), "market event");
            match event {
                MarketEvent::Sample(sample) => {
                    if engine.add_market_sample(&sample) {
                        summary.samples += 1;
                    } else {
                        summary.rejected += 1;
                    }
                }
                MarketEvent::Bar {
                    bar,
                    volatility_index,
                } => {
                    if engine.add_bar(&bar, volatility_index) {
                        summary.bars += 1;
                    } else {
                        summary.rejected += 1;
                    }
                }
                MarketEvent::Depth(snapshot) => {
                    engine.add_depth_snapshot(&snapshot);
                    summary.depth_snapshots += 1;
                }
                MarketEvent::Reset => {
                    engine.reset();
                    summary.resets += 1;
                }
                MarketEvent::Shutdown => {
                    tracing::info!("market feed shutdown requested");
                    break;
                }
            }
        }

        tracing::info!(
            samples = summary.samples,
            bars = summary.bars,
            depth = summary.depth_snapshots,
            rejected = summary.rejected,
            "market feed stopped"
        );
        summary
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SignalEngine;
    use chrono::{DateTime, Duration, Utc};
    use confluence_core::{DepthSnapshot, EngineConfig, MarketSample, OhlcBar};

    fn ts(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(seconds)
    }

    #[tokio::test]
    async fn forwards_events_until_channel_closes() {
        let engine = SignalEngine::shared(EngineConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel(64);
        let handle = spawn_feed(engine.clone(), rx);

        for i in 0..5 {
            tx.send(MarketEvent::Sample(MarketSample::new(ts(i), 100.0, 1.0, 10.0)))
                .await
                .unwrap();
        }
        tx.send(MarketEvent::Bar {
            bar: OhlcBar::new(ts(5), 100.0, 101.0, 99.0, 100.0, 10.0),
            volatility_index: 18.0,
        })
        .await
        .unwrap();
        tx.send(MarketEvent::Depth(DepthSnapshot::from_pairs(
            ts(6),
            &[(100.0, 5.0)],
            &[(100.25, 5.0)],
        )))
        .await
        .unwrap();
        drop(tx);

        let summary = handle.await.unwrap();
        assert_eq!(summary.samples, 5);
        assert_eq!(summary.bars, 1);
        assert_eq!(summary.depth_snapshots, 1);
        assert_eq!(summary.applied(), 7);
        assert!(engine.latest_book_pressure().is_some());
    }

    #[tokio::test]
    async fn shutdown_stops_the_feed() {
        let engine = SignalEngine::shared(EngineConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_feed(engine.clone(), rx);

        tx.send(MarketEvent::Shutdown).await.unwrap();
        let summary = handle.await.unwrap();
        assert_eq!(summary, FeedSummary::default());

        // Receiver is gone once the task ends
        assert!(tx
            .send(MarketEvent::Sample(MarketSample::new(ts(0), 1.0, 0.0, 0.0)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn counts_rejected_samples_and_resets() {
        let engine = SignalEngine::shared(EngineConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_feed(engine.clone(), rx);

        tx.send(MarketEvent::Sample(MarketSample::new(ts(0), f64::NAN, 0.0, 0.0)))
            .await
            .unwrap();
        tx.send(MarketEvent::Sample(MarketSample::new(ts(1), 100.0, 0.0, 0.0)))
            .await
            .unwrap();
        tx.send(MarketEvent::Reset).await.unwrap();
        drop(tx);

        let summary = handle.await.unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.samples, 1);
        assert_eq!(summary.resets, 1);
        assert_eq!(engine.stats().divergence.samples_ingested, 0);
    }
}
