use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::{CadenceMode, Config, PollConfig, QueryWindow, WindowPolicy};
use log::{debug, error, info, warn};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::client::QueryClient;
use crate::enrich::Enricher;
use crate::error::Result;
use crate::sink::{self, OutputSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub window: QueryWindow,
    pub events: usize,
}

/// Fetches, enriches and writes every event in `window`.
/// Returns the number of events written.
pub async fn collect_window(
    client: &QueryClient,
    enricher: &Enricher,
    sink: &mut dyn OutputSink,
    window: &QueryWindow,
) -> Result<usize> {
    let events = client.query_events(window).await?;
    if events.is_empty() {
        info!("No events found for {}, skipping {} write", window, sink.name());
        return Ok(0);
    }

    let enriched = enricher.enrich_all(events);
    sink.write_batch(&enriched)?;
    Ok(enriched.len())
}

/// Drives one query/enrich/write cycle per tick until cancelled.
pub struct Poller {
    client: QueryClient,
    enricher: Enricher,
    sink: Box<dyn OutputSink>,
    interval: Duration,
    max_window: TimeDelta,
    policy: WindowPolicy,
    cadence: CadenceMode,
    last_end: Option<DateTime<Utc>>,
    state: PollState,
}

impl Poller {
    pub fn new(
        client: QueryClient,
        enricher: Enricher,
        sink: Box<dyn OutputSink>,
        config: &PollConfig,
    ) -> Self {
        let max_window = TimeDelta::try_seconds(config.max_window_secs as i64)
            .unwrap_or(TimeDelta::days(1));
        Self {
            client,
            enricher,
            sink,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            max_window,
            policy: config.window,
            cadence: config.cadence,
            last_end: None,
            state: PollState::Idle,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = QueryClient::new(&config.api)?;
        let enricher = Enricher::new(config.api.host_name(), &config.enrich.link_rewrites);
        let sink = sink::from_config(&config.output)?;
        Ok(Self::new(client, enricher, sink, &config.poll))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// End of the last window that was fetched and written successfully.
    pub fn last_end(&self) -> Option<DateTime<Utc>> {
        self.last_end
    }

    fn lookback(&self) -> TimeDelta {
        TimeDelta::from_std(self.interval).unwrap_or(TimeDelta::minutes(5))
    }

    pub fn next_window(&self, now: DateTime<Utc>) -> QueryWindow {
        let lookback = QueryWindow::ending_at(now, self.lookback());

        match (self.policy, self.last_end) {
            (WindowPolicy::Contiguous, Some(start)) => {
                let window = QueryWindow::new(start, lookback.end);
                if window.length() > self.max_window {
                    warn!(
                        "Catch-up window {} exceeds {}s, clamping",
                        window,
                        self.max_window.num_seconds()
                    );
                    QueryWindow::ending_at(lookback.end, self.max_window)
                } else {
                    window
                }
            }
            _ => lookback,
        }
    }

    /// Runs one cycle as if the clock read `now`. Failures are logged and
    /// returned; the window cursor only advances on success.
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        let window = self.next_window(now);
        if window.start >= window.end {
            debug!("Window {} is empty, nothing to query", window);
            return Ok(CycleReport { window, events: 0 });
        }

        info!("Querying events for {}", window);
        self.state = PollState::Fetching;
        let result = collect_window(&self.client, &self.enricher, self.sink.as_mut(), &window).await;
        self.state = PollState::Idle;

        match result {
            Ok(events) => {
                self.last_end = Some(window.end);
                info!("Cycle for {} complete: {} events", window, events);
                Ok(CycleReport { window, events })
            }
            Err(e) => {
                error!("Cycle for {} failed ({}): {}", window, e.kind(), e);
                Err(e)
            }
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Polls until `shutdown` fires. Cancellation is only observed between
    /// cycles, so a batch being written always completes.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            "Polling every {}s ({:?} windows, {:?} cadence)",
            self.interval.as_secs_f64(),
            self.policy,
            self.cadence
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.cadence == CadenceMode::Aligned {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
            }

            // Errors are already logged; the next tick is the retry.
            let _ = self.run_cycle().await;

            if self.cadence == CadenceMode::FixedDelay {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(self.interval) => {}
                }
            }
        }

        info!("Poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::TextSink;
    use chrono::TimeZone;
    use common::ApiConfig;

    fn poller(policy: WindowPolicy) -> Poller {
        let api = ApiConfig {
            client_id: "id".to_string(),
            access_key: "key".to_string(),
            host: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let poll = PollConfig {
            interval_secs: 300,
            window: policy,
            max_window_secs: 3600,
            ..Default::default()
        };
        Poller::new(
            QueryClient::new(&api).unwrap(),
            Enricher::new("127.0.0.1:9", &[]),
            Box::new(TextSink::new("unused.txt")),
            &poll,
        )
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn first_window_looks_back_one_interval() {
        let p = poller(WindowPolicy::Contiguous);
        let window = p.next_window(at(0, 5, 0));
        assert_eq!(window, QueryWindow::new(at(0, 0, 0), at(0, 5, 0)));
        assert_eq!(p.state(), PollState::Idle);
    }

    #[test]
    fn contiguous_window_starts_at_last_end() {
        let mut p = poller(WindowPolicy::Contiguous);
        p.last_end = Some(at(0, 5, 0));
        // The previous cycle overran; the next window still starts where it ended.
        let window = p.next_window(at(0, 11, 30));
        assert_eq!(window, QueryWindow::new(at(0, 5, 0), at(0, 11, 30)));
    }

    #[test]
    fn lookback_ignores_last_end() {
        let mut p = poller(WindowPolicy::Lookback);
        p.last_end = Some(at(0, 5, 0));
        let window = p.next_window(at(0, 11, 30));
        assert_eq!(window, QueryWindow::new(at(0, 6, 30), at(0, 11, 30)));
    }

    #[test]
    fn long_gap_is_clamped_to_max_window() {
        let mut p = poller(WindowPolicy::Contiguous);
        p.last_end = Some(at(0, 0, 0));
        let window = p.next_window(at(5, 0, 0));
        assert_eq!(window, QueryWindow::new(at(4, 0, 0), at(5, 0, 0)));
    }

    #[tokio::test]
    async fn failed_cycle_keeps_cursor() {
        // Nothing listens on port 9, so the token exchange fails.
        let mut p = poller(WindowPolicy::Contiguous);
        p.last_end = Some(at(0, 5, 0));

        let err = p.run_cycle_at(at(0, 10, 0)).await.unwrap_err();
        assert_eq!(err.kind(), "auth");
        assert_eq!(p.last_end(), Some(at(0, 5, 0)));
        assert_eq!(p.state(), PollState::Idle);
    }

    #[tokio::test]
    async fn clock_behind_cursor_skips_cycle() {
        let mut p = poller(WindowPolicy::Contiguous);
        p.last_end = Some(at(0, 10, 0));

        let report = p.run_cycle_at(at(0, 10, 0)).await.unwrap();
        assert_eq!(report.events, 0);
        assert_eq!(p.last_end(), Some(at(0, 10, 0)));
    }
}
