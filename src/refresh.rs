//! The scheduled refresh loop driving fetch → normalize → publish.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::aws::{EventSourceSource, ResourceKind, SubnetSource};
use crate::normalize::{normalize_event_source, normalize_subnet};
use crate::registry::SharedRegistry;

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Observations written into the registry.
    pub published: u64,
    /// Records dropped by normalization errors.
    pub skipped_records: u64,
    /// Resource kinds whose fetch failed outright.
    pub failed_kinds: u64,
}

/// Periodically fetches every resource kind and publishes the results.
///
/// The refresher is the registry's only writer. Resource kinds are processed
/// in sequence and independently: a failure in one kind never aborts the
/// others, and the kind's previously published series stay at their last
/// values until a later cycle succeeds.
pub struct Refresher<S, E> {
    subnets: S,
    event_sources: E,
    registry: SharedRegistry,
    interval: Duration,
}

impl<S: SubnetSource, E: EventSourceSource> Refresher<S, E> {
    pub fn new(
        subnets: S,
        event_sources: E,
        registry: SharedRegistry,
        interval: Duration,
    ) -> Self {
        Self {
            subnets,
            event_sources,
            registry,
            interval,
        }
    }

    /// Run refresh cycles forever.
    ///
    /// The first cycle starts immediately. The interval timer rearms only
    /// after a cycle completes, so consecutive cycle starts are spaced by the
    /// interval plus that cycle's duration and cycles never overlap.
    pub async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "starting refresh loop"
        );

        loop {
            let summary = self.refresh_once().await;
            info!(
                published = summary.published,
                skipped = summary.skipped_records,
                failed_kinds = summary.failed_kinds,
                "gathered metrics from AWS"
            );

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Run one full refresh cycle across all resource kinds.
    pub async fn refresh_once(&self) -> RefreshSummary {
        let mut summary = RefreshSummary::default();

        self.refresh_subnets(&mut summary).await;
        self.refresh_event_sources(&mut summary).await;

        self.registry.note_cycle(
            summary.published,
            summary.skipped_records,
            summary.failed_kinds,
        );
        summary
    }

    async fn refresh_subnets(&self, summary: &mut RefreshSummary) {
        let records = match self.subnets.fetch_subnets().await {
            Ok(records) => records,
            Err(e) => {
                error!(
                    kind = %e.kind,
                    cause = %e.cause,
                    "fetch failed, keeping previously published series"
                );
                summary.failed_kinds += 1;
                return;
            }
        };
        debug!(kind = %ResourceKind::Subnets, count = records.len(), "fetched records");

        for record in &records {
            match normalize_subnet(record) {
                Ok(observations) => {
                    for observation in observations {
                        self.registry.publish(observation);
                        summary.published += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        kind = %ResourceKind::Subnets,
                        subnet = record.subnet_id.as_deref().unwrap_or("<unknown>"),
                        error = %e,
                        "skipping malformed record"
                    );
                    summary.skipped_records += 1;
                }
            }
        }
    }

    async fn refresh_event_sources(&self, summary: &mut RefreshSummary) {
        let records = match self.event_sources.fetch_event_sources().await {
            Ok(records) => records,
            Err(e) => {
                error!(
                    kind = %e.kind,
                    cause = %e.cause,
                    "fetch failed, keeping previously published series"
                );
                summary.failed_kinds += 1;
                return;
            }
        };
        debug!(kind = %ResourceKind::EventSources, count = records.len(), "fetched records");

        for record in &records {
            match normalize_event_source(record) {
                Ok(observation) => {
                    self.registry.publish(observation);
                    summary.published += 1;
                }
                Err(e) => {
                    warn!(
                        kind = %ResourceKind::EventSources,
                        source = record.name.as_deref().unwrap_or("<unknown>"),
                        error = %e,
                        "skipping malformed record"
                    );
                    summary.skipped_records += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::{EventSourceRecord, FetchError, SubnetRecord, Tag};
    use crate::registry::MetricRegistry;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    struct StaticSubnets(Vec<SubnetRecord>);

    impl SubnetSource for StaticSubnets {
        async fn fetch_subnets(&self) -> Result<Vec<SubnetRecord>, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSubnets;

    impl SubnetSource for FailingSubnets {
        async fn fetch_subnets(&self) -> Result<Vec<SubnetRecord>, FetchError> {
            Err(FetchError::new(
                ResourceKind::Subnets,
                "connection refused",
            ))
        }
    }

    struct StaticEventSources(Vec<EventSourceRecord>);

    impl EventSourceSource for StaticEventSources {
        async fn fetch_event_sources(&self) -> Result<Vec<EventSourceRecord>, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct FailingEventSources;

    impl EventSourceSource for FailingEventSources {
        async fn fetch_event_sources(&self) -> Result<Vec<EventSourceRecord>, FetchError> {
            Err(FetchError::new(ResourceKind::EventSources, "access denied"))
        }
    }

    /// Records each cycle start, then takes a fixed amount of (paused) time.
    struct SlowSubnets {
        delay: Duration,
        starts: Arc<Mutex<Vec<Instant>>>,
    }

    impl SubnetSource for SlowSubnets {
        async fn fetch_subnets(&self) -> Result<Vec<SubnetRecord>, FetchError> {
            self.starts.lock().unwrap().push(Instant::now());
            tokio::time::sleep(self.delay).await;
            Ok(vec![])
        }
    }

    fn subnet(id: &str, vpc: &str, cidr: &str, available: i64, tags: Vec<Tag>) -> SubnetRecord {
        SubnetRecord {
            subnet_id: Some(id.to_string()),
            vpc_id: Some(vpc.to_string()),
            cidr_block: Some(cidr.to_string()),
            available_ip_address_count: Some(available),
            tags,
        }
    }

    fn registry() -> SharedRegistry {
        Arc::new(MetricRegistry::for_exporter())
    }

    #[tokio::test]
    async fn test_refresh_publishes_both_kinds() {
        let registry = registry();
        let refresher = Refresher::new(
            StaticSubnets(vec![subnet(
                "subnet-1",
                "vpc-9",
                "10.0.0.0/24",
                250,
                vec![Tag::new("Name", "app")],
            )]),
            StaticEventSources(vec![EventSourceRecord {
                name: Some("aws.partner/example.com/s1".to_string()),
                state: Some("ACTIVE".to_string()),
            }]),
            registry.clone(),
            Duration::from_secs(60),
        );

        let summary = refresher.refresh_once().await;

        assert_eq!(summary.published, 3);
        assert_eq!(summary.skipped_records, 0);
        assert_eq!(summary.failed_kinds, 0);
        assert_eq!(registry.stats().cycles_completed, 1);

        let output = registry.render();
        assert!(output.contains(
            "aws_vpc_subnet_available_ip_address_count{vpc=\"vpc-9\",subnet=\"subnet-1\",name=\"app\"} 250"
        ));
        assert!(output.contains(
            "aws_vpc_subnet_total_ip_address_count{vpc=\"vpc-9\",subnet=\"subnet-1\",name=\"app\"} 256"
        ));
        assert!(output.contains("aws_eventbridge_partner_sources_state=\"ACTIVE\"} 1"));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_isolated_per_kind() {
        let registry = registry();

        // first cycle: both kinds succeed
        let refresher = Refresher::new(
            StaticSubnets(vec![subnet("subnet-1", "vpc-9", "10.0.0.0/24", 250, vec![])]),
            StaticEventSources(vec![EventSourceRecord {
                name: Some("s1".to_string()),
                state: Some("PENDING".to_string()),
            }]),
            registry.clone(),
            Duration::from_secs(60),
        );
        refresher.refresh_once().await;

        // second cycle: event source fetch fails, subnets shrink to 240
        let refresher = Refresher::new(
            StaticSubnets(vec![subnet("subnet-1", "vpc-9", "10.0.0.0/24", 240, vec![])]),
            FailingEventSources,
            registry.clone(),
            Duration::from_secs(60),
        );
        let summary = refresher.refresh_once().await;

        assert_eq!(summary.failed_kinds, 1);
        assert_eq!(summary.published, 2);

        let output = registry.render();
        // subnets updated
        assert!(output.contains(
            "aws_vpc_subnet_available_ip_address_count{vpc=\"vpc-9\",subnet=\"subnet-1\",name=\"subnet-1\"} 240"
        ));
        // event source series stale but present
        assert!(output.contains("aws_eventbridge_partner_sources_state=\"PENDING\"} 1"));
    }

    #[tokio::test]
    async fn test_subnet_failure_does_not_abort_event_sources() {
        let registry = registry();
        let refresher = Refresher::new(
            FailingSubnets,
            StaticEventSources(vec![EventSourceRecord {
                name: Some("s1".to_string()),
                state: Some("ACTIVE".to_string()),
            }]),
            registry.clone(),
            Duration::from_secs(60),
        );

        let summary = refresher.refresh_once().await;

        assert_eq!(summary.failed_kinds, 1);
        assert_eq!(summary.published, 1);
        assert!(
            registry
                .render()
                .contains("aws_eventbridge_partner_sources_state=\"ACTIVE\"} 1")
        );
    }

    #[tokio::test]
    async fn test_malformed_record_skipped_siblings_processed() {
        let registry = registry();
        let refresher = Refresher::new(
            StaticSubnets(vec![
                subnet("subnet-bad", "vpc-9", "not-a-cidr", 5, vec![]),
                subnet("subnet-2", "vpc-9", "10.0.1.0/28", 10, vec![]),
            ]),
            StaticEventSources(vec![]),
            registry.clone(),
            Duration::from_secs(60),
        );

        let summary = refresher.refresh_once().await;

        assert_eq!(summary.skipped_records, 1);
        assert_eq!(summary.published, 2);
        assert!(registry.render().contains(
            "aws_vpc_subnet_total_ip_address_count{vpc=\"vpc-9\",subnet=\"subnet-2\",name=\"subnet-2\"} 16"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_starts_spaced_by_interval_plus_cycle_duration() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let refresher = Refresher::new(
            SlowSubnets {
                delay: Duration::from_secs(5),
                starts: starts.clone(),
            },
            StaticEventSources(vec![]),
            registry(),
            Duration::from_secs(60),
        );

        let handle = tokio::spawn(refresher.run());
        // with a 5s cycle and 60s interval, cycles start at 0s, 65s, 130s
        tokio::time::sleep(Duration::from_secs(140)).await;
        handle.abort();

        let starts = starts.lock().unwrap().clone();
        assert!(starts.len() >= 3, "expected at least 3 cycles, got {}", starts.len());
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap >= Duration::from_secs(65),
                "cycle starts only {:?} apart",
                gap
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_fires_immediately() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let refresher = Refresher::new(
            SlowSubnets {
                delay: Duration::from_secs(1),
                starts: starts.clone(),
            },
            StaticEventSources(vec![]),
            registry(),
            Duration::from_secs(60),
        );

        let begin = Instant::now();
        let handle = tokio::spawn(refresher.run());
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.abort();

        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 1);
        assert!(starts[0] - begin < Duration::from_secs(1));
    }
}
