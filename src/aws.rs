//! AWS fetchers and the raw records they return.
//!
//! Each resource kind has one fetcher contract: a single call against the
//! provider API, scoped to the configured region, that exhausts pagination
//! and returns the full result set. Retry policy, if any, belongs to the
//! refresh loop.

use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::error::DisplayErrorContext;
use thiserror::Error;

/// Resource kinds polled by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Subnets,
    EventSources,
}

impl ResourceKind {
    /// String form used in log fields and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Subnets => "subnets",
            ResourceKind::EventSources => "event-sources",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a provider API call fails.
///
/// Fetchers never retry; the next scheduled cycle is the retry mechanism.
#[derive(Debug, Error)]
#[error("failed to fetch {kind}: {cause}")]
pub struct FetchError {
    /// Which resource kind's fetch failed.
    pub kind: ResourceKind,
    /// Transport or authorization failure reported by the SDK.
    pub cause: String,
}

impl FetchError {
    pub fn new(kind: ResourceKind, cause: impl std::fmt::Display) -> Self {
        Self {
            kind,
            cause: cause.to_string(),
        }
    }
}

/// A key/value tag attached to an AWS resource. Either side may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    pub key: Option<String>,
    pub value: Option<String>,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: Some(value.into()),
        }
    }
}

/// One subnet as described by EC2.
///
/// Fields are optional as received from the API; presence is checked once at
/// the normalization boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubnetRecord {
    pub subnet_id: Option<String>,
    pub vpc_id: Option<String>,
    pub cidr_block: Option<String>,
    pub available_ip_address_count: Option<i64>,
    pub tags: Vec<Tag>,
}

/// One EventBridge partner event source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSourceRecord {
    pub name: Option<String>,
    pub state: Option<String>,
}

/// Source of subnet inventory.
#[allow(async_fn_in_trait)]
pub trait SubnetSource {
    async fn fetch_subnets(&self) -> Result<Vec<SubnetRecord>, FetchError>;
}

/// Source of partner event source inventory.
#[allow(async_fn_in_trait)]
pub trait EventSourceSource {
    async fn fetch_event_sources(&self) -> Result<Vec<EventSourceRecord>, FetchError>;
}

/// AWS SDK clients for every polled resource kind.
///
/// Cheap to clone; all clones share the underlying connection pools.
#[derive(Clone)]
pub struct AwsClients {
    ec2: aws_sdk_ec2::Client,
    events: aws_sdk_eventbridge::Client,
}

impl AwsClients {
    /// Build clients from the shared AWS configuration, scoped to `region`.
    ///
    /// Credentials come from the SDK's default provider chain; no explicit
    /// call timeouts are configured (SDK defaults apply).
    pub async fn connect(region: &str) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .load()
            .await;

        Self {
            ec2: aws_sdk_ec2::Client::new(&shared),
            events: aws_sdk_eventbridge::Client::new(&shared),
        }
    }
}

impl SubnetSource for AwsClients {
    async fn fetch_subnets(&self) -> Result<Vec<SubnetRecord>, FetchError> {
        let mut records = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .ec2
                .describe_subnets()
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| FetchError::new(ResourceKind::Subnets, DisplayErrorContext(e)))?;

            records.extend(page.subnets().iter().map(|subnet| SubnetRecord {
                subnet_id: subnet.subnet_id().map(str::to_owned),
                vpc_id: subnet.vpc_id().map(str::to_owned),
                cidr_block: subnet.cidr_block().map(str::to_owned),
                available_ip_address_count: subnet.available_ip_address_count().map(i64::from),
                tags: subnet
                    .tags()
                    .iter()
                    .map(|tag| Tag {
                        key: tag.key().map(str::to_owned),
                        value: tag.value().map(str::to_owned),
                    })
                    .collect(),
            }));

            next_token = page.next_token().map(str::to_owned);
            if next_token.is_none() {
                break;
            }
        }

        Ok(records)
    }
}

impl EventSourceSource for AwsClients {
    async fn fetch_event_sources(&self) -> Result<Vec<EventSourceRecord>, FetchError> {
        let mut records = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .events
                .list_event_sources()
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| FetchError::new(ResourceKind::EventSources, DisplayErrorContext(e)))?;

            records.extend(page.event_sources().iter().map(|source| EventSourceRecord {
                name: source.name().map(str::to_owned),
                state: source.state().map(|state| state.as_str().to_owned()),
            }));

            next_token = page.next_token().map(str::to_owned);
            if next_token.is_none() {
                break;
            }
        }

        Ok(records)
    }
}
