//! Pure transforms from raw AWS records into metric observations.
//!
//! Normalizers never touch the network or the registry: each maps one record
//! into zero or more [`Observation`]s, or fails with a [`NormalizeError`]
//! that skips only that record.

use std::collections::HashMap;

use thiserror::Error;

use crate::aws::{EventSourceRecord, SubnetRecord, Tag};
use crate::registry::{PARTNER_SOURCE_STATE, SUBNET_AVAILABLE_IPS, SUBNET_TOTAL_IPS};

/// Errors produced while turning a raw record into observations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("record is missing required field {0}")]
    MissingField(&'static str),

    #[error("unparsable CIDR block {0:?}")]
    UnparsableCidr(String),

    #[error("CIDR prefix length {0} outside [0, 32]")]
    PrefixOutOfRange(u32),

    #[error("unrecognized event source state {0:?}")]
    UnknownState(String),
}

/// State of an EventBridge partner event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Active,
    Pending,
    Deleted,
}

impl SourceState {
    /// String form used on the wire and in the exposition text.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceState::Active => "ACTIVE",
            SourceState::Pending => "PENDING",
            SourceState::Deleted => "DELETED",
        }
    }
}

impl std::str::FromStr for SourceState {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SourceState::Active),
            "PENDING" => Ok(SourceState::Pending),
            "DELETED" => Ok(SourceState::Deleted),
            other => Err(NormalizeError::UnknownState(other.to_string())),
        }
    }
}

/// A single normalized metric observation.
///
/// Label values are in the metric's declared label order. Immutable once
/// produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Gauge {
        metric: &'static str,
        labels: Vec<String>,
        value: f64,
    },
    State {
        metric: &'static str,
        labels: Vec<String>,
        state: SourceState,
    },
}

/// Convert a tag list into a key/value map.
///
/// Entries missing either side are dropped; the last occurrence of a
/// duplicate key wins.
pub fn tags_to_map(tags: &[Tag]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for tag in tags {
        if let (Some(key), Some(value)) = (&tag.key, &tag.value) {
            map.insert(key.clone(), value.clone());
        }
    }
    map
}

/// Parse the network prefix length out of a CIDR-notation block.
///
/// Takes the text after the last `/`, e.g. `"10.0.0.0/24"` → 24.
pub fn cidr_prefix_len(cidr: &str) -> Result<u32, NormalizeError> {
    let suffix = cidr.rsplit('/').next().unwrap_or(cidr);
    suffix
        .parse::<u32>()
        .map_err(|_| NormalizeError::UnparsableCidr(cidr.to_string()))
}

/// Number of addresses in an IPv4 block with the given prefix length.
///
/// `2^(32 - prefix)`; computed in u64 so a `/0` block is exact.
pub fn total_ip_addresses(prefix_len: u32) -> Result<u64, NormalizeError> {
    if prefix_len > 32 {
        return Err(NormalizeError::PrefixOutOfRange(prefix_len));
    }
    Ok(1u64 << (32 - prefix_len))
}

/// Normalize one subnet record into its two gauge observations.
///
/// The `name` label comes from the subnet's `Name` tag when present and
/// falls back to the subnet identifier.
pub fn normalize_subnet(record: &SubnetRecord) -> Result<Vec<Observation>, NormalizeError> {
    let subnet_id = record
        .subnet_id
        .as_deref()
        .ok_or(NormalizeError::MissingField("SubnetId"))?;
    let vpc_id = record
        .vpc_id
        .as_deref()
        .ok_or(NormalizeError::MissingField("VpcId"))?;
    let cidr = record
        .cidr_block
        .as_deref()
        .ok_or(NormalizeError::MissingField("CidrBlock"))?;
    let available = record
        .available_ip_address_count
        .ok_or(NormalizeError::MissingField("AvailableIpAddressCount"))?;

    let prefix_len = cidr_prefix_len(cidr)?;
    let total = total_ip_addresses(prefix_len)?;

    let tags = tags_to_map(&record.tags);
    let name = tags.get("Name").map(String::as_str).unwrap_or(subnet_id);

    // Label order matches the declared label set: vpc, subnet, name.
    let labels = vec![vpc_id.to_string(), subnet_id.to_string(), name.to_string()];

    Ok(vec![
        Observation::Gauge {
            metric: SUBNET_AVAILABLE_IPS,
            labels: labels.clone(),
            value: available as f64,
        },
        Observation::Gauge {
            metric: SUBNET_TOTAL_IPS,
            labels,
            value: total as f64,
        },
    ])
}

/// Normalize one partner event source record into its state observation.
pub fn normalize_event_source(
    record: &EventSourceRecord,
) -> Result<Observation, NormalizeError> {
    let name = record
        .name
        .as_deref()
        .ok_or(NormalizeError::MissingField("Name"))?;
    let state: SourceState = record
        .state
        .as_deref()
        .ok_or(NormalizeError::MissingField("State"))?
        .parse()?;

    Ok(Observation::State {
        metric: PARTNER_SOURCE_STATE,
        labels: vec![name.to_string()],
        state,
    })
}
