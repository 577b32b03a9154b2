//! Schema discovery.
//!
//! One pass over a [`LineSource`] enumerates the metric names it carries, in
//! order, and computes the storage footprint of those metrics plus the four
//! housekeeping metrics every set starts with. Discovery stops at the first
//! line that is not a data line, or at end of input.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::metric_set::{MetricKind, MetricSize, MetricStorage};
use crate::sampler::error::SamplerError;
use crate::source::parse::parse_raw_line;
use crate::source::LineSource;

/// Housekeeping metric carrying the configured component identifier.
pub const COMPONENT_ID: &str = "component_id";
/// Housekeeping metric counting sampling passes.
pub const GENERATION: &str = "counter";
/// Housekeeping metric carrying the sampling process id.
pub const PID: &str = "pid";
/// Housekeeping metric carrying the sampling thread id.
pub const TID: &str = "tid";

/// Housekeeping metrics in registration order. They precede every schema.
pub const HOUSEKEEPING_METRICS: [&str; 4] = [COMPONENT_ID, GENERATION, PID, TID];

pub const HOUSEKEEPING_COUNT: usize = HOUSEKEEPING_METRICS.len();

/// Name and type of one discovered metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: String,
    pub kind: MetricKind,
}

/// Ordered metric descriptors, fixed once discovered.
///
/// Position in the schema is the link between a source line and its slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    metrics: Vec<MetricDescriptor>,
}

impl Schema {
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDescriptor> {
        self.metrics.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|m| m.name.as_str())
    }
}

/// Result of a discovery pass.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub schema: Schema,
    /// Footprint of the schema plus housekeeping metrics.
    pub size: MetricSize,
}

/// Enumerate the schema of `source` and size it with `storage`.
///
/// Duplicate names, including collisions with housekeeping names, are
/// rejected so every metric maps to exactly one slot.
pub fn discover(
    source: &mut dyn LineSource,
    storage: &dyn MetricStorage,
) -> Result<Discovery, SamplerError> {
    source
        .rewind()
        .map_err(|e| SamplerError::source_unavailable(source.describe(), e))?;

    let mut size = MetricSize::default();
    for name in HOUSEKEEPING_METRICS {
        size += size_of(storage, name)?;
    }

    let mut seen: HashSet<String> = HOUSEKEEPING_METRICS.iter().map(|n| n.to_string()).collect();
    let mut metrics = Vec::with_capacity(256);
    let mut line_no = 0usize;

    while let Some(line) = source.next_line() {
        line_no += 1;

        let name = match parse_raw_line(line) {
            Ok((name, _)) => name,
            Err(e) => {
                debug!(line = line_no, error = %e, "discovery stopped at non-data line");
                break;
            }
        };

        if !seen.insert(name.to_string()) {
            return Err(SamplerError::DuplicateMetric {
                name: name.to_string(),
                line: line_no,
            });
        }

        size += size_of(storage, name)?;
        metrics.push(MetricDescriptor {
            name: name.to_string(),
            kind: MetricKind::U64,
        });
    }

    info!(
        source = %source.describe(),
        metrics = metrics.len(),
        meta_size = size.meta,
        data_size = size.data,
        "discovered schema",
    );

    Ok(Discovery {
        schema: Schema { metrics },
        size,
    })
}

fn size_of(storage: &dyn MetricStorage, name: &str) -> Result<MetricSize, SamplerError> {
    storage
        .metric_size(name, MetricKind::U64)
        .map_err(|e| SamplerError::Sizing {
            name: name.to_string(),
            source: e,
        })
}
