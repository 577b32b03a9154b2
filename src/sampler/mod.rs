//! Discover-then-resample sampler.
//!
//! A [`VmstatSampler`] owns one line source, one storage backend, and at most
//! one live metric set. Its lifecycle is
//! `Unconfigured -> Ready -> Terminated`: a `config` call carrying a `set`
//! option discovers the source's schema and builds the metric set, every
//! `sample` call re-reads the source and refreshes the set in place, and
//! `term` releases the set for good.
//!
//! In [`SchemaCheck::Positional`] mode the `i`-th line of each pass is written
//! to the `i`-th schema slot without looking at its name. This holds only
//! while the source keeps the line order and count it had at discovery;
//! [`SchemaCheck::Validated`] resolves every line by name instead.
//!
//! A pass first refreshes the housekeeping metrics (pid, component id, tid,
//! generation) and then stages all schema values; they are committed only
//! once the whole pass has parsed, so a failing pass leaves every
//! schema-derived metric at its previous value.
//!
//! The sampler does no locking. Callers must not run `sample` concurrently
//! with itself or with `config`.

pub mod error;
pub mod options;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::metric_set::{HeapStorage, MetricSet, MetricStorage};
use crate::pid;
use crate::schema::{self, Schema};
use crate::source::parse::parse_raw_line;
use crate::source::{FileSource, LineSource};
use crate::table::MetricTable;

use self::error::{FormatDetail, SamplerError};
pub use self::options::{PluginOptions, SchemaCheck};

/// Default plugin name.
pub const SAMPLER_NAME: &str = "vmstat";

/// Plugin interface the hosting collector drives.
pub trait Sampler: Send {
    /// Returns the plugin's name for logging.
    fn name(&self) -> &str;

    /// Apply options; a `set` option triggers discovery and set creation.
    fn config(&mut self, opts: &PluginOptions) -> Result<(), SamplerError>;

    /// Run one sampling pass.
    fn sample(&mut self) -> Result<(), SamplerError>;

    /// The live metric set, if configured.
    fn get_set(&self) -> Option<Arc<MetricSet>>;

    /// Release the metric set. Idempotent.
    fn term(&mut self);
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Unconfigured,
    Ready,
    Terminated,
}

enum State {
    Unconfigured,
    Ready(Box<Ready>),
    Terminated,
}

struct Ready {
    schema: Schema,
    table: MetricTable,
    check: SchemaCheck,
    generation: u64,
    staged: Vec<u64>,
    filled: Vec<bool>,
}

pub struct VmstatSampler<S = FileSource, M = HeapStorage> {
    name: String,
    source: S,
    storage: M,
    component_id: u64,
    schema_check: SchemaCheck,
    state: State,
}

impl VmstatSampler<FileSource, HeapStorage> {
    /// Sampler over a file on disk with process-local storage.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self::new(FileSource::new(path), HeapStorage)
    }
}

impl<S, M> VmstatSampler<S, M>
where
    S: LineSource,
    M: MetricStorage,
{
    pub fn new(source: S, storage: M) -> Self {
        Self {
            name: SAMPLER_NAME.to_string(),
            source,
            storage,
            component_id: 0,
            schema_check: SchemaCheck::default(),
            state: State::Unconfigured,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> SamplerState {
        match self.state {
            State::Unconfigured => SamplerState::Unconfigured,
            State::Ready(_) => SamplerState::Ready,
            State::Terminated => SamplerState::Terminated,
        }
    }

    pub fn component_id(&self) -> u64 {
        self.component_id
    }

    pub fn schema_check(&self) -> SchemaCheck {
        self.schema_check
    }

    pub fn schema(&self) -> Option<&Schema> {
        match &self.state {
            State::Ready(ready) => Some(&ready.schema),
            _ => None,
        }
    }

    pub fn table(&self) -> Option<&MetricTable> {
        match &self.state {
            State::Ready(ready) => Some(&ready.table),
            _ => None,
        }
    }

    /// Sampling passes started since configuration.
    pub fn generation(&self) -> Option<u64> {
        match &self.state {
            State::Ready(ready) => Some(ready.generation),
            _ => None,
        }
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn create_metric_set(&mut self, set_name: &str) -> Result<(), SamplerError> {
        match &self.state {
            State::Ready(ready) => {
                return Err(SamplerError::AlreadyConfigured {
                    set: ready.table.set().name().to_string(),
                })
            }
            State::Terminated => return Err(SamplerError::Terminated),
            State::Unconfigured => {}
        }

        let discovery = schema::discover(&mut self.source, &self.storage)?;

        let set = self
            .storage
            .create_set(set_name, discovery.size)
            .map_err(|source| SamplerError::Allocation { source })?;

        let check = self.schema_check;
        let table = MetricTable::build(
            &discovery.schema,
            set,
            self.component_id,
            check == SchemaCheck::Validated,
        )
        .inspect_err(|e| {
            warn!(set = set_name, error = %e, "metric set released after failed registration");
        })?;

        info!(
            sampler = %self.name,
            set = set_name,
            metrics = table.len(),
            schema_check = %check,
            "metric set created",
        );

        let slots = discovery.schema.len();
        self.state = State::Ready(Box::new(Ready {
            schema: discovery.schema,
            table,
            check,
            generation: 0,
            staged: vec![0; slots],
            filled: vec![false; slots],
        }));

        Ok(())
    }
}

impl<S, M> Sampler for VmstatSampler<S, M>
where
    S: LineSource,
    M: MetricStorage,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&mut self, opts: &PluginOptions) -> Result<(), SamplerError> {
        // Validate everything before applying anything.
        let component_id = opts.component_id()?;
        let schema_check = opts.schema_check()?;

        for key in opts.keys() {
            if !matches!(
                key,
                options::KEY_COMPONENT_ID | options::KEY_SET | options::KEY_SCHEMA_CHECK
            ) {
                debug!(sampler = %self.name, key, "ignoring unknown option");
            }
        }

        if let Some(id) = component_id {
            self.component_id = id;
        }

        if let Some(check) = schema_check {
            if matches!(self.state, State::Ready(_)) && check != self.schema_check {
                warn!(
                    sampler = %self.name,
                    current = %self.schema_check,
                    requested = %check,
                    "schema_check cannot change after the metric set is created",
                );
            } else {
                self.schema_check = check;
            }
        }

        if let Some(set_name) = opts.set_name() {
            self.create_metric_set(set_name)?;
        }

        Ok(())
    }

    fn sample(&mut self) -> Result<(), SamplerError> {
        let ready = match &mut self.state {
            State::Ready(ready) => ready,
            State::Unconfigured => return Err(SamplerError::NotConfigured),
            State::Terminated => return Err(SamplerError::Terminated),
        };

        let table = &ready.table;
        table.write_pid(pid::current_pid());
        table.write_component_id(self.component_id);
        table.write_tid(pid::current_tid());

        ready.generation = ready.generation.saturating_add(1);
        table.write_generation(ready.generation);

        self.source
            .rewind()
            .map_err(|e| SamplerError::source_unavailable(self.source.describe(), e))?;

        match ready.check {
            SchemaCheck::Positional => read_positional(&mut self.source, &mut ready.staged)?,
            SchemaCheck::Validated => read_validated(
                &mut self.source,
                table,
                &mut ready.staged,
                &mut ready.filled,
            )?,
        }

        for (slot, &value) in ready.staged.iter().enumerate() {
            table.write_slot(slot, value);
        }

        debug!(
            sampler = %self.name,
            generation = ready.generation,
            metrics = ready.staged.len(),
            "sample complete",
        );

        Ok(())
    }

    fn get_set(&self) -> Option<Arc<MetricSet>> {
        self.table().map(|t| Arc::clone(t.set()))
    }

    fn term(&mut self) {
        match std::mem::replace(&mut self.state, State::Terminated) {
            State::Ready(ready) => {
                info!(
                    sampler = %self.name,
                    set = ready.table.set().name(),
                    generation = ready.generation,
                    "metric set released",
                );
            }
            State::Unconfigured => {
                self.state = State::Unconfigured;
            }
            State::Terminated => {}
        }
    }
}

/// Stage line `i` into slot `i`.
fn read_positional(source: &mut dyn LineSource, staged: &mut [u64]) -> Result<(), SamplerError> {
    let expected = staged.len();

    for (i, slot) in staged.iter_mut().enumerate() {
        let line = source.next_line().ok_or(SamplerError::FormatMismatch {
            line: i + 1,
            detail: FormatDetail::Truncated { found: i, expected },
        })?;

        let (_, value) = parse_raw_line(line).map_err(|e| SamplerError::FormatMismatch {
            line: i + 1,
            detail: e.into(),
        })?;

        *slot = value;
    }

    Ok(())
}

/// Stage each line into the slot its name resolves to.
fn read_validated(
    source: &mut dyn LineSource,
    table: &MetricTable,
    staged: &mut [u64],
    filled: &mut [bool],
) -> Result<(), SamplerError> {
    let expected = staged.len();
    filled.fill(false);

    for i in 0..expected {
        let line = source.next_line().ok_or(SamplerError::FormatMismatch {
            line: i + 1,
            detail: FormatDetail::Truncated { found: i, expected },
        })?;

        let (name, value) = parse_raw_line(line).map_err(|e| SamplerError::FormatMismatch {
            line: i + 1,
            detail: e.into(),
        })?;

        let slot = table
            .slot_of(name)
            .ok_or_else(|| SamplerError::SchemaMismatch {
                line: i + 1,
                name: name.to_string(),
            })?;

        match (filled.get_mut(slot), staged.get_mut(slot)) {
            (Some(seen), Some(dst)) if !*seen => {
                *seen = true;
                *dst = value;
            }
            _ => {
                return Err(SamplerError::DuplicateMetric {
                    name: name.to_string(),
                    line: i + 1,
                })
            }
        }
    }

    Ok(())
}
