use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::export::HealthMetrics;
use crate::sampler::error::SamplerError;
use crate::sampler::{Sampler, VmstatSampler};

/// Agent orchestrates the sampler, its cadence, and the exposition server.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            health,
            task: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Configure the sampler and begin sampling.
    pub async fn start(&mut self) -> Result<()> {
        self.health
            .start()
            .await
            .context("starting health metrics server")?;

        let mut sampler = VmstatSampler::from_path(&self.cfg.source_path);
        sampler
            .config(&self.cfg.plugin_options())
            .with_context(|| {
                format!(
                    "configuring sampler for {}",
                    self.cfg.source_path.display()
                )
            })?;

        let schema_len = sampler.schema().map_or(0, |s| s.len());
        self.health.schema_metrics.set(schema_len as f64);

        info!(
            source = %self.cfg.source_path.display(),
            set = %self.cfg.set_name,
            metrics = schema_len,
            interval = ?self.cfg.sample_interval,
            "sampler configured",
        );

        let health = Arc::clone(&self.health);
        let cancel = self.cancel.clone();
        let period = self.cfg.sample_interval;

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("sampling loop stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let _ = run_pass(&mut sampler, &health);
                    }
                }
            }

            sampler.term();
        }));

        Ok(())
    }

    /// Stop sampling, release the metric set, and shut down the server.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            task.await.context("joining sampling task")?;
        }

        self.health.stop().await?;

        Ok(())
    }
}

/// Run one sampling pass and record its outcome in `health`.
pub fn run_pass(sampler: &mut dyn Sampler, health: &HealthMetrics) -> Result<(), SamplerError> {
    let started = Instant::now();
    let result = sampler.sample();
    health
        .sample_duration
        .observe(started.elapsed().as_secs_f64());

    match &result {
        Ok(()) => {
            health.samples.inc();
            if let Some(set) = sampler.get_set() {
                health.mirror_set(&set);
                if let Some(generation) = set.value_of(crate::schema::GENERATION) {
                    health.generation.set(generation as f64);
                }
            }
        }
        Err(e) => {
            health.sample_errors.with_label_values(&[e.kind()]).inc();
            warn!(sampler = sampler.name(), kind = e.kind(), error = %e, "sampling pass failed");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric_set::HeapStorage;
    use crate::sampler::PluginOptions;
    use crate::source::MemorySource;

    #[test]
    fn test_run_pass_success_updates_health() {
        let mut sampler = VmstatSampler::new(MemorySource::new("pgfault 5\n"), HeapStorage);
        sampler
            .config(&PluginOptions::parse("set=node1").unwrap())
            .unwrap();
        let health = HealthMetrics::new(":0").unwrap();

        run_pass(&mut sampler, &health).unwrap();
        run_pass(&mut sampler, &health).unwrap();

        assert_eq!(health.samples.get(), 2.0);
        assert_eq!(health.generation.get(), 2.0);
        assert_eq!(
            health
                .metric_value
                .with_label_values(&["node1", "pgfault"])
                .get(),
            5
        );
    }

    #[test]
    fn test_run_pass_failure_counts_kind() {
        let mut sampler = VmstatSampler::new(MemorySource::new("pgfault 5\n"), HeapStorage);
        let health = HealthMetrics::new(":0").unwrap();

        let err = run_pass(&mut sampler, &health).unwrap_err();
        assert_eq!(err.kind(), "not_configured");
        assert_eq!(
            health
                .sample_errors
                .with_label_values(&["not_configured"])
                .get(),
            1.0
        );
        assert_eq!(health.samples.get(), 0.0);
    }

    #[tokio::test]
    async fn test_agent_start_fails_on_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            source_path: dir.path().join("missing"),
            set_name: "node1".to_string(),
            health: crate::config::HealthConfig {
                addr: "127.0.0.1:0".to_string(),
            },
            ..Default::default()
        };

        let mut agent = Agent::new(cfg).unwrap();
        let err = agent.start().await.unwrap_err();
        assert!(format!("{err:#}").contains("unavailable"));
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_agent_samples_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vmstat");
        std::fs::write(&path, "nr_free_pages 10\npgfault 20\n").unwrap();

        let cfg = Config {
            source_path: path,
            set_name: "node1".to_string(),
            sample_interval: std::time::Duration::from_millis(10),
            health: crate::config::HealthConfig {
                addr: "127.0.0.1:0".to_string(),
            },
            ..Default::default()
        };

        let mut agent = Agent::new(cfg).unwrap();
        agent.start().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        agent.stop().await.unwrap();

        assert!(agent.health.samples.get() >= 1.0);
        assert_eq!(agent.health.schema_metrics.get(), 2.0);
        assert_eq!(
            agent
                .health
                .metric_value
                .with_label_values(&["node1", "pgfault"])
                .get(),
            20
        );
    }
}
