//! Configuração do healdec carregada a partir de `healdec.toml`.
//!
//! A struct [`HealdecConfig`] reúne os parâmetros das estratégias e dos workers.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `HEALDEC_LOG` tem precedência sobre `log_level`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::HealdecError;
use crate::state_machine::JobKind;
use crate::strategy::{RestartConfig, RetryConfig};

pub const DEFAULT_CONFIG_FILE: &str = "healdec.toml";
pub const LOG_ENV_VAR: &str = "HEALDEC_LOG";

/// Configuração de nível superior carregada de `healdec.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealdecConfig {
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub restart: RestartConfig,

    /// Configuração por tipo de job, indexada pelo nome do tipo (`index`, `sync`, ...).
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerConfig>,

    /// Filtro de log no formato do `EnvFilter` (`info`, `healdec=debug`, ...).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HealdecConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            restart: RestartConfig::default(),
            workers: BTreeMap::new(),
            log_level: default_log_level(),
        }
    }
}

impl HealdecConfig {
    /// Carrega a configuração de `path` (ou `healdec.toml` no diretório atual).
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self, HealdecError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let config = Self::load_file(path)?;
        Ok(config.with_log_override(std::env::var(LOG_ENV_VAR).ok()))
    }

    /// Lê e valida um arquivo, sem consultar o ambiente.
    pub fn load_file(path: &Path) -> Result<Self, HealdecError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, HealdecError> {
        let config: HealdecConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    // Variável de ambiente tem precedência sobre o arquivo quando não vazia.
    pub fn with_log_override(mut self, value: Option<String>) -> Self {
        if let Some(level) = value
            && !level.trim().is_empty()
        {
            self.log_level = level;
        }
        self
    }

    /// Configuração do worker para `kind`, ou os defaults se não houver seção.
    pub fn worker(&self, kind: JobKind) -> WorkerConfig {
        self.workers.get(kind.as_str()).cloned().unwrap_or_default()
    }

    fn validate(&self) -> Result<(), HealdecError> {
        for (name, worker) in &self.workers {
            name.parse::<JobKind>().map_err(HealdecError::Config)?;
            if worker.concurrency == 0 {
                return Err(HealdecError::Config(format!(
                    "workers.{name}.concurrency must be at least 1"
                )));
            }
            if worker.timeout_ms == 0 {
                return Err(HealdecError::Config(format!(
                    "workers.{name}.timeout_ms must be greater than zero"
                )));
            }
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(HealdecError::Config(
                "retry.max_delay_ms must not be lower than retry.base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parâmetros de execução de um worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Intervalo entre polls quando a fila está vazia.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Tempo máximo de execução de um job.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Espera após erros consecutivos de poll; o último valor se repete.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: Vec<u64>,

    /// Quanto `stop` espera pelo job em andamento.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_concurrency() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_retry_backoff_ms() -> Vec<u64> {
    vec![1000, 5000, 15_000]
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl WorkerConfig {
    /// Espera depois do erro de poll número `consecutive_errors` (0-based).
    pub fn poll_backoff_ms(&self, consecutive_errors: usize) -> u64 {
        self.retry_backoff_ms
            .get(consecutive_errors)
            .or(self.retry_backoff_ms.last())
            .copied()
            .unwrap_or(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = HealdecConfig::default();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.restart.max_restarts, 3);
        assert_eq!(config.log_level, "info");
        assert!(config.workers.is_empty());

        let worker = config.worker(JobKind::Index);
        assert_eq!(worker.shutdown_grace_ms, 5000);
        assert_eq!(worker.concurrency, 1);
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            log_level = "debug"

            [retry]
            max_retries = 2

            [workers.sync]
            timeout_ms = 60000
            retry_backoff_ms = [250, 500]
        "#;
        let config = HealdecConfig::parse(toml_str).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.restart, RestartConfig::default());

        let sync = config.worker(JobKind::Sync);
        assert_eq!(sync.timeout_ms, 60_000);
        assert_eq!(sync.retry_backoff_ms, vec![250, 500]);
        assert_eq!(sync.poll_interval_ms, 1000);
        assert_eq!(config.worker(JobKind::Gc), WorkerConfig::default());
    }

    #[test]
    fn unknown_worker_kind_is_rejected() {
        let err = HealdecConfig::parse("[workers.payroll]\ntimeout_ms = 10").unwrap_err();
        assert!(matches!(err, HealdecError::Config(_)));
        assert!(err.to_string().contains("payroll"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = HealdecConfig::parse("[workers.index]\ntimeout_ms = 0").unwrap_err();
        assert!(err.to_string().contains("workers.index.timeout_ms"));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let err = HealdecConfig::parse("retry = 3").unwrap_err();
        assert!(matches!(err, HealdecError::Toml(_)));
    }

    #[test]
    fn load_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[restart]\nrestart_cooldown_ms = 100").unwrap();

        let config = HealdecConfig::load_file(file.path()).unwrap();
        assert_eq!(config.restart.restart_cooldown_ms, 100);
        assert_eq!(config.restart.max_restarts, 3);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HealdecConfig::load_file(&dir.path().join("healdec.toml")).unwrap();
        assert_eq!(config, HealdecConfig::default());
    }

    #[test]
    fn env_override_wins_when_set() {
        let config = HealdecConfig::default().with_log_override(Some("healdec=trace".into()));
        assert_eq!(config.log_level, "healdec=trace");

        let config = HealdecConfig::default().with_log_override(Some("  ".into()));
        assert_eq!(config.log_level, "info");

        let config = HealdecConfig::default().with_log_override(None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn poll_backoff_repeats_last_step() {
        let worker = WorkerConfig {
            retry_backoff_ms: vec![100, 200],
            ..WorkerConfig::default()
        };
        assert_eq!(worker.poll_backoff_ms(0), 100);
        assert_eq!(worker.poll_backoff_ms(1), 200);
        assert_eq!(worker.poll_backoff_ms(7), 200);

        let empty = WorkerConfig {
            retry_backoff_ms: Vec::new(),
            poll_interval_ms: 50,
            ..WorkerConfig::default()
        };
        assert_eq!(empty.poll_backoff_ms(0), 50);
    }
}
