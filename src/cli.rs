//! Interface de linha de comando do healdec baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (classify, demo, strategies)
//! e flags globais (--config, --max-retries, --verbose, --log-json).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// healdec: classifica falhas de jobs e executa a estratégia de cura adequada.
#[derive(Debug, Parser)]
#[command(name = "healdec", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./healdec.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Sobrescreve `retry.max_retries` da configuração.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Habilita saída detalhada (logs em nível debug).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emite os logs em JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Classifica uma mensagem de erro e mostra a estratégia recomendada.
    Classify {
        /// Texto do erro que encerrou o job.
        error: String,
    },

    /// Executa cenários de cura com colaboradores em memória.
    Demo {
        /// Cenário a executar.
        #[arg(long, value_enum, default_value_t = Scenario::All)]
        scenario: Scenario,

        /// Semente do gerador de jitter, para execuções reproduzíveis.
        #[arg(long)]
        seed: Option<u64>,

        /// Usa temporizadores reais em vez do relógio virtual.
        #[arg(long, default_value_t = false)]
        real_time: bool,
    },

    /// Lista as estratégias registradas e seus limites.
    Strategies,
}

/// Cenários embutidos do `demo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Timeout de rede: retry com backoff exponencial.
    Transient,
    /// Worker caiu: restart e reatribuição do job.
    Crash,
    /// Worker não responde ao shutdown: kill forçado antes do restart.
    HungWorker,
    /// Dados inválidos: nenhuma estratégia de quarentena registrada.
    DataError,
    /// Job com timeout no worker, curado pelo loop de polling.
    WorkerTimeout,
    /// Todos os cenários em sequência.
    All,
}

impl Scenario {
    pub const RUNNABLE: [Scenario; 5] = [
        Scenario::Transient,
        Scenario::Crash,
        Scenario::HungWorker,
        Scenario::DataError,
        Scenario::WorkerTimeout,
    ];

    /// Cenários concretos que `self` representa.
    pub fn expand(self) -> Vec<Scenario> {
        match self {
            Scenario::All => Self::RUNNABLE.to_vec(),
            other => vec![other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_classify_subcommand() {
        let cli = Cli::parse_from(["healdec", "classify", "ETIMEDOUT while fetching"]);
        match cli.command {
            Command::Classify { error } => {
                assert_eq!(error, "ETIMEDOUT while fetching");
            }
            _ => panic!("expected Classify command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "healdec",
            "--config",
            "/etc/healdec.toml",
            "--max-retries",
            "5",
            "--verbose",
            "strategies",
        ]);
        assert!(cli.verbose);
        assert!(!cli.log_json);
        assert_eq!(cli.max_retries, Some(5));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/healdec.toml")));
        assert!(matches!(cli.command, Command::Strategies));
    }

    #[test]
    fn cli_parses_demo_options() {
        let cli = Cli::parse_from([
            "healdec",
            "demo",
            "--scenario",
            "hung-worker",
            "--seed",
            "42",
        ]);
        match cli.command {
            Command::Demo {
                scenario,
                seed,
                real_time,
            } => {
                assert_eq!(scenario, Scenario::HungWorker);
                assert_eq!(seed, Some(42));
                assert!(!real_time);
            }
            _ => panic!("expected Demo command"),
        }
    }

    #[test]
    fn demo_defaults_to_all_scenarios() {
        let cli = Cli::parse_from(["healdec", "demo"]);
        match cli.command {
            Command::Demo { scenario, .. } => {
                assert_eq!(scenario.expand(), Scenario::RUNNABLE.to_vec());
            }
            _ => panic!("expected Demo command"),
        }
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
