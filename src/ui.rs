//! Interface de terminal do healdec: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`HealingProgress`] acompanha visualmente
//! um cenário de cura no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::classifier::FailureClassification;
use crate::state_machine::{HealingAttempt, HealingStatus};
use crate::strategy::{RestartConfig, RetryConfig};

/// Indicador visual de progresso para um cenário de cura.
///
/// Exibe um spinner animado enquanto a estratégia executa e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e avisos (amarelo).
pub struct HealingProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl HealingProgress {
    /// Inicia o spinner com o nome do cenário.
    pub fn start(title: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(title.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self::with_bar(pb)
    }

    /// Variante sem desenho no terminal (saída redirecionada, testes).
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(pb: ProgressBar) -> Self {
        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    /// Atualiza a mensagem do spinner.
    pub fn step(&self, message: &str) {
        self.pb.set_message(message.to_string());
    }

    pub fn classification(&self, classification: &FailureClassification) {
        self.pb.println(format!(
            "  {} {} ({:.0}%) -> {}",
            self.yellow.apply_to("?"),
            classification.category,
            classification.confidence * 100.0,
            classification.recommended_strategy
        ));
        self.pb
            .println(format!("    {}", self.dim.apply_to(&classification.reasoning)));
    }

    /// Finaliza o spinner e exibe o resultado da tentativa.
    pub fn complete(&self, attempt: &HealingAttempt) {
        self.pb.finish_and_clear();
        let duration = attempt
            .duration_ms()
            .map(|ms| format!(" in {ms}ms"))
            .unwrap_or_default();
        match attempt.status {
            HealingStatus::Succeeded => println!(
                "  {} {} healed job {}{duration}",
                self.green.apply_to("✓"),
                attempt.strategy,
                attempt.job_id
            ),
            _ => println!(
                "  {} {} did not heal job {}{duration}",
                self.yellow.apply_to("↷"),
                attempt.strategy,
                attempt.job_id
            ),
        }
    }

    /// Finaliza o spinner e exibe uma falha sem tentativa registrada.
    pub fn abandon(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.red.apply_to("✗"));
    }

    /// Imprime a tentativa formatada em JSON.
    pub fn print_attempt(&self, attempt: &HealingAttempt) {
        let style = match attempt.status {
            HealingStatus::Succeeded => &self.green,
            HealingStatus::Failed => &self.red,
            _ => &self.yellow,
        };
        println!("{}", style.apply_to("─── Healing Attempt ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(attempt).unwrap_or_default()
        );
    }
}

/// Imprime a tabela do comando `strategies`.
pub fn print_strategies(retry: &RetryConfig, restart: &RestartConfig) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to("Registered strategies"));
    println!(
        "  retry    max_retries={} base_delay_ms={} max_delay_ms={}",
        retry.max_retries, retry.base_delay_ms, retry.max_delay_ms
    );
    println!(
        "  restart  max_restarts={} restart_cooldown_ms={} graceful_shutdown_timeout_ms={}",
        restart.max_restarts, restart.restart_cooldown_ms, restart.graceful_shutdown_timeout_ms
    );
    println!(
        "{}",
        Style::new()
            .dim()
            .apply_to("  quarantine, rollback, escalate: not built in")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::FailureClassifier;
    use crate::state_machine::{Job, JobKind};

    #[test]
    fn hidden_progress_renders_attempts() {
        let job = Job::new(JobKind::Index, serde_json::json!({})).with_id("job-1");
        let classification = FailureClassifier::classify(&job, "ECONNRESET");
        let mut attempt = HealingAttempt::begin(&job, &classification, chrono::Utc::now());
        attempt
            .finish(HealingStatus::Succeeded, chrono::Utc::now())
            .unwrap();

        let progress = HealingProgress::hidden();
        progress.step("retrying");
        progress.classification(&classification);
        progress.complete(&attempt);
        progress.print_attempt(&attempt);
        HealingProgress::hidden().abandon("nothing recorded");
    }
}
