//! Цикл мониторинга: опрос `pending` записей с линейным backoff при сбоях.

use crate::error::ProcessorResult;
use crate::pipeline::{ConversationProcessor, ProcessOutcome};
use common::MonitorConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    pub record_pause: Duration,
    pub max_backoff: Duration,
    pub max_consecutive_errors: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            check_interval: config.check_interval(),
            record_pause: config.record_pause(),
            max_backoff: config.max_backoff(),
            max_consecutive_errors: config.max_consecutive_errors,
        }
    }
}

/// Почему цикл остановился
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    Cancelled,
    TooManyErrors { errors: u32 },
    /// Проба генерации перед стартом не прошла
    GenerationUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub cycles: u64,
    pub records_processed: u64,
    pub completed: u64,
    pub failed: u64,
    pub cycle_errors: u64,
}

impl MonitorStats {
    fn record(&mut self, outcome: &ProcessOutcome) {
        self.records_processed += 1;
        if outcome.is_completed() {
            self.completed += 1;
        } else if outcome.is_failure() {
            self.failed += 1;
        }
    }
}

/// `min(max_backoff, check_interval * consecutive_errors)`
pub fn backoff_delay(
    check_interval: Duration,
    consecutive_errors: u32,
    max_backoff: Duration,
) -> Duration {
    check_interval
        .checked_mul(consecutive_errors)
        .map_or(max_backoff, |delay| delay.min(max_backoff))
}

/// Сон, прерываемый токеном. `false`, если сон прерван отменой.
async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

pub struct MonitorLoop {
    processor: ConversationProcessor,
    settings: MonitorSettings,
}

impl MonitorLoop {
    pub fn new(processor: ConversationProcessor, settings: MonitorSettings) -> Self {
        Self {
            processor,
            settings,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Крутить циклы до отмены или до предела подряд идущих ошибок
    pub async fn run(&self, token: CancellationToken) -> (MonitorExit, MonitorStats) {
        let mut stats = MonitorStats::default();

        if !self.processor.generator().check_availability().await {
            error!("Generation service is not available, monitor not started");
            return (MonitorExit::GenerationUnavailable, stats);
        }

        info!(
            check_interval_secs = self.settings.check_interval.as_secs(),
            "Starting conversation monitor"
        );

        let mut consecutive_errors: u32 = 0;

        loop {
            if token.is_cancelled() {
                break;
            }

            stats.cycles += 1;
            match self.run_cycle(&token, &mut stats).await {
                Ok(processed) => {
                    if consecutive_errors > 0 {
                        info!(previous_errors = consecutive_errors, "Monitor recovered");
                    }
                    consecutive_errors = 0;
                    debug!(processed, "Cycle finished");

                    if !sleep_or_cancel(self.settings.check_interval, &token).await {
                        break;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    stats.cycle_errors += 1;
                    error!(
                        error = %e,
                        consecutive_errors,
                        "Monitoring cycle failed"
                    );

                    if consecutive_errors >= self.settings.max_consecutive_errors {
                        error!(
                            errors = consecutive_errors,
                            "Too many consecutive errors, stopping monitor"
                        );
                        return (
                            MonitorExit::TooManyErrors {
                                errors: consecutive_errors,
                            },
                            stats,
                        );
                    }

                    let delay = backoff_delay(
                        self.settings.check_interval,
                        consecutive_errors,
                        self.settings.max_backoff,
                    );
                    warn!(delay_secs = delay.as_secs(), "Backing off before next cycle");

                    if !sleep_or_cancel(delay, &token).await {
                        break;
                    }
                }
            }
        }

        info!("Conversation monitor stopped");
        (MonitorExit::Cancelled, stats)
    }

    /// Один проход: забрать `pending` и обработать по одной.
    /// Ошибки отдельных записей поглощает процессор, наружу идёт только сбой выборки.
    async fn run_cycle(
        &self,
        token: &CancellationToken,
        stats: &mut MonitorStats,
    ) -> ProcessorResult<usize> {
        let pending = self.processor.store().fetch_pending().await?;
        if pending.is_empty() {
            debug!("No pending conversations");
            return Ok(0);
        }

        info!("Found {} pending conversations", pending.len());

        let mut processed = 0;
        for (index, record) in pending.iter().enumerate() {
            if index > 0 && !sleep_or_cancel(self.settings.record_pause, token).await {
                break;
            }

            let outcome = self.processor.process(record).await;
            debug!(conversation_id = %record.id, outcome = outcome.label(), "Record processed");
            stats.record(&outcome);
            processed += 1;
        }

        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_linear_and_capped() {
        let interval = Duration::from_secs(30);
        let cap = Duration::from_secs(60);

        assert_eq!(backoff_delay(interval, 1, cap), Duration::from_secs(30));
        assert_eq!(backoff_delay(interval, 2, cap), Duration::from_secs(60));
        assert_eq!(backoff_delay(interval, 4, cap), Duration::from_secs(60));

        let short = Duration::from_secs(5);
        assert_eq!(backoff_delay(short, 3, cap), Duration::from_secs(15));
        assert_eq!(backoff_delay(short, u32::MAX, cap), cap);
    }

    #[test]
    fn test_settings_from_config() {
        let settings = MonitorSettings::default();
        assert_eq!(settings.check_interval, Duration::from_secs(30));
        assert_eq!(settings.record_pause, Duration::from_secs(2));
        assert_eq!(settings.max_backoff, Duration::from_secs(60));
        assert_eq!(settings.max_consecutive_errors, 5);
    }
}
