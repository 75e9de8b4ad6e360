//! Prometheus metrics
//!
//! Thin typed wrappers over the `metrics` facade. Nothing is recorded unless a
//! recorder (the Prometheus exporter) is installed.

use std::time::Duration;

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Events drained by an engine
    EventsProcessed,
    /// Fills applied to a portfolio
    Trades,
    /// Orders refused before execution
    OrdersRejected,
    /// Events dequeued behind the clock
    LateEvents,
    /// Optimizer evaluations finished
    Evaluations,
    /// Optimizer evaluations that failed
    FailedEvaluations,
    /// Data rows skipped by the parser
    RowsSkipped,
    /// Records fetched from a remote source
    RecordsDownloaded,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Throughput of the last run
    EventsPerSecond,
    /// Final equity of the last run
    FinalEquity,
    /// Best fitness seen by the running search
    BestFitness,
}

/// Histogram metric types
#[derive(Debug, Clone, Copy)]
pub enum DurationMetric {
    /// Wall time of one engine run
    Run,
    /// Wall time of one optimizer evaluation
    Evaluation,
    /// Wall time of one data load
    DataLoad,
}

fn counter_name(metric: CounterMetric) -> &'static str {
    match metric {
        CounterMetric::EventsProcessed => "quant_replay_events_processed_total",
        CounterMetric::Trades => "quant_replay_trades_total",
        CounterMetric::OrdersRejected => "quant_replay_orders_rejected_total",
        CounterMetric::LateEvents => "quant_replay_late_events_total",
        CounterMetric::Evaluations => "quant_replay_evaluations_total",
        CounterMetric::FailedEvaluations => "quant_replay_failed_evaluations_total",
        CounterMetric::RowsSkipped => "quant_replay_rows_skipped_total",
        CounterMetric::RecordsDownloaded => "quant_replay_records_downloaded_total",
    }
}

fn gauge_name(metric: GaugeMetric) -> &'static str {
    match metric {
        GaugeMetric::EventsPerSecond => "quant_replay_events_per_second",
        GaugeMetric::FinalEquity => "quant_replay_final_equity",
        GaugeMetric::BestFitness => "quant_replay_best_fitness",
    }
}

fn duration_name(metric: DurationMetric) -> &'static str {
    match metric {
        DurationMetric::Run => "quant_replay_run_duration_seconds",
        DurationMetric::Evaluation => "quant_replay_evaluation_duration_seconds",
        DurationMetric::DataLoad => "quant_replay_data_load_duration_seconds",
    }
}

/// Add to a counter
pub fn increment_counter(metric: CounterMetric, value: u64) {
    ::metrics::counter!(counter_name(metric)).increment(value);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    ::metrics::gauge!(gauge_name(metric)).set(value);
}

/// Record a duration in seconds
pub fn record_duration(metric: DurationMetric, duration: Duration) {
    ::metrics::histogram!(duration_name(metric)).record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            counter_name(CounterMetric::EventsProcessed),
            counter_name(CounterMetric::RowsSkipped),
            gauge_name(GaugeMetric::BestFitness),
            duration_name(DurationMetric::Run),
        ] {
            assert!(name.starts_with("quant_replay_"));
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        increment_counter(CounterMetric::Trades, 3);
        set_gauge(GaugeMetric::EventsPerSecond, 1.0);
        record_duration(DurationMetric::Evaluation, Duration::from_millis(5));
    }
}
