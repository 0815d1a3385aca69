//! Throttled progress reporting.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use sheetkit_log::{sheet_debug, sheet_warn};

use crate::conf::{N_PROGRESS_ERRORS_MAX, SpecPipelineConfig};

/// Receiver of progress percentages in `[0, 100]`.
///
/// May be called from worker threads.
pub trait ProgressSink: Send + Sync {
    /// Deliver one value; `Err` counts toward the failure limit.
    fn emit(&self, value: f64) -> Result<(), String>;
}

/// Adapter turning any `Fn(f64)` closure into a [`ProgressSink`].
pub struct FnProgressSink<F>(pub F);

impl<F> ProgressSink for FnProgressSink<F>
where
    F: Fn(f64) + Send + Sync,
{
    fn emit(&self, value: f64) -> Result<(), String> {
        (self.0)(value);
        Ok(())
    }
}

/// Sink that drops every value.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _value: f64) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StateProgress {
    value_last: Option<f64>,
    instant_last: Option<Instant>,
    cnt_errors_consecutive: u32,
    cnt_delivered: u64,
    if_disabled: bool,
}

/// Rate limiter in front of a [`ProgressSink`].
///
/// A value is delivered when it is the first one, when the interval elapsed
/// and the value grew, when it grew by at least `min_delta`, or when it
/// reaches 100. Delivered values never decrease.
pub struct ProgressThrottler {
    sink: Arc<dyn ProgressSink>,
    n_interval: Duration,
    n_min_delta: f64,
    state: Mutex<StateProgress>,
}

impl ProgressThrottler {
    /// Throttler with explicit thresholds.
    pub fn new(sink: Arc<dyn ProgressSink>, n_interval: Duration, n_min_delta: f64) -> Self {
        Self {
            sink,
            n_interval,
            n_min_delta: n_min_delta.max(0.0),
            state: Mutex::new(StateProgress::default()),
        }
    }

    /// Throttler using the configured interval and delta.
    pub fn from_config(sink: Arc<dyn ProgressSink>, config: &SpecPipelineConfig) -> Self {
        Self::new(
            sink,
            Duration::from_millis(config.n_ms_progress_interval),
            config.n_progress_min_delta,
        )
    }

    /// Throttler that reports nothing.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoProgress), Duration::ZERO, 0.0)
    }

    /// Offer `value`; delivered only if the throttle rules allow it.
    pub fn report(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let value = value.clamp(0.0, 100.0);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.if_disabled {
            return;
        }

        let instant_now = Instant::now();
        let if_deliver = match (state.value_last, state.instant_last) {
            (None, _) | (_, None) => true,
            (Some(value_last), Some(instant_last)) => {
                if value <= value_last {
                    false
                } else {
                    instant_now.duration_since(instant_last) >= self.n_interval
                        || value - value_last >= self.n_min_delta
                        || value >= 100.0
                }
            }
        };
        if if_deliver {
            self.deliver(&mut state, value, instant_now);
        }
    }

    /// Offer the overall value of sub-step `n_idx` of `n_total` at `sub` percent.
    pub fn report_step(&self, n_idx: usize, n_total: usize, sub: f64) {
        self.report(derive_overall_progress(n_idx, n_total, sub));
    }

    /// Force a final 100 unless already delivered or reporting is disabled.
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.if_disabled || state.value_last.is_some_and(|v| v >= 100.0) {
            return;
        }
        self.deliver(&mut state, 100.0, Instant::now());
    }

    /// Number of values handed to the sink successfully.
    pub fn cnt_delivered(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cnt_delivered
    }

    /// Whether repeated sink failures disabled reporting.
    pub fn is_disabled(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .if_disabled
    }

    fn deliver(&self, state: &mut StateProgress, value: f64, instant_now: Instant) {
        state.value_last = Some(value);
        state.instant_last = Some(instant_now);

        let result = catch_unwind(AssertUnwindSafe(|| self.sink.emit(value)));
        let err = match result {
            Ok(Ok(())) => {
                state.cnt_errors_consecutive = 0;
                state.cnt_delivered += 1;
                return;
            }
            Ok(Err(msg)) => msg,
            Err(_) => "progress callback panicked".to_string(),
        };

        state.cnt_errors_consecutive += 1;
        let c_failures = describe_sink_failures(state.cnt_errors_consecutive);
        sheet_debug!("Progress sink failed ({c_failures}): {err}");
        if state.cnt_errors_consecutive > N_PROGRESS_ERRORS_MAX {
            state.if_disabled = true;
            sheet_warn!("Progress reporting disabled after {c_failures}");
        }
    }
}

fn describe_sink_failures(cnt_errors_consecutive: u32) -> String {
    format!("{cnt_errors_consecutive} consecutive errors, limit {N_PROGRESS_ERRORS_MAX}")
}

/// `n_idx / n_total * 100 + sub / n_total`, clamped to `[0, 100]`.
pub fn derive_overall_progress(n_idx: usize, n_total: usize, sub: f64) -> f64 {
    if n_total == 0 {
        return 100.0;
    }
    let n_total = n_total as f64;
    let sub = if sub.is_finite() { sub.clamp(0.0, 100.0) } else { 0.0 };
    (n_idx as f64 / n_total * 100.0 + sub / n_total).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn collecting_sink() -> (Arc<Mutex<Vec<f64>>>, Arc<dyn ProgressSink>) {
        let l_values = Arc::new(Mutex::new(Vec::new()));
        let l_values_sink = l_values.clone();
        let sink = FnProgressSink(move |v| l_values_sink.lock().expect("lock").push(v));
        (l_values, Arc::new(sink))
    }

    #[test]
    fn throttler_drops_most_rapid_reports_and_forces_final() {
        let (l_values, sink) = collecting_sink();
        let throttler = ProgressThrottler::new(sink, Duration::from_millis(100), 5.0);

        for n_idx in 0..1000 {
            throttler.report(n_idx as f64 * 0.0999);
        }
        throttler.finish();

        let l_values = l_values.lock().expect("lock").clone();
        assert!(l_values.len() < 150, "delivered {}", l_values.len());
        assert_eq!(l_values.last().copied(), Some(100.0));
        assert!(l_values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn throttler_ignores_decreasing_values() {
        let (l_values, sink) = collecting_sink();
        let throttler = ProgressThrottler::new(sink, Duration::ZERO, 0.0);
        throttler.report(40.0);
        throttler.report(20.0);
        throttler.report(60.0);
        throttler.finish();
        throttler.finish();
        assert_eq!(*l_values.lock().expect("lock"), vec![40.0, 60.0, 100.0]);
    }

    struct FailingSink {
        cnt_calls: AtomicUsize,
        if_panic: bool,
    }

    impl ProgressSink for FailingSink {
        fn emit(&self, _value: f64) -> Result<(), String> {
            self.cnt_calls.fetch_add(1, Ordering::SeqCst);
            if self.if_panic {
                panic!("callback exploded");
            }
            Err("ui gone".to_string())
        }
    }

    #[test]
    fn throttler_disables_after_consecutive_failures() {
        for if_panic in [false, true] {
            let sink = Arc::new(FailingSink {
                cnt_calls: AtomicUsize::new(0),
                if_panic,
            });
            let throttler = ProgressThrottler::new(sink.clone(), Duration::ZERO, 0.0);
            for n_idx in 0..20 {
                throttler.report(n_idx as f64);
            }
            throttler.finish();
            assert!(throttler.is_disabled());
            assert_eq!(
                sink.cnt_calls.load(Ordering::SeqCst),
                N_PROGRESS_ERRORS_MAX as usize + 1
            );
            assert_eq!(throttler.cnt_delivered(), 0);
        }
        assert_eq!(
            describe_sink_failures(N_PROGRESS_ERRORS_MAX + 1),
            format!(
                "{} consecutive errors, limit {N_PROGRESS_ERRORS_MAX}",
                N_PROGRESS_ERRORS_MAX + 1
            )
        );
    }

    #[test]
    fn derive_overall_progress_weights_sub_steps() {
        assert_eq!(derive_overall_progress(0, 4, 0.0), 0.0);
        assert_eq!(derive_overall_progress(1, 4, 50.0), 37.5);
        assert_eq!(derive_overall_progress(3, 4, 100.0), 100.0);
        assert_eq!(derive_overall_progress(0, 0, 10.0), 100.0);
    }
}
