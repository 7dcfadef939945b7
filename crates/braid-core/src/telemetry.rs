//! Telemetry - queue metrics through the `metrics` facade.
//!
//! # Metrics
//!
//! - `braid_queue_errors{queue, type}`: failures by kind (`store`,
//!   `connection`, `payload`, `overflow`, `circuit`).
//! - `braid_queue_push_duration_seconds{queue}`: time to build and enqueue a task.
//! - `braid_queue_claim_duration_seconds{queue}`: time from `pop` to a claimed task.
//!
//! Nothing is exported until the binary installs a recorder.

use std::time::Duration;

use metrics::{counter, histogram};

pub const ERRORS: &str = "braid_queue_errors";
pub const PUSH_DURATION: &str = "braid_queue_push_duration_seconds";
pub const CLAIM_DURATION: &str = "braid_queue_claim_duration_seconds";

/// Failure kinds used as the `type` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    Store,
    Connection,
    Payload,
    Overflow,
    Circuit,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Store => "store",
            ErrorKind::Connection => "connection",
            ErrorKind::Payload => "payload",
            ErrorKind::Overflow => "overflow",
            ErrorKind::Circuit => "circuit",
        }
    }
}

pub(crate) fn record_error(queue: &str, kind: ErrorKind) {
    counter!(ERRORS, "queue" => queue.to_string(), "type" => kind.as_str()).increment(1);
}

pub(crate) fn record_push(queue: &str, elapsed: Duration) {
    histogram!(PUSH_DURATION, "queue" => queue.to_string()).record(elapsed.as_secs_f64());
}

pub(crate) fn record_claim(queue: &str, elapsed: Duration) {
    histogram!(CLAIM_DURATION, "queue" => queue.to_string()).record(elapsed.as_secs_f64());
}

/// Process-wide recorder that keeps every sample, for assertions in tests.
///
/// Tests share it, so each one filters by its own queue name.
#[cfg(test)]
pub(crate) mod capture {
    use std::sync::{Arc, Mutex, OnceLock, PoisonError};

    use metrics::{
        Counter, CounterFn, Gauge, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
        SharedString, Unit,
    };

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Sample {
        pub name: String,
        pub labels: Vec<(String, String)>,
        pub value: f64,
    }

    impl Sample {
        pub(crate) fn label(&self, key: &str) -> Option<&str> {
            self.labels
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        }
    }

    #[derive(Default)]
    pub(crate) struct Captured {
        samples: Mutex<Vec<Sample>>,
    }

    impl Captured {
        fn push(&self, key: &Key, value: f64) {
            let sample = Sample {
                name: key.name().to_string(),
                labels: key
                    .labels()
                    .map(|l| (l.key().to_string(), l.value().to_string()))
                    .collect(),
                value,
            };
            self.samples
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(sample);
        }

        /// Samples of `name` recorded for `queue`.
        pub(crate) fn samples(&self, name: &str, queue: &str) -> Vec<Sample> {
            self.samples
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|s| s.name == name && s.label("queue") == Some(queue))
                .cloned()
                .collect()
        }

        /// Error count for `queue` with the given `type` label.
        pub(crate) fn errors(&self, queue: &str, kind: &str) -> u64 {
            self.samples(super::ERRORS, queue)
                .iter()
                .filter(|s| s.label("type") == Some(kind))
                .map(|s| s.value as u64)
                .sum()
        }
    }

    struct Handle {
        key: Key,
        sink: Arc<Captured>,
    }

    impl CounterFn for Handle {
        fn increment(&self, value: u64) {
            self.sink.push(&self.key, value as f64);
        }

        fn absolute(&self, value: u64) {
            self.sink.push(&self.key, value as f64);
        }
    }

    impl HistogramFn for Handle {
        fn record(&self, value: f64) {
            self.sink.push(&self.key, value);
        }
    }

    struct CapturingRecorder(Arc<Captured>);

    impl CapturingRecorder {
        fn handle(&self, key: &Key) -> Arc<Handle> {
            Arc::new(Handle {
                key: key.clone(),
                sink: Arc::clone(&self.0),
            })
        }
    }

    impl Recorder for CapturingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            Counter::from_arc(self.handle(key))
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::from_arc(self.handle(key))
        }
    }

    /// Install the capturing recorder (once per test binary) and return its samples.
    pub(crate) fn captured() -> Arc<Captured> {
        static CAPTURED: OnceLock<Arc<Captured>> = OnceLock::new();
        Arc::clone(CAPTURED.get_or_init(|| {
            let captured = Arc::new(Captured::default());
            metrics::set_global_recorder(CapturingRecorder(Arc::clone(&captured)))
                .expect("no other recorder in tests");
            captured
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::capture::captured;
    use super::*;

    #[test]
    fn errors_are_labelled_by_queue_and_type() {
        let captured = captured();

        record_error("telemetry:errors", ErrorKind::Store);
        record_error("telemetry:errors", ErrorKind::Store);
        record_error("telemetry:errors", ErrorKind::Payload);
        record_error("telemetry:elsewhere", ErrorKind::Store);

        assert_eq!(captured.errors("telemetry:errors", "store"), 2);
        assert_eq!(captured.errors("telemetry:errors", "payload"), 1);
        assert_eq!(captured.errors("telemetry:errors", "overflow"), 0);
    }

    #[test]
    fn durations_are_recorded_in_seconds() {
        let captured = captured();

        record_push("telemetry:durations", Duration::from_millis(250));
        record_claim("telemetry:durations", Duration::from_secs(2));

        let pushes = captured.samples(PUSH_DURATION, "telemetry:durations");
        assert_eq!(pushes.len(), 1);
        assert!((pushes[0].value - 0.25).abs() < 1e-9);

        let claims = captured.samples(CLAIM_DURATION, "telemetry:durations");
        assert_eq!(claims.len(), 1);
        assert!((claims[0].value - 2.0).abs() < 1e-9);
    }
}
