//! Fan-out/fan-in over a [`ProviderSet`].
//!
//! Every provider call runs as its own task and reports into a channel private
//! to one aggregation. Outcomes are consumed in arrival order: the first
//! failure becomes the verdict, otherwise the verdict is the mean of all
//! readings. Tasks still in flight when the verdict is reached are aborted.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::mpsc,
    task::{self, JoinSet},
};
use tracing::{debug, instrument, warn};

use crate::{
    AggregateError, ProviderError, ProviderSet, WeatherProvider,
    model::{Reading, Report},
};

/// Combine every provider's reading for `city` into their mean.
///
/// Fails with the first provider error observed, or with
/// [`AggregateError::Configuration`] when the set is empty.
pub async fn combine(providers: &ProviderSet, city: &str) -> Result<f64, AggregateError> {
    Aggregator::new(providers.clone()).temperature(city).await
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    providers: ProviderSet,
    call_timeout: Option<Duration>,
}

impl Aggregator {
    pub fn new(providers: ProviderSet) -> Self {
        Self { providers, call_timeout: None }
    }

    /// Bound each provider call; an overrun fails with [`ProviderError::Timeout`].
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub async fn temperature(&self, city: &str) -> Result<f64, AggregateError> {
        let readings = self.collect(city).await?;
        Ok(mean(&readings))
    }

    /// Like [`Aggregator::temperature`], keeping the per-provider readings.
    pub async fn report(&self, city: &str) -> Result<Report, AggregateError> {
        let readings = self.collect(city).await?;

        Ok(Report {
            city: city.to_string(),
            celsius: mean(&readings),
            readings,
            observed_at: Utc::now(),
        })
    }

    #[instrument(skip(self), fields(providers = self.providers.len()))]
    async fn collect(&self, city: &str) -> Result<Vec<Reading>, AggregateError> {
        let n = self.providers.len();
        if n == 0 {
            return Err(AggregateError::Configuration);
        }

        let city: Arc<str> = Arc::from(city);
        let (tx, mut rx) = mpsc::channel(n);

        // Dropping the set aborts whatever is still running.
        let mut tasks = JoinSet::new();
        let mut slots: HashMap<task::Id, usize> = HashMap::with_capacity(n);

        for (index, provider) in self.providers.iter().enumerate() {
            let provider = Arc::clone(provider);
            let city = Arc::clone(&city);
            let tx = tx.clone();
            let call_timeout = self.call_timeout;

            let handle = tasks.spawn(async move {
                let outcome = call(provider.as_ref(), &city, call_timeout).await;
                // The receiver is gone once a verdict has been reached.
                let _ = tx.send((index, outcome)).await;
            });
            slots.insert(handle.id(), index);
        }
        drop(tx);

        let mut celsius: Vec<Option<f64>> = vec![None; n];
        let mut received = 0;

        while received < n {
            tokio::select! {
                outcome = rx.recv() => match outcome {
                    Some((index, Ok(value))) => {
                        debug!(provider = self.name_at(index), celsius = value, "reading received");
                        celsius[index] = Some(value);
                        received += 1;
                    }
                    Some((index, Err(source))) => {
                        let provider = self.name_at(index).to_string();
                        warn!(%provider, error = %source, "provider failed, abandoning aggregation");
                        return Err(AggregateError::Provider { provider, source });
                    }
                    None => {
                        // Every sender is gone; the first empty slot is a task
                        // that died before reporting.
                        let index = celsius.iter().position(Option::is_none).unwrap_or_default();
                        return Err(self.task_died(index, "task ended without reporting".into()));
                    }
                },
                // A panicking task never reports, so watch the tasks themselves
                // instead of waiting for every sender to drop.
                Some(joined) = tasks.join_next() => {
                    if let Err(err) = joined {
                        let index = slots.get(&err.id()).copied().unwrap_or_default();
                        return Err(self.task_died(index, err.to_string()));
                    }
                }
            }
        }

        let readings = self
            .providers
            .iter()
            .zip(celsius)
            .filter_map(|(provider, value)| {
                value.map(|celsius| Reading { provider: provider.name().to_string(), celsius })
            })
            .collect();

        Ok(readings)
    }

    fn task_died(&self, index: usize, message: String) -> AggregateError {
        let provider = self.name_at(index).to_string();
        warn!(%provider, %message, "provider task died");
        AggregateError::Task { provider, message }
    }

    fn name_at(&self, index: usize) -> &str {
        self.providers.get(index).map(|p| p.name()).unwrap_or("unknown")
    }
}

async fn call(
    provider: &dyn WeatherProvider,
    city: &str,
    call_timeout: Option<Duration>,
) -> Result<f64, ProviderError> {
    match call_timeout {
        Some(limit) => tokio::time::timeout(limit, provider.temperature(city))
            .await
            .unwrap_or(Err(ProviderError::Timeout(Some(limit)))),
        None => provider.temperature(city).await,
    }
}

fn mean(readings: &[Reading]) -> f64 {
    let sum: f64 = readings.iter().map(|r| r.celsius).sum();
    sum / readings.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{collections::HashMap, sync::Mutex};
    use tokio::sync::oneshot;

    #[derive(Debug)]
    struct Fixed {
        name: &'static str,
        celsius: f64,
        delay: Duration,
    }

    #[async_trait]
    impl WeatherProvider for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn temperature(&self, _city: &str) -> Result<f64, ProviderError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.celsius)
        }
    }

    #[derive(Debug)]
    struct Failing {
        delay: Duration,
    }

    #[async_trait]
    impl WeatherProvider for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn temperature(&self, _city: &str) -> Result<f64, ProviderError> {
            tokio::time::sleep(self.delay).await;
            Err(ProviderError::Transport("connection refused".into()))
        }
    }

    /// Never answers; signals when its in-flight call is dropped.
    #[derive(Debug)]
    struct Hanging {
        dropped: Mutex<Option<oneshot::Sender<()>>>,
    }

    struct DropSignal(Option<oneshot::Sender<()>>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }

    #[async_trait]
    impl WeatherProvider for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn temperature(&self, _city: &str) -> Result<f64, ProviderError> {
            let tx = self.dropped.lock().unwrap().take();
            let _signal = DropSignal(tx);
            std::future::pending::<Result<f64, ProviderError>>().await
        }
    }

    #[derive(Debug)]
    struct PerCity {
        name: &'static str,
        table: HashMap<String, f64>,
    }

    #[async_trait]
    impl WeatherProvider for PerCity {
        fn name(&self) -> &str {
            self.name
        }

        async fn temperature(&self, city: &str) -> Result<f64, ProviderError> {
            tokio::task::yield_now().await;
            self.table
                .get(city)
                .copied()
                .ok_or_else(|| ProviderError::Decode(format!("unknown city {city}")))
        }
    }

    #[derive(Debug)]
    struct Panicking;

    #[async_trait]
    impl WeatherProvider for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn temperature(&self, _city: &str) -> Result<f64, ProviderError> {
            panic!("provider bug");
        }
    }

    fn fixed(name: &'static str, celsius: f64, delay_ms: u64) -> Arc<dyn WeatherProvider> {
        Arc::new(Fixed { name, celsius, delay: Duration::from_millis(delay_ms) })
    }

    fn hanging() -> (Arc<dyn WeatherProvider>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Arc::new(Hanging { dropped: Mutex::new(Some(tx)) }), rx)
    }

    #[tokio::test]
    async fn mean_of_all_readings() {
        let set = ProviderSet::new(vec![fixed("a", 10.0, 0), fixed("b", 20.0, 0)]);

        let celsius = combine(&set, "Berlin").await.unwrap();
        assert_eq!(celsius, 15.0);
    }

    #[tokio::test(start_paused = true)]
    async fn mean_ignores_completion_order() {
        // Slowest first in the set, so arrival order is the reverse of set order.
        let set = ProviderSet::new(vec![
            fixed("a", 30.0, 300),
            fixed("b", 20.0, 200),
            fixed("c", 10.0, 100),
        ]);

        let report = Aggregator::new(set).report("Oslo").await.unwrap();
        assert!((report.celsius - 20.0).abs() < 1e-9);

        let order: Vec<_> = report.readings.iter().map(|r| r.provider.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(report.city, "Oslo");
    }

    #[tokio::test]
    async fn single_provider_value_is_returned_unchanged() {
        let set = ProviderSet::new(vec![fixed("only", -7.25, 0)]);

        assert_eq!(combine(&set, "Nuuk").await.unwrap(), -7.25);
    }

    #[tokio::test]
    async fn empty_set_is_configuration_error() {
        let err = combine(&ProviderSet::empty(), "Paris").await.unwrap_err();
        assert!(matches!(err, AggregateError::Configuration));
    }

    #[tokio::test]
    async fn any_failure_fails_the_aggregation() {
        let set = ProviderSet::new(vec![
            fixed("a", 10.0, 0),
            Arc::new(Failing { delay: Duration::ZERO }),
            fixed("c", 30.0, 0),
        ]);

        let err = combine(&set, "Rome").await.unwrap_err();
        match err {
            AggregateError::Provider { provider, source } => {
                assert_eq!(provider, "failing");
                assert!(matches!(source, ProviderError::Transport(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_returns_without_waiting_and_cancels_the_rest() {
        let (slow, dropped) = hanging();
        let set = ProviderSet::new(vec![slow, Arc::new(Failing { delay: Duration::from_millis(5) })]);

        let verdict = tokio::time::timeout(Duration::from_secs(5), combine(&set, "Lima"))
            .await
            .expect("aggregation must not wait for the hanging provider");
        assert!(matches!(verdict, Err(AggregateError::Provider { .. })));

        tokio::time::timeout(Duration::from_secs(5), dropped)
            .await
            .expect("hanging call should be cancelled")
            .expect("drop signal sent");
    }

    #[tokio::test(start_paused = true)]
    async fn call_timeout_turns_a_hang_into_an_error() {
        let (slow, _dropped) = hanging();
        let set = ProviderSet::new(vec![fixed("a", 1.0, 0), slow]);

        let err = Aggregator::new(set)
            .with_call_timeout(Duration::from_millis(50))
            .temperature("Quito")
            .await
            .unwrap_err();

        assert!(matches!(
            err.provider_error(),
            Some(ProviderError::Timeout(Some(d))) if *d == Duration::from_millis(50)
        ));
    }

    #[tokio::test]
    async fn dropping_the_aggregation_cancels_provider_calls() {
        let (slow, dropped) = hanging();
        let set = ProviderSet::new(vec![slow]);

        let outcome =
            tokio::time::timeout(Duration::from_millis(20), combine(&set, "Cairo")).await;
        assert!(outcome.is_err());

        tokio::time::timeout(Duration::from_secs(5), dropped)
            .await
            .expect("abandoned call should be cancelled")
            .expect("drop signal sent");
    }

    #[tokio::test]
    async fn panicking_provider_is_reported_not_propagated() {
        let set = ProviderSet::new(vec![fixed("a", 5.0, 0), Arc::new(Panicking)]);

        let err = combine(&set, "Bern").await.unwrap_err();
        match err {
            AggregateError::Task { provider, .. } => assert_eq!(provider, "panicking"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_provider_does_not_wait_for_slow_neighbours() {
        let (slow, dropped) = hanging();
        let set = ProviderSet::new(vec![slow, Arc::new(Panicking)]);

        let verdict = tokio::time::timeout(Duration::from_secs(5), combine(&set, "Bern"))
            .await
            .expect("a panic must end the aggregation without a call timeout");
        match verdict {
            Err(AggregateError::Task { provider, message }) => {
                assert_eq!(provider, "panicking");
                assert!(message.contains("panic"));
            }
            other => panic!("unexpected verdict: {other:?}"),
        }

        tokio::time::timeout(Duration::from_secs(5), dropped)
            .await
            .expect("hanging call should be cancelled")
            .expect("drop signal sent");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_aggregations_do_not_mix_cities() {
        let cities: Vec<String> = (0..32).map(|i| format!("city-{i}")).collect();

        let first: HashMap<_, _> =
            cities.iter().enumerate().map(|(i, c)| (c.clone(), i as f64)).collect();
        let second: HashMap<_, _> =
            cities.iter().enumerate().map(|(i, c)| (c.clone(), i as f64 + 10.0)).collect();

        let aggregator = Arc::new(Aggregator::new(ProviderSet::new(vec![
            Arc::new(PerCity { name: "first", table: first }),
            Arc::new(PerCity { name: "second", table: second }),
        ])));

        let mut handles = Vec::new();
        for (i, city) in cities.into_iter().enumerate() {
            let aggregator = Arc::clone(&aggregator);
            handles.push(tokio::spawn(async move {
                let celsius = aggregator.temperature(&city).await.unwrap();
                (i, celsius)
            }));
        }

        for handle in handles {
            let (i, celsius) = handle.await.unwrap();
            assert!((celsius - (i as f64 + 5.0)).abs() < 1e-9, "city-{i} got {celsius}");
        }
    }
}
