use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use taskpad_weather::{
    LookupCoordinator, RetryPolicy, Weather, WeatherError, WeatherProvider, WeatherQuery,
};

struct FakeProvider {
    delay: Duration,
    result: Result<Weather, WeatherError>,
    calls: Arc<AtomicUsize>,
}

impl FakeProvider {
    fn new(delay: Duration, result: Result<Weather, WeatherError>, calls: Arc<AtomicUsize>) -> Self {
        Self {
            delay,
            result,
            calls,
        }
    }
}

impl WeatherProvider for FakeProvider {
    async fn fetch(&self, query: &WeatherQuery) -> Result<Weather, WeatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.result.clone().map(|mut weather| {
            weather.location = query.to_string();
            weather
        })
    }
}

fn sunny() -> Weather {
    Weather {
        location: String::new(),
        temperature: 21.4,
        condition: "Clear".to_string(),
        description: "clear sky".to_string(),
        icon: "01d".to_string(),
    }
}

fn counting_coordinator(
    delay: Duration,
    result: Result<Weather, WeatherError>,
) -> (LookupCoordinator<FakeProvider>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let coord = LookupCoordinator::new(
        FakeProvider::new(delay, result, Arc::clone(&calls)),
        Duration::from_millis(8000),
        RetryPolicy { max_retries: 3 },
    );
    (coord, calls)
}

fn coordinator(delay: Duration, result: Result<Weather, WeatherError>) -> LookupCoordinator<FakeProvider> {
    counting_coordinator(delay, result).0
}

#[tokio::test(start_paused = true)]
async fn successful_lookup_returns_weather() {
    let coord = coordinator(Duration::from_millis(200), Ok(sunny()));
    let weather = coord
        .lookup(WeatherQuery::City("Oslo".to_string()), 0)
        .await
        .expect("weather");
    assert_eq!(weather.location, "Oslo");
    assert_eq!(weather.rounded_temperature(), 21);
    assert!(!coord.in_flight());
}

#[tokio::test(start_paused = true)]
async fn slow_provider_times_out() {
    let coord = coordinator(Duration::from_secs(30), Ok(sunny()));
    let err = coord
        .lookup(WeatherQuery::City("Lima".to_string()), 0)
        .await
        .expect_err("timeout");
    assert_eq!(err, WeatherError::Timeout);
    assert!(coord.can_retry(&err, 0));
    assert!(!coord.can_retry(&err, 3));
}

#[tokio::test(start_paused = true)]
async fn newer_lookup_cancels_older_one() {
    let (coord, calls) = counting_coordinator(Duration::from_secs(2), Ok(sunny()));

    let first = coord.lookup(WeatherQuery::City("Rome".to_string()), 0);
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        coord.lookup(WeatherQuery::City("Milan".to_string()), 0).await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first, Err(WeatherError::Cancelled));
    assert_eq!(second.expect("second lookup").location, "Milan");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn blank_city_cancels_in_flight_lookup() {
    let coord = coordinator(Duration::from_secs(2), Ok(sunny()));

    let first = coord.lookup(WeatherQuery::City("Cairo".to_string()), 0);
    let blank = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        coord.lookup_city("   ", 0).await
    };
    let (first, blank) = tokio::join!(first, blank);

    assert_eq!(first, Err(WeatherError::Cancelled));
    assert_eq!(blank, Err(WeatherError::EmptyQuery));
}

#[tokio::test(start_paused = true)]
async fn classified_failures_pass_through_and_retries_are_bounded() {
    let coord = coordinator(Duration::from_millis(5), Err(WeatherError::Unauthorized));
    let err = coord
        .lookup(WeatherQuery::Coords { lat: 1.0, lon: 2.0 }, 0)
        .await
        .expect_err("unauthorized");
    assert_eq!(err, WeatherError::Unauthorized);
    assert!(!coord.can_retry(&err, 0));

    let err = coord
        .lookup(WeatherQuery::City("Quito".to_string()), 4)
        .await
        .expect_err("exhausted");
    assert_eq!(err, WeatherError::RetriesExhausted(3));
}
