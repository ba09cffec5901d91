//! Current-weather lookup: an HTTP provider plus a coordinator that keeps a
//! single lookup in flight with a timeout and caller-driven retries.

pub mod coordinator;
pub mod error;
pub mod model;
pub mod provider;

pub use coordinator::{CancelToken, LookupCoordinator, RetryPolicy};
pub use error::WeatherError;
pub use model::{Weather, WeatherQuery, unit_symbol};
pub use provider::{OpenWeatherClient, WeatherProvider};
