use std::future::Future;

use reqwest::{StatusCode, Url};
use tracing::{debug, warn};

use crate::error::WeatherError;
use crate::model::{Weather, WeatherQuery};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

/// Source of current weather. The lookup coordinator owns timeout and
/// cancellation; providers just fetch.
pub trait WeatherProvider: Send + Sync {
    fn fetch(
        &self,
        query: &WeatherQuery,
    ) -> impl Future<Output = Result<Weather, WeatherError>> + Send;
}

#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    units: String,
}

impl OpenWeatherClient {
    pub fn new(api_key: &str, units: &str) -> Result<Self, WeatherError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(WeatherError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| WeatherError::Network(err.to_string()))?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            units: units.to_string(),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn request_url(&self, query: &WeatherQuery) -> Result<Url, WeatherError> {
        let mut pairs = query.query_pairs();
        pairs.push(("appid", self.api_key.clone()));
        pairs.push(("units", self.units.clone()));
        Url::parse_with_params(&format!("{}/data/2.5/weather", self.base_url), &pairs)
            .map_err(|err| WeatherError::Network(format!("invalid weather URL: {err}")))
    }
}

impl WeatherProvider for OpenWeatherClient {
    #[tracing::instrument(skip_all, fields(query = %query))]
    async fn fetch(&self, query: &WeatherQuery) -> Result<Weather, WeatherError> {
        let url = self.request_url(query)?;
        let response = self.http.get(url).send().await.map_err(|err| {
            warn!(error = %err, "weather request failed");
            classify_transport(&err)
        })?;

        let status = response.status();
        debug!(%status, "weather response");
        match status {
            StatusCode::UNAUTHORIZED => return Err(WeatherError::Unauthorized),
            StatusCode::NOT_FOUND => return Err(WeatherError::NotFound(query.to_string())),
            s if !s.is_success() => return Err(WeatherError::Server(s.as_u16())),
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|err| classify_transport(&err))?;
        Weather::from_json(&body)
    }
}

fn classify_transport(err: &reqwest::Error) -> WeatherError {
    if err.is_timeout() {
        WeatherError::Timeout
    } else {
        WeatherError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_city_and_coordinate_urls() {
        let client = OpenWeatherClient::new("k3y", "metric")
            .expect("client")
            .with_base_url("http://localhost:9/");

        let url = client
            .request_url(&WeatherQuery::City("São Paulo".to_string()))
            .expect("city url");
        assert_eq!(url.path(), "/data/2.5/weather");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("q".to_string(), "São Paulo".to_string()),
                ("appid".to_string(), "k3y".to_string()),
                ("units".to_string(), "metric".to_string()),
            ]
        );

        let url = client
            .request_url(&WeatherQuery::Coords { lat: 51.5, lon: -0.12 })
            .expect("coords url");
        assert!(url.as_str().contains("lat=51.5&lon=-0.12"));
    }

    #[test]
    fn blank_key_is_rejected() {
        assert!(matches!(
            OpenWeatherClient::new("  ", "metric"),
            Err(WeatherError::MissingApiKey)
        ));
    }
}
