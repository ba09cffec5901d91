use std::fmt;

use serde::Deserialize;

use crate::error::WeatherError;

#[derive(Debug, Clone, PartialEq)]
pub enum WeatherQuery {
    City(String),
    Coords { lat: f64, lon: f64 },
}

impl WeatherQuery {
    /// Trims the input; blank input is `EmptyQuery`.
    pub fn city(raw: &str) -> Result<Self, WeatherError> {
        let city = raw.trim();
        if city.is_empty() {
            return Err(WeatherError::EmptyQuery);
        }
        Ok(Self::City(city.to_string()))
    }

    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::City(city) => vec![("q", city.clone())],
            Self::Coords { lat, lon } => vec![("lat", lat.to_string()), ("lon", lon.to_string())],
        }
    }
}

impl fmt::Display for WeatherQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::City(city) => f.write_str(city),
            Self::Coords { lat, lon } => write!(f, "{lat:.4},{lon:.4}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Weather {
    pub location: String,
    /// In the units the lookup asked for.
    pub temperature: f64,
    pub condition: String,
    pub description: String,
    pub icon: String,
}

impl Weather {
    pub fn rounded_temperature(&self) -> i64 {
        self.temperature.round() as i64
    }

    pub fn icon_url(&self) -> String {
        format!("https://openweathermap.org/img/wn/{}@2x.png", self.icon)
    }

    /// Parse an OpenWeatherMap current-weather document.
    pub fn from_json(body: &str) -> Result<Self, WeatherError> {
        let raw: RawWeather = serde_json::from_str(body)
            .map_err(|err| WeatherError::InvalidResponse(err.to_string()))?;
        let first = raw
            .weather
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::InvalidResponse("no weather conditions".to_string()))?;

        Ok(Self {
            location: raw.name,
            temperature: raw.main.temp,
            condition: first.main,
            description: first.description,
            icon: first.icon,
        })
    }
}

pub fn unit_symbol(units: &str) -> &'static str {
    match units {
        "imperial" => "°F",
        "standard" => "K",
        _ => "°C",
    }
}

#[derive(Debug, Deserialize)]
struct RawWeather {
    #[serde(default)]
    name: String,
    main: RawMain,
    #[serde(default)]
    weather: Vec<RawCondition>,
}

#[derive(Debug, Deserialize)]
struct RawMain {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    main: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    icon: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "coord": {"lon": -0.13, "lat": 51.51},
        "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
        "main": {"temp": 11.62, "feels_like": 10.9, "humidity": 81},
        "name": "London",
        "cod": 200
    }"#;

    #[test]
    fn parses_current_weather() {
        let weather = Weather::from_json(SAMPLE).expect("parse sample");
        assert_eq!(weather.location, "London");
        assert_eq!(weather.condition, "Rain");
        assert_eq!(weather.rounded_temperature(), 12);
        assert_eq!(weather.icon_url(), "https://openweathermap.org/img/wn/10d@2x.png");
    }

    #[test]
    fn rejects_documents_without_conditions() {
        let err = Weather::from_json(r#"{"main": {"temp": 1.0}, "weather": []}"#)
            .expect_err("no conditions");
        assert!(matches!(err, WeatherError::InvalidResponse(_)));
        assert!(matches!(
            Weather::from_json("<html>"),
            Err(WeatherError::InvalidResponse(_))
        ));
    }

    #[test]
    fn city_query_is_trimmed() {
        assert_eq!(
            WeatherQuery::city("  Paris ").expect("city"),
            WeatherQuery::City("Paris".to_string())
        );
        assert_eq!(WeatherQuery::city("   "), Err(WeatherError::EmptyQuery));
    }
}
