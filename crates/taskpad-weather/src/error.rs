/// Classified lookup failure. Each class maps to its own user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WeatherError {
    #[error("weather service rejected the API key")]
    Unauthorized,
    #[error("location not found: {0}")]
    NotFound(String),
    #[error("weather service returned HTTP {0}")]
    Server(u16),
    #[error("weather lookup timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected weather response: {0}")]
    InvalidResponse(String),
    #[error("no weather API key configured")]
    MissingApiKey,
    #[error("no city given")]
    EmptyQuery,
    #[error("retry limit of {0} reached")]
    RetriesExhausted(u32),
    /// A newer lookup replaced this one.
    #[error("weather lookup superseded")]
    Cancelled,
}

impl WeatherError {
    /// Text for the weather panel. Superseded lookups show nothing.
    pub fn user_message(&self) -> Option<String> {
        let message = match self {
            Self::Unauthorized => "Invalid API key.".to_string(),
            Self::NotFound(city) => format!(
                "Sorry, we couldn't find \"{city}\". Please check the spelling or try another city."
            ),
            Self::Server(status) => {
                format!("Weather data currently unavailable (server error {status}).")
            }
            Self::Timeout => "Request timed out.".to_string(),
            Self::Network(_) => {
                "Weather data currently unavailable. Check your connection.".to_string()
            }
            Self::InvalidResponse(_) => {
                "Weather data currently unavailable (unreadable response).".to_string()
            }
            Self::MissingApiKey => {
                "No weather API key configured. Set weather.api_key or TASKPAD_WEATHER_KEY."
                    .to_string()
            }
            Self::EmptyQuery => "Enter a city to see the weather...".to_string(),
            Self::RetriesExhausted(_) => {
                "Weather data currently unavailable. Please try again later.".to_string()
            }
            Self::Cancelled => return None,
        };
        Some(message)
    }

    /// Transient failures worth offering a retry for.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Server(_) | Self::Network(_) | Self::InvalidResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::WeatherError;

    #[test]
    fn every_visible_class_has_its_own_message() {
        let errors = [
            WeatherError::Unauthorized,
            WeatherError::NotFound("Atlantis".to_string()),
            WeatherError::Server(503),
            WeatherError::Timeout,
            WeatherError::Network("reset".to_string()),
            WeatherError::InvalidResponse("eof".to_string()),
            WeatherError::MissingApiKey,
            WeatherError::EmptyQuery,
            WeatherError::RetriesExhausted(3),
        ];
        let messages: HashSet<String> = errors
            .iter()
            .map(|e| e.user_message().expect("visible message"))
            .collect();
        assert_eq!(messages.len(), errors.len());
        assert!(
            WeatherError::NotFound("Atlantis".to_string())
                .user_message()
                .expect("message")
                .contains("\"Atlantis\"")
        );
    }

    #[test]
    fn cancelled_is_silent_and_not_retryable() {
        assert_eq!(WeatherError::Cancelled.user_message(), None);
        assert!(!WeatherError::Cancelled.is_retryable());
        assert!(!WeatherError::Unauthorized.is_retryable());
        assert!(WeatherError::Timeout.is_retryable());
    }
}
