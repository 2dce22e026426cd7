use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::api::ApiService;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::host::{Geolocator, Presenter};

const LOADING_TEXT: &str = "Wetter wird geladen...";
const UNAVAILABLE_TEXT: &str = "Wetter nicht verfügbar";

/// Header weather line. Optional: failures end in a placeholder text.
pub struct WeatherService {
    api: ApiService,
    geolocator: Arc<dyn Geolocator>,
    presenter: Arc<dyn Presenter>,
    timeout: Duration,
}

impl WeatherService {
    pub fn new(
        api: ApiService,
        config: &AppConfig,
        geolocator: Arc<dyn Geolocator>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        Self {
            api,
            geolocator,
            presenter,
            timeout: Duration::from_millis(config.geolocation_timeout_ms),
        }
    }

    /// Returns the text that was shown.
    pub async fn load_weather(&self) -> String {
        self.presenter.weather(LOADING_TEXT);
        let text = match self.fetch().await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!(target: "weather", "empty weather response");
                UNAVAILABLE_TEXT.to_string()
            }
            Err(err) => {
                warn!(target: "weather", error = %err, "weather unavailable");
                UNAVAILABLE_TEXT.to_string()
            }
        };
        self.presenter.weather(&text);
        text
    }

    async fn fetch(&self) -> AppResult<String> {
        let position = tokio::time::timeout(self.timeout, self.geolocator.current_position())
            .await
            .map_err(|_| AppError::NotFound("Standortabfrage abgelaufen".into()))??;
        debug!(
            target: "weather",
            latitude = position.latitude,
            longitude = position.longitude,
            "position resolved"
        );
        self.api
            .fetch_weather(position.latitude, position.longitude)
            .await
            .map(|text| text.trim().to_string())
    }
}
