//! Current conditions from the Open-Meteo APIs (no API key needed).

use super::{errors, text_result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value, json};
use std::time::Duration;
use url::Url;

pub const DEFAULT_GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com";
pub const DEFAULT_FORECAST_URL: &str = "https://api.open-meteo.com";

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,wind_speed_10m,weather_code";

#[derive(Debug, Deserialize)]
pub struct WeatherArgs {
    pub city: String,
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Option<Vec<Place>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct Place {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    country: Option<String>,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current: Option<Conditions>,
}

#[derive(Debug, Deserialize)]
struct Conditions {
    temperature_2m: Number,
    relative_humidity_2m: Number,
    wind_speed_10m: Number,
    weather_code: i64,
}

pub fn definition() -> Value {
    json!({
        "name": "get_weather",
        "title": "Get Weather",
        "description": "Get current weather for a city. Uses Open-Meteo free API (no API key needed).",
        "inputSchema": {
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "description": "City name (e.g., \"Tokyo\", \"New York\", \"London\")",
                },
            },
            "required": ["city"],
        },
        "annotations": { "readOnlyHint": true, "openWorldHint": true },
    })
}

/// Text for a WMO weather interpretation code.
pub fn describe_weather_code(code: i64) -> String {
    let text = match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        71 => "Slight snow fall",
        73 => "Moderate snow fall",
        75 => "Heavy snow fall",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        95 => "Thunderstorm",
        other => return format!("Unknown (code {})", other),
    };
    text.to_string()
}

/// Client for the geocoding and forecast endpoints.
#[derive(Clone)]
pub struct WeatherClient {
    http: reqwest::Client,
    geocoding_url: Url,
    forecast_url: Url,
}

impl WeatherClient {
    pub fn new(timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build().context("building weather http client")?,
            geocoding_url: Url::parse(DEFAULT_GEOCODING_URL)?,
            forecast_url: Url::parse(DEFAULT_FORECAST_URL)?,
        })
    }

    /// Point the client at other API hosts.
    #[cfg(test)]
    pub fn with_base_urls(mut self, geocoding_url: Url, forecast_url: Url) -> Self {
        self.geocoding_url = geocoding_url;
        self.forecast_url = forecast_url;
        self
    }

    /// Tool result for `get_weather`. Upstream failures become an
    /// `INTERNAL_ERROR` payload.
    pub async fn current(&self, args: WeatherArgs) -> Value {
        match self.lookup(&args.city).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("weather lookup for {:?} failed: {:#}", args.city, e);
                errors::internal(format!("Weather service request failed: {}", e))
            }
        }
    }

    async fn lookup(&self, city: &str) -> anyhow::Result<Value> {
        let Some(place) = self.geocode(city).await? else {
            return Ok(errors::invalid_input(
                format!("City \"{}\" not found.", city),
                Some("Try a different spelling or use a major city name."),
            ));
        };

        let Some(current) = self.forecast(&place).await? else {
            return Ok(errors::invalid_input(
                "Weather data unavailable for this location.",
                None,
            ));
        };

        Ok(text_result(&json!({
            "success": true,
            "location": {
                "city": place.name,
                "country": place.country,
                "latitude": place.latitude,
                "longitude": place.longitude,
            },
            "current": {
                "temperature": format!("{}°C", current.temperature_2m),
                "humidity": format!("{}%", current.relative_humidity_2m),
                "wind_speed": format!("{} km/h", current.wind_speed_10m),
                "condition": describe_weather_code(current.weather_code),
            },
        })))
    }

    async fn geocode(&self, city: &str) -> anyhow::Result<Option<Place>> {
        let mut url = self.geocoding_url.join("/v1/search")?;
        url.query_pairs_mut()
            .append_pair("name", city)
            .append_pair("count", "1");

        let response: GeocodingResponse = self
            .http
            .get(url)
            .send()
            .await
            .context("geocoding request")?
            .error_for_status()?
            .json()
            .await
            .context("decoding geocoding response")?;

        Ok(response
            .results
            .and_then(|results| results.into_iter().next()))
    }

    async fn forecast(&self, place: &Place) -> anyhow::Result<Option<Conditions>> {
        let mut url = self.forecast_url.join("/v1/forecast")?;
        url.query_pairs_mut()
            .append_pair("latitude", &place.latitude.to_string())
            .append_pair("longitude", &place.longitude.to_string())
            .append_pair("current", CURRENT_FIELDS);

        let response: ForecastResponse = self
            .http
            .get(url)
            .send()
            .await
            .context("forecast request")?
            .error_for_status()?
            .json()
            .await
            .context("decoding forecast response")?;

        Ok(response.current)
    }
}
