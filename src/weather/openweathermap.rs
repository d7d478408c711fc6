//! OpenWeatherMap 数据源
//!
//! GET {base_url}?q=city&appid=KEY&units=metric，带超时；200 时取 main.temp 与 weather[0].description，
//! 否则取响应中的 message 字段作为错误原因。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{capitalize, WeatherError, WeatherProvider, WeatherReading};

pub const OPENWEATHER_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    main: MainSection,
    weather: Vec<ConditionEntry>,
}

#[derive(Debug, Deserialize)]
struct MainSection {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct ConditionEntry {
    description: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

/// OpenWeatherMap 客户端：api_key 为 None 时每次 fetch 都返回 MissingApiKey
pub struct OpenWeatherMapProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenWeatherMapProvider {
    pub fn new(base_url: Option<&str>, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.unwrap_or(OPENWEATHER_URL).to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// 从环境变量 OPENWEATHER_API_KEY 读取密钥
    pub fn from_env(base_url: Option<&str>, timeout_secs: u64) -> Self {
        Self::new(
            base_url,
            std::env::var("OPENWEATHER_API_KEY").ok(),
            timeout_secs,
        )
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherMapProvider {
    async fn fetch(&self, city: &str) -> Result<WeatherReading, WeatherError> {
        let api_key = self.api_key.as_deref().ok_or(WeatherError::MissingApiKey)?;

        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("q", city), ("appid", api_key), ("units", "metric")])
            .send()
            .await
            .map_err(|e| WeatherError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let message = resp
                .json::<ApiErrorBody>()
                .await
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(WeatherError::Api(message));
        }

        let body: CurrentWeather = resp
            .json()
            .await
            .map_err(|e| WeatherError::Malformed(e.to_string()))?;
        let condition = body
            .weather
            .first()
            .map(|w| capitalize(&w.description))
            .ok_or_else(|| WeatherError::Malformed("empty weather list".to_string()))?;

        Ok(WeatherReading {
            temperature_celsius: body.main.temp,
            condition,
        })
    }
}
