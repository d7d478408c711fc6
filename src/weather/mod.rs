//! 天气数据源抽象
//!
//! WeatherProvider::fetch(city) 返回摄氏温度与天气描述；OpenWeatherMap 走 HTTP，
//! StaticWeatherProvider 使用固定表（离线演示与测试）。缺少凭据是配置错误，与请求失败区分。

pub mod openweathermap;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub use openweathermap::OpenWeatherMapProvider;

/// 一次天气测量
#[derive(Clone, Debug, PartialEq)]
pub struct WeatherReading {
    pub temperature_celsius: f64,
    /// 已首字母大写的天气描述，如 "Clear sky"
    pub condition: String,
}

/// 天气数据源错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeatherError {
    #[error("OpenWeatherMap API key not set in .env.")]
    MissingApiKey,

    #[error("Weather API exception: {0}")]
    Request(String),

    #[error("Weather API error: {0}")]
    Api(String),

    #[error("Weather API returned malformed data: {0}")]
    Malformed(String),
}

impl WeatherError {
    /// 是否为配置类错误（而非单次请求失败）
    pub fn is_configuration(&self) -> bool {
        matches!(self, WeatherError::MissingApiKey)
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn fetch(&self, city: &str) -> Result<WeatherReading, WeatherError>;
}

/// 固定表数据源：城市名大小写不敏感
#[derive(Debug, Default, Clone)]
pub struct StaticWeatherProvider {
    readings: HashMap<String, WeatherReading>,
}

impl StaticWeatherProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reading(
        mut self,
        city: &str,
        temperature_celsius: f64,
        condition: impl Into<String>,
    ) -> Self {
        self.readings.insert(
            city.to_lowercase(),
            WeatherReading {
                temperature_celsius,
                condition: capitalize(&condition.into()),
            },
        );
        self
    }

    /// 演示用数据
    pub fn demo() -> Self {
        Self::new()
            .with_reading("New York", 25.0, "sunny")
            .with_reading("London", 15.0, "cloudy")
            .with_reading("Tokyo", 18.0, "light rain")
            .with_reading("Paris", 20.0, "clear sky")
    }
}

#[async_trait]
impl WeatherProvider for StaticWeatherProvider {
    async fn fetch(&self, city: &str) -> Result<WeatherReading, WeatherError> {
        self.readings
            .get(&city.to_lowercase())
            .cloned()
            .ok_or_else(|| WeatherError::Api("city not found".to_string()))
    }
}

/// 首字母大写、其余小写
pub(crate) fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
