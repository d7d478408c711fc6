//! 有状态天气工具
//!
//! 无状态的 fetch 加上依赖会话状态的后处理：调用时读取 unit_preference 决定温度单位，
//! 成功后写入 last_city_checked；fetch 失败时不触碰会话状态。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::session::{LAST_CITY_CHECKED_KEY, UNIT_PREFERENCE_KEY};
use crate::tools::{Tool, ToolContext, ToolResult};
use crate::weather::WeatherProvider;

pub const WEATHER_TOOL_NAME: &str = "get_weather";

/// 温度单位偏好
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// 只有 "Fahrenheit"（大小写不敏感）切换为华氏，其余一律摄氏
    pub fn from_preference(pref: &str) -> Self {
        if pref.trim().eq_ignore_ascii_case("fahrenheit") {
            TemperatureUnit::Fahrenheit
        } else {
            TemperatureUnit::Celsius
        }
    }

    /// 摄氏保留一位小数；华氏由原始读数换算后向上取整，不带小数
    pub fn format(self, celsius: f64) -> String {
        match self {
            TemperatureUnit::Celsius => format!("{:.1}°C", celsius),
            TemperatureUnit::Fahrenheit => {
                format!("{}°F", (celsius * 9.0 / 5.0 + 32.0).ceil() as i64)
            }
        }
    }
}

/// 仅用于生成参数 Schema
#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct WeatherArgs {
    /// 城市名，如 London、New York
    city: String,
}

pub struct WeatherTool {
    provider: Arc<dyn WeatherProvider>,
}

impl WeatherTool {
    pub fn new(provider: Arc<dyn WeatherProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        WEATHER_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Fetches the current weather for a city and formats the temperature in the user's preferred unit. Args: {\"city\": \"London\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schema_for!(WeatherArgs)).unwrap_or_else(|_| {
            serde_json::json!({"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]})
        })
    }

    async fn invoke(&self, args: &Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        let city = match args
            .get("city")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            Some(c) => c,
            None => return ToolResult::error("Missing required argument 'city'."),
        };

        let reading = match self.provider.fetch(city).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(city = %city, error = %e, "Weather fetch failed");
                return ToolResult::error(e.to_string());
            }
        };

        let unit = TemperatureUnit::from_preference(
            ctx.state.get_str_or(UNIT_PREFERENCE_KEY, "Celsius"),
        );
        let report = format!(
            "The weather in {} is {} with a temperature of {}.",
            city,
            reading.condition,
            unit.format(reading.temperature_celsius)
        );

        ctx.state.set(LAST_CITY_CHECKED_KEY, city);

        let mut payload = Map::new();
        payload.insert("report".to_string(), Value::String(report));
        payload.insert("city".to_string(), Value::String(city.to_string()));
        ToolResult::success(payload)
    }
}
