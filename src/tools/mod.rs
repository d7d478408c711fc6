pub mod executor;
pub mod greeting;
pub mod registry;
pub mod schema;
pub mod weather;

pub use executor::ToolExecutor;
pub use greeting::{SayGoodbyeTool, SayHelloTool, SAY_GOODBYE_TOOL_NAME, SAY_HELLO_TOOL_NAME};
pub use registry::{Tool, ToolContext, ToolRegistry, ToolResult, ToolSpec, ToolStatus};
pub use schema::tool_call_schema_json;
pub use weather::{TemperatureUnit, WeatherTool, WEATHER_TOOL_NAME};
