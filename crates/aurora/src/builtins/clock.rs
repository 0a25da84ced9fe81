//! Clock capability.

use serde_json::{json, Value};

use crate::error::CoreResult;
use crate::tools::{CapabilityDescriptor, CapabilityRegistryBuilder, HandlerResult};

pub const CURRENT_TIME: &str = "current_time";

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn register(builder: &mut CapabilityRegistryBuilder) -> CoreResult<()> {
    builder.register(current_time_capability())?;
    Ok(())
}

fn current_time_capability() -> CapabilityDescriptor {
    CapabilityDescriptor::blocking(CURRENT_TIME, |_args| current_time())
        .with_description("Local system time as 'YYYY-MM-DD HH:MM:SS'.")
        .with_input_schema(json!({ "type": "object", "properties": {} }))
}

fn current_time() -> HandlerResult {
    Ok(Value::String(
        chrono::Local::now().format(DISPLAY_FORMAT).to_string(),
    ))
}
