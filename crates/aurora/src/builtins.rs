//! Built-in capabilities.
//!
//! Registered on demand through [`register_builtins`]; hosts that want only
//! their own capabilities simply skip it.

pub mod clock;
pub mod files;

use std::path::PathBuf;

use serde_json::Value;

use crate::error::CoreResult;
use crate::tools::{Arguments, CapabilityRegistryBuilder, HandlerError};

/// Register every built-in, resolving relative file paths against the working directory.
pub fn register_builtins(builder: &mut CapabilityRegistryBuilder) -> CoreResult<()> {
    register_builtins_with(builder, PathBuf::from("."))
}

/// Register every built-in with an explicit root for relative file paths.
pub fn register_builtins_with(
    builder: &mut CapabilityRegistryBuilder,
    file_root: impl Into<PathBuf>,
) -> CoreResult<()> {
    clock::register(builder)?;
    files::register(builder, file_root.into())?;
    Ok(())
}

fn required_str<'a>(args: &'a Arguments, key: &str) -> Result<&'a str, HandlerError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing string argument '{key}'").into())
}

fn optional_str<'a>(args: &'a Arguments, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}
