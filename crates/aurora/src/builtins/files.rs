//! Text file capabilities: create, write, read.
//!
//! Relative paths resolve against the root given at registration; absolute
//! paths are used as they are.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::CoreResult;
use crate::tools::{
    Arguments, CapabilityDescriptor, CapabilityRegistryBuilder, HandlerError, HandlerResult,
};

use super::{optional_str, required_str};

pub const CREATE_FILE: &str = "create_file";
pub const WRITE_FILE: &str = "write_file";
pub const READ_FILE: &str = "read_file";

pub fn register(builder: &mut CapabilityRegistryBuilder, root: PathBuf) -> CoreResult<()> {
    let root = Arc::new(root);
    builder.register_all([
        create_file_capability(root.clone()),
        write_file_capability(root.clone()),
        read_file_capability(root),
    ])?;
    Ok(())
}

fn create_file_capability(root: Arc<PathBuf>) -> CapabilityDescriptor {
    CapabilityDescriptor::suspendable(CREATE_FILE, move |args| {
        let root = root.clone();
        async move { create_file(&root, args).await }
    })
    .with_description("Create a text file. Fails if it exists unless overwrite is set.")
    .with_input_schema(json!({
        "type": "object",
        "required": ["path"],
        "properties": {
            "path": { "type": "string" },
            "content": { "type": "string" },
            "overwrite": { "type": "boolean" }
        }
    }))
}

fn write_file_capability(root: Arc<PathBuf>) -> CapabilityDescriptor {
    CapabilityDescriptor::suspendable(WRITE_FILE, move |args| {
        let root = root.clone();
        async move { write_file(&root, args).await }
    })
    .with_description("Write text to a file; mode 'w' overwrites, 'a' appends.")
    .with_input_schema(json!({
        "type": "object",
        "required": ["path", "content"],
        "properties": {
            "path": { "type": "string" },
            "content": { "type": "string" },
            "mode": { "type": "string" }
        }
    }))
}

fn read_file_capability(root: Arc<PathBuf>) -> CapabilityDescriptor {
    CapabilityDescriptor::suspendable(READ_FILE, move |args| {
        let root = root.clone();
        async move { read_file(&root, args).await }
    })
    .with_description("Read a text file, optionally limited to max_bytes.")
    .with_input_schema(json!({
        "type": "object",
        "required": ["path"],
        "properties": {
            "path": { "type": "string" },
            "max_bytes": { "type": "integer" }
        }
    }))
}

async fn create_file(root: &Path, args: Arguments) -> HandlerResult {
    let path = root.join(required_str(&args, "path")?);
    let content = optional_str(&args, "content").unwrap_or_default();
    let overwrite = args
        .get("overwrite")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let existed = fs::try_exists(&path).await?;
    if existed && !overwrite {
        return Err(format!("file exists: {}", path.display()).into());
    }
    ensure_parent(&path).await?;
    fs::write(&path, content).await?;
    Ok(json!({
        "path": path.display().to_string(),
        "bytes": content.len(),
        "existed": existed,
    }))
}

async fn write_file(root: &Path, args: Arguments) -> HandlerResult {
    let path = root.join(required_str(&args, "path")?);
    let content = required_str(&args, "content")?;
    let mode = optional_str(&args, "mode").unwrap_or("w");

    ensure_parent(&path).await?;
    match mode {
        "w" => fs::write(&path, content).await?,
        "a" => {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
        }
        other => return Err(format!("mode must be 'w' or 'a', got '{other}'").into()),
    }
    Ok(json!({
        "path": path.display().to_string(),
        "bytes": content.len(),
        "mode": mode,
    }))
}

async fn read_file(root: &Path, args: Arguments) -> HandlerResult {
    let path = root.join(required_str(&args, "path")?);
    let max_bytes = match args.get("max_bytes") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_u64()
                .ok_or_else(|| HandlerError::from("max_bytes must be non-negative"))?,
        ),
    };

    let metadata = fs::metadata(&path)
        .await
        .map_err(|error| format!("file not found: {} ({error})", path.display()))?;
    let size = metadata.len();

    let Some(limit) = max_bytes else {
        let content = fs::read_to_string(&path).await?;
        return Ok(json!({
            "path": path.display().to_string(),
            "bytes": size,
            "content": content,
            "truncated": false,
            "size": size,
        }));
    };

    let file = fs::File::open(&path).await?;
    let mut data = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut data).await?;
    let truncated = data.len() as u64 > limit;
    if truncated {
        data.truncate(limit as usize);
        // Drop a multi-byte character cut in half by the limit.
        let split = std::str::from_utf8(&data)
            .err()
            .filter(|error| error.error_len().is_none())
            .map(|error| error.valid_up_to());
        if let Some(boundary) = split {
            data.truncate(boundary);
        }
    }
    Ok(json!({
        "path": path.display().to_string(),
        "bytes": data.len(),
        "content": String::from_utf8_lossy(&data),
        "truncated": truncated,
        "size": size,
    }))
}

async fn ensure_parent(path: &Path) -> Result<(), HandlerError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}
