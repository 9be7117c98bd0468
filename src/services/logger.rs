use crate::models::common::Interface;
use crate::models::config::MerchantConfig;
use crate::models::responses::NOT_AVAILABLE;
use chrono::Local;
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

const SEPARATOR: char = '|';
const FILTERED: &str = "***";

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Log folder is not usable: {0}")]
    Folder(String),

    #[error("Log write error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identifies the transaction every line of a batch belongs to.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub order_ref: String,
    pub transaction_id: String,
    pub interface: Interface,
}

impl LogContext {
    pub fn new(interface: Interface) -> Self {
        LogContext {
            order_ref: NOT_AVAILABLE.to_string(),
            transaction_id: NOT_AVAILABLE.to_string(),
            interface,
        }
    }

    pub fn with_ids(mut self, order_ref: Option<String>, transaction_id: Option<String>) -> Self {
        if let Some(order_ref) = order_ref.filter(|v| !v.is_empty()) {
            self.order_ref = order_ref;
        }
        if let Some(transaction_id) = transaction_id.filter(|v| !v.is_empty()) {
            self.transaction_id = transaction_id;
        }
        self
    }
}

/// Persistent, append-only transaction log.
pub trait LogSink {
    fn write(&self, context: &LogContext, content: &Map<String, Value>) -> Result<(), LogError>;
}

impl<T: LogSink + ?Sized> LogSink for &T {
    fn write(&self, context: &LogContext, content: &Map<String, Value>) -> Result<(), LogError> {
        (**self).write(context, content)
    }
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn write(&self, context: &LogContext, content: &Map<String, Value>) -> Result<(), LogError> {
        (**self).write(context, content)
    }
}

/// Discards everything. Used when `LOGGER` is off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn write(&self, _context: &LogContext, _content: &Map<String, Value>) -> Result<(), LogError> {
        Ok(())
    }
}

/// Daily `<dir>/<YYYYMMDD>.log` files.
#[derive(Debug, Clone)]
pub struct FileLogSink {
    dir: PathBuf,
}

impl FileLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_for_today(&self) -> PathBuf {
        self.dir
            .join(format!("{}.log", Local::now().format("%Y%m%d")))
    }

    fn check_folder(dir: &Path) -> Result<(), LogError> {
        let metadata = std::fs::metadata(dir)
            .map_err(|e| LogError::Folder(format!("{}: {}", dir.display(), e)))?;
        if !metadata.is_dir() || metadata.permissions().readonly() {
            return Err(LogError::Folder(format!(
                "Folder is not writable: {}",
                dir.display()
            )));
        }
        Ok(())
    }
}

impl LogSink for FileLogSink {
    fn write(&self, context: &LogContext, content: &Map<String, Value>) -> Result<(), LogError> {
        Self::check_folder(&self.dir)?;
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let text = format_lines(context, content, &timestamp);
        if text.is_empty() {
            return Ok(());
        }

        // one append-mode write per batch, under an exclusive lock
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for_today())?;
        file.lock()?;
        let written = file.write_all(text.as_bytes());
        file.unlock()?;
        Ok(written?)
    }
}

/// File sink under `LOG_PATH` when `LOGGER` is on, otherwise nothing.
pub fn sink_for_config(config: &MerchantConfig) -> Box<dyn LogSink + Send + Sync> {
    if config.logger {
        Box::new(FileLogSink::new(config.log_path.clone()))
    } else {
        Box::new(NullLogSink)
    }
}

/// Keeps formatted lines in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl LogSink for MemoryLogSink {
    fn write(&self, context: &LogContext, content: &Map<String, Value>) -> Result<(), LogError> {
        let text = format_lines(context, content, "0000-00-00 00:00:00");
        if let Ok(mut lines) = self.lines.lock() {
            lines.extend(text.lines().map(str::to_string));
        }
        Ok(())
    }
}

/// `orderRef|transactionId|interface|timestamp|key|value` per flattened field.
pub fn format_lines(context: &LogContext, content: &Map<String, Value>, timestamp: &str) -> String {
    let mut text = String::new();
    for (key, value) in flatten(content) {
        let value = filter_content(&key, value);
        for part in [
            context.order_ref.as_str(),
            context.transaction_id.as_str(),
            context.interface.as_str(),
            timestamp,
            key.as_str(),
        ] {
            text.push_str(part);
            text.push(SEPARATOR);
        }
        // keep one field per line
        text.push_str(&value.replace(['\r', '\n'], " "));
        text.push('\n');
    }
    text
}

/// Nested maps and lists become `parent_child` keys.
pub fn flatten(content: &Map<String, Value>) -> Vec<(String, String)> {
    let mut flat = Vec::new();
    for (key, value) in content {
        flatten_into(key, value, &mut flat);
    }
    flat
}

fn flatten_into(prefix: &str, value: &Value, flat: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(&format!("{}_{}", prefix, key), child, flat);
            }
        }
        Value::Array(list) => {
            for (index, child) in list.iter().enumerate() {
                flatten_into(&format!("{}_{}", prefix, index), child, flat);
            }
        }
        Value::String(s) => flat.push((prefix.to_string(), s.clone())),
        Value::Null => flat.push((prefix.to_string(), String::new())),
        other => flat.push((prefix.to_string(), other.to_string())),
    }
}

/// Card data never reaches the log file.
pub fn filter_content(key: &str, value: String) -> String {
    if key.contains("cardData") || key == "cardSecret" {
        return FILTERED.to_string();
    }
    if key == "content" || key == "sendContent" {
        if let Ok(Value::Object(mut data)) = serde_json::from_str::<Value>(&value) {
            if let Some(Value::Object(card_data)) = data.get_mut("cardData") {
                for field in card_data.values_mut() {
                    *field = Value::String(FILTERED.to_string());
                }
            }
            if data.contains_key("cardSecret") {
                data.insert("cardSecret".to_string(), Value::String(FILTERED.to_string()));
            }
            return serde_json::to_string(&data).unwrap_or(value);
        }
    }
    value
}
