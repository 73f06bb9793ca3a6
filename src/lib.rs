use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

pub mod api;
pub mod clip_plan;
pub mod compositor;
pub mod config;
pub mod crossfade;
pub mod error;
pub mod ffmpeg;
pub mod init;
pub mod padder;
pub mod pipeline;

pub use error::{ChainError, Result};

pub type ChainLogHook = Arc<Mutex<dyn Fn(&str) + Send + Sync + 'static>>;

static LOG_HOOK: Lazy<Mutex<Option<ChainLogHook>>> = Lazy::new(|| Mutex::new(None));

/// Forward every tagged progress line to `hook` in addition to tracing.
pub fn set_log_hook(hook: Option<ChainLogHook>) {
    if let Ok(mut guard) = LOG_HOOK.lock() {
        *guard = hook;
    }
}

pub(crate) fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!(tag, "{}", message),
        _ => tracing::info!(tag, "{}", message),
    }

    if let Ok(guard) = LOG_HOOK.lock() {
        if let Some(hook) = guard.as_ref() {
            if let Ok(callback) = hook.lock() {
                let line = format!("[{}] {}", tag, message);
                callback(&line);
            }
        }
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}
