//! Logging Infrastructure
//!
//! Structured logging for development (pretty stdout) and production (JSON,
//! optional daily-rolling file).

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the logger with defaults (`info`, human readable, stdout only)
pub fn init_logger() -> Option<WorkerGuard> {
    init_logger_with_file(None, false, None)
}

/// Initialize the logger with optional JSON output and file output
///
/// `RUST_LOG` wins over `log_level` when set. The returned guard must be kept
/// alive for the file writer to flush.
pub fn init_logger_with_file(
    log_level: Option<&str>,
    json: bool,
    log_dir: Option<&str>,
) -> Option<WorkerGuard> {
    let level = log_level.unwrap_or("info");
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},redb=warn,reqwest=warn")));

    // 文件输出：目录不存在时尝试创建，失败则只输出到 stdout
    let file_writer = log_dir.and_then(|dir| {
        let path = Path::new(dir);
        if let Err(e) = std::fs::create_dir_all(path) {
            eprintln!("Failed to create log directory {}: {}", dir, e);
            return None;
        }
        let appender = tracing_appender::rolling::daily(path, "deal-server.log");
        Some(tracing_appender::non_blocking(appender))
    });
    let (file_writer, guard) = match file_writer {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .with(file_writer.map(|w| {
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(w)
            }))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .with(file_writer.map(|w| {
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(w)
            }))
            .try_init()
    };

    // 重复初始化（测试中常见）不是错误
    if let Err(e) = result {
        eprintln!("Logger already initialized: {}", e);
    }
    guard
}
