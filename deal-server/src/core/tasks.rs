//! 后台任务管理
//!
//! 超时扫描、对账、通知监听都注册在这里，共享一个取消令牌。
//!
//! - [`TaskKind::Worker`] - 长期工作者（对账）
//! - [`TaskKind::Listener`] - 事件/通知监听器
//! - [`TaskKind::Periodic`] - 定时任务（超时扫描）
//!
//! Shutdown cancels the token, then gives every task a grace period to
//! finish its current pass. A task still running after that (e.g. stuck in
//! a ledger call) is aborted.

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default time tasks get to stop after cancellation
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Worker,
    Listener,
    Periodic,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Worker => "worker",
            TaskKind::Listener => "listener",
            TaskKind::Periodic => "periodic",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TaskEntry {
    name: &'static str,
    kind: TaskKind,
    handle: JoinHandle<()>,
}

/// Snapshot returned by [`BackgroundTasks::check_health`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskHealth {
    pub running: usize,
    /// Tasks that exited before shutdown (returned or panicked)
    pub stopped: Vec<&'static str>,
}

impl TaskHealth {
    pub fn is_healthy(&self) -> bool {
        self.stopped.is_empty()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// 后台任务管理器
///
/// ```ignore
/// let mut tasks = BackgroundTasks::new();
/// let sweeper = DeadlineSweeper::new(coordinator, interval, tasks.shutdown_token());
/// tasks.spawn("deadline_sweep", TaskKind::Periodic, sweeper.run());
/// tasks.shutdown().await;
/// ```
pub struct BackgroundTasks {
    entries: Vec<TaskEntry>,
    shutdown: CancellationToken,
    grace: Duration,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            shutdown: CancellationToken::new(),
            grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// 任务内部监听 shutdown 信号用
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 注册并启动；panic 被捕获并记录，不会带崩进程
    pub fn spawn<F>(&mut self, name: &'static str, kind: TaskKind, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let token = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(()) if token.is_cancelled() => {
                    tracing::debug!(task = name, kind = %kind, "Background task stopped");
                }
                Ok(()) => {
                    tracing::warn!(task = name, kind = %kind, "Background task completed unexpectedly");
                }
                Err(payload) => {
                    tracing::error!(
                        task = name,
                        kind = %kind,
                        panic = %panic_message(payload.as_ref()),
                        "Background task panicked"
                    );
                }
            }
        });
        tracing::debug!(task = name, kind = %kind, "Registered background task");
        self.entries.push(TaskEntry { name, kind, handle });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn log_summary(&self) {
        let count = |kind| self.entries.iter().filter(|t| t.kind == kind).count();
        tracing::info!(
            total = self.entries.len(),
            worker = count(TaskKind::Worker),
            listener = count(TaskKind::Listener),
            periodic = count(TaskKind::Periodic),
            "Background tasks registered"
        );
    }

    pub fn check_health(&self) -> TaskHealth {
        let mut health = TaskHealth::default();
        for entry in &self.entries {
            if entry.handle.is_finished() {
                tracing::error!(task = entry.name, kind = %entry.kind, "Background task is no longer running");
                health.stopped.push(entry.name);
            } else {
                health.running += 1;
            }
        }
        health
    }

    /// Cancel, then join each task within the shared grace period
    pub async fn shutdown(self) {
        tracing::info!(
            count = self.entries.len(),
            grace_ms = self.grace.as_millis() as u64,
            "Shutting down background tasks"
        );
        self.shutdown.cancel();

        let deadline = Instant::now() + self.grace;
        let mut aborted = 0usize;
        for mut entry in self.entries {
            match tokio::time::timeout_at(deadline, &mut entry.handle).await {
                Ok(Ok(())) => tracing::debug!(task = entry.name, "Task joined"),
                Ok(Err(e)) => tracing::error!(task = entry.name, error = ?e, "Task join failed"),
                Err(_) => {
                    entry.handle.abort();
                    aborted += 1;
                    tracing::warn!(task = entry.name, kind = %entry.kind, "Task ignored shutdown, aborted");
                }
            }
        }

        tracing::info!(aborted, "Background tasks stopped");
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}
