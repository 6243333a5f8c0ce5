//! Local notifiers

use std::io::Write;

use async_trait::async_trait;
use colored::Colorize;
use tracing::info;

use super::error::NotifyError;
use super::traits::{Notification, Notifier};

/// Writes notifications to the log
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, target: &str, notification: Notification) -> Result<Option<String>, NotifyError> {
        info!(
            %target,
            text = notification.text.as_deref().unwrap_or(""),
            files = notification.files.len(),
            "Notification"
        );
        Ok(None)
    }
}

/// Prints progress lines to stdout
#[derive(Debug, Clone, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    fn render(target: &str, notification: &Notification) -> Vec<String> {
        let mut lines = Vec::new();
        let prefix = format!("[{}]", target).cyan().bold();
        if let Some(text) = &notification.text {
            lines.push(format!("{} {}", prefix, text));
        }
        for file in &notification.files {
            lines.push(format!("{} {} {}", prefix, "->".green(), file.display()));
        }
        lines
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, target: &str, notification: Notification) -> Result<Option<String>, NotifyError> {
        let mut stdout = std::io::stdout().lock();
        for line in Self::render(target, &notification) {
            writeln!(stdout, "{}", line)?;
        }
        Ok(None)
    }
}
