use std::fmt::Write as _;

use tidy_types::{HistoryPage, HistoryStatus, PlanOperation, ScanSummary, Task, TaskStatus};

/// Turns successive snapshots of the assistant turn into terminal output.
/// Appends when the new content extends what is on screen, reprints on a
/// fresh line when it was replaced (fallback reply, error text).
#[derive(Debug, Default)]
pub struct ReplyPrinter {
    printed: String,
}

impl ReplyPrinter {
    pub fn update(&mut self, content: &str) -> String {
        if content == self.printed {
            return String::new();
        }
        let out = match content.strip_prefix(self.printed.as_str()) {
            Some(delta) => delta.to_string(),
            None => format!("\n{content}"),
        };
        self.printed = content.to_string();
        out
    }
}

/// Emits one line per visible change of a task snapshot.
#[derive(Debug, Default)]
pub struct ProgressPrinter {
    last: Option<(TaskStatus, u8, Option<String>)>,
}

impl ProgressPrinter {
    pub fn line(&mut self, task: &Task) -> Option<String> {
        let key = (task.status, task.progress, task.current_item.clone());
        if self.last.as_ref() == Some(&key) {
            return None;
        }
        self.last = Some(key);
        Some(format_task_line(task))
    }
}

pub fn format_task_line(task: &Task) -> String {
    let mut line = format!("[{:>3}%] {:<9}", task.progress.min(100), task.status.as_str());
    if let Some(item) = task.current_item.as_deref().or(task.message.as_deref()) {
        line.push(' ');
        line.push_str(item);
    }
    line.trim_end().to_string()
}

pub fn format_scan(scan: &ScanSummary) -> String {
    format!(
        "Scanned {} ({} files, {}) as {}",
        scan.directory,
        scan.total_files,
        human_size(scan.total_size),
        scan.scan_id
    )
}

/// Scan headline, per-extension counts, and how to plan against the scan.
pub fn format_scan_report(scan: &ScanSummary) -> String {
    let mut out = format_scan(scan);
    out.push('\n');
    let mut counts: Vec<_> = scan.by_extension.iter().collect();
    counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (ext, count) in counts {
        let ext = if ext.is_empty() { "(none)" } else { ext.as_str() };
        let _ = writeln!(out, "  {ext:<10} {count:>6}");
    }
    let _ = writeln!(
        out,
        "Plan against this scan with: tidy organize --manual --scan-id {} --dir {} --request <REQUEST>",
        scan.scan_id, scan.directory
    );
    out
}

pub fn format_plan(operations: &[PlanOperation]) -> String {
    if operations.is_empty() {
        return "The plan is empty.".to_string();
    }
    let mut out = format!("Plan ({} operations):\n", operations.len());
    for (index, op) in operations.iter().enumerate() {
        let _ = write!(out, "{:>3}. {:<13} {}", index + 1, op.kind.as_str(), op.source);
        if let Some(target) = &op.target {
            let _ = write!(out, " -> {target}");
        }
        if !op.reason.trim().is_empty() {
            let _ = write!(out, "  ({})", op.reason.trim());
        }
        out.push('\n');
    }
    out
}

pub fn format_result(task: &Task) -> String {
    let mut out = match task.status {
        TaskStatus::Completed => "Done.".to_string(),
        TaskStatus::Failed => format!(
            "Failed: {}",
            task.error.as_deref().unwrap_or("the backend reported a failure")
        ),
        other => format!("Stopped while {}.", other.as_str()),
    };
    if let Some(result) = &task.result {
        let _ = write!(
            out,
            "\n{} of {} operations succeeded ({:.0}%), {} failed",
            result.success_count,
            result.total,
            result.success_rate * 100.0,
            result.failed_count
        );
        if result.skipped_count > 0 {
            let _ = write!(out, ", {} skipped", result.skipped_count);
        }
        if result.duration_secs > 0.0 {
            let _ = write!(out, " in {:.1}s", result.duration_secs);
        }
        for error in &result.errors {
            let _ = write!(out, "\n  ! {error}");
        }
    } else if let Some(message) = task.message.as_deref() {
        let _ = write!(out, "\n{message}");
    }
    out
}

pub fn format_history(page: &HistoryPage) -> String {
    if page.operations.is_empty() {
        return "No operations recorded.".to_string();
    }
    let mut out = format!(
        "Page {} ({} of {} operations){}\n",
        page.page,
        page.operations.len(),
        page.total,
        if page.can_undo { ", undo available" } else { "" }
    );
    for entry in &page.operations {
        let mark = match entry.status {
            HistoryStatus::Success => "ok",
            HistoryStatus::Failed => "!!",
        };
        let _ = write!(
            out,
            "{} {} {:<13} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            mark,
            entry.kind,
            entry.source
        );
        if let Some(target) = &entry.target {
            let _ = write!(out, " -> {target}");
        }
        if let Some(error) = &entry.error {
            let _ = write!(out, "  [{error}]");
        }
        out.push('\n');
    }
    out
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
