//! One-line text renderings for the log output.

use briefing_core::{JobState, JobStatus};
use briefing_events::{Notification, Urgency};

/// `running [3/10 30%] fetch`, `completed [10/10 100%]`, `error: IMAP timeout`.
pub fn format_progress(state: &JobState) -> String {
    if state.status == JobStatus::Error {
        let message = state.error_message.as_deref().unwrap_or("unknown error");
        return format!("error: {message}");
    }
    if state.status == JobStatus::Idle {
        return "idle".to_string();
    }

    let mut line = format!("{}", state.status);
    if state.total_steps > 0 {
        let percent = u64::from(state.progress) * 100 / u64::from(state.total_steps);
        line.push_str(&format!(" [{}/{} {percent}%]", state.progress, state.total_steps));
    } else if state.progress > 0 {
        line.push_str(&format!(" [{}]", state.progress));
    }
    if !state.current_step.is_empty() {
        line.push(' ');
        line.push_str(&state.current_step);
    }
    line
}

/// `[blocking] Processing failed: IMAP timeout`.
pub fn format_notification(notification: &Notification) -> String {
    let urgency = match notification.urgency {
        Urgency::Dismissible => "info",
        Urgency::Persistent => "persistent",
        Urgency::Blocking => "blocking",
    };
    format!("[{urgency}] {}", notification.message)
}
