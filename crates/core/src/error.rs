use crate::job::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Cannot {action} a run while it is {from}")]
    InvalidTransition {
        from: JobStatus,
        action: &'static str,
    },
}
