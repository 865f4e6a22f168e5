//! Optional start request taken from the environment.
//!
//! | Variable                   | Default | Description                        |
//! |----------------------------|---------|------------------------------------|
//! | `BRIEFING_START`           | `false` | Start a run once connected          |
//! | `BRIEFING_FORCE_REPROCESS` | `false` | Reprocess already summarized items |
//! | `BRIEFING_MAX_ITEMS`       | --      | Cap on items for the run           |

use briefing_realtime::api::StartOptions;

/// Start options if `BRIEFING_START` asks for a run, `None` otherwise.
pub fn from_env() -> Result<Option<StartOptions>, TriggerError> {
    from_lookup(|key| std::env::var(key).ok())
}

pub fn from_lookup<F>(lookup: F) -> Result<Option<StartOptions>, TriggerError>
where
    F: Fn(&str) -> Option<String>,
{
    if !flag(&lookup, "BRIEFING_START")? {
        return Ok(None);
    }
    let max_items = match lookup("BRIEFING_MAX_ITEMS") {
        Some(raw) => Some(
            raw.trim()
                .parse()
                .map_err(|e| TriggerError::Invalid {
                    key: "BRIEFING_MAX_ITEMS",
                    reason: format!("`{raw}`: {e}"),
                })?,
        ),
        None => None,
    };
    Ok(Some(StartOptions {
        force_reprocess: flag(&lookup, "BRIEFING_FORCE_REPROCESS")?,
        max_items,
    }))
}

fn flag<F>(lookup: &F, key: &'static str) -> Result<bool, TriggerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("no") => Ok(false),
        Some(other) => Err(TriggerError::Invalid {
            key,
            reason: format!("expected a boolean, got `{other}`"),
        }),
    }
}

/// Errors raised while reading the start trigger.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
