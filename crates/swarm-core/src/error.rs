/// Error kinds surfaced at the CLI and MCP tool boundaries.
///
/// Only `Config` and `BeforeCommand` abort the orchestrator itself; the
/// execution-side kinds are returned to the calling agent as tool failures.
#[derive(thiserror::Error, Debug)]
pub enum SwarmError {
    #[error("{0}")]
    Config(String),

    #[error("Before command failed: `{command}` exited with status {status}")]
    BeforeCommand { command: String, status: i32 },

    #[error("Agent execution failed: {0}")]
    Execution(String),

    #[error("Agent output stream ended without a result event")]
    Parse,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl SwarmError {
    /// Shorthand for a validation failure with a preformatted message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_config() {
        let err = SwarmError::config("Main instance 'lead' not found in instances");
        assert_eq!(
            err.to_string(),
            "Main instance 'lead' not found in instances"
        );
    }

    #[test]
    fn test_display_before_command() {
        let err = SwarmError::BeforeCommand {
            command: "npm install".into(),
            status: 127,
        };
        assert_eq!(
            err.to_string(),
            "Before command failed: `npm install` exited with status 127"
        );
    }

    #[test]
    fn test_display_execution() {
        let err = SwarmError::Execution("claude exited with code 1: boom".into());
        assert_eq!(
            err.to_string(),
            "Agent execution failed: claude exited with code 1: boom"
        );
    }

    #[test]
    fn test_display_parse() {
        assert_eq!(
            SwarmError::Parse.to_string(),
            "Agent output stream ended without a result event"
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SwarmError>();
    }
}
