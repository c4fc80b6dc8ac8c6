use std::error::Error as StdError;
use std::fmt;

/// Request-level failures surfaced to the caller.
///
/// Tool execution failures are deliberately absent: they are absorbed into
/// the conversation as tool-result content so the model can react to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Unknown agent, provider, or MCP server id. Maps to HTTP 400.
    Configuration(String),

    /// Provider or MCP connection failure. Maps to HTTP 500 or a terminal
    /// error frame on an already-open stream.
    Transport(String),

    /// The model requested a tool that is not in the active tool set. No
    /// safe continuation exists, so the request fails.
    UnresolvedTool { tool: String },
}

impl GatewayError {
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::Configuration(_) => 400,
            GatewayError::Transport(_) | GatewayError::UnresolvedTool { .. } => 500,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Configuration(message) => {
                write!(f, "Configuration error: {}", message)
            }
            GatewayError::Transport(message) => write!(f, "Transport error: {}", message),
            GatewayError::UnresolvedTool { tool } => {
                write!(f, "Model requested unknown tool '{}'", tool)
            }
        }
    }
}

impl StdError for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_map_to_bad_request() {
        let err = GatewayError::Configuration("Agent 'nope' not found".to_string());
        assert_eq!(err.http_status(), 400);
        assert_eq!(
            err.to_string(),
            "Configuration error: Agent 'nope' not found"
        );
    }

    #[test]
    fn transport_and_tool_errors_map_to_server_error() {
        assert_eq!(
            GatewayError::Transport("connection reset".to_string()).http_status(),
            500
        );
        assert_eq!(
            GatewayError::UnresolvedTool {
                tool: "search_google".to_string()
            }
            .http_status(),
            500
        );
    }
}
