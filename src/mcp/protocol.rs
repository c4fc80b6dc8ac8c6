//! JSON-RPC message parsing shared by both MCP transports.

use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{
    CallToolResult, ClientCapabilities, Implementation, InitializeRequestParams, InitializeResult,
    ListToolsResult, RpcError, LATEST_PROTOCOL_VERSION,
};
use serde_json::Value;

use crate::core::config::McpServerConfig;

pub fn requested_protocol_version(config: &McpServerConfig) -> String {
    config
        .protocol_version
        .clone()
        .unwrap_or_else(|| LATEST_PROTOCOL_VERSION.to_string())
}

pub fn client_details_for(config: &McpServerConfig) -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "toolgate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Toolgate MCP Client".to_string()),
            description: Some("Toolgate MCP client runtime".to_string()),
            icons: Vec::new(),
            website_url: None,
        },
        meta: None,
        protocol_version: requested_protocol_version(config),
    }
}

pub fn parse_initialize_result(message: ServerMessage) -> Result<InitializeResult, String> {
    let value = parse_response_value(message)?;
    let result =
        serde_json::from_value::<InitializeResult>(value).map_err(|err| err.to_string())?;
    if result.protocol_version.trim().is_empty() {
        return Err("Unexpected initialize response.".to_string());
    }
    Ok(result)
}

pub fn parse_list_tools(message: ServerMessage) -> Result<ListToolsResult, String> {
    parse_response(message)
}

pub fn parse_call_tool(message: ServerMessage) -> Result<CallToolResult, String> {
    parse_response(message)
}

fn parse_response<T: serde::de::DeserializeOwned>(message: ServerMessage) -> Result<T, String> {
    let value = parse_response_value(message)?;
    serde_json::from_value::<T>(value).map_err(|err| err.to_string())
}

pub fn parse_response_value(message: ServerMessage) -> Result<Value, String> {
    match message {
        ServerMessage::Response(response) => {
            serde_json::to_value(&response.result).map_err(|err| err.to_string())
        }
        ServerMessage::Error(error) => Err(format_rpc_error(&error.error)),
        other => Err(format_unexpected_server_message(&other)),
    }
}

pub fn format_rpc_error(error: &RpcError) -> String {
    format!("MCP server error {}: {}", error.code, error.message)
}

fn format_unexpected_server_message(message: &ServerMessage) -> String {
    match message {
        ServerMessage::Request(_) => "Unexpected MCP server request.".to_string(),
        ServerMessage::Notification(_) => "Unexpected MCP server notification.".to_string(),
        _ => "Unexpected MCP server message.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_initialize_rejects_blank_protocol_version() {
        let message = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "capabilities": {},
                "protocolVersion": " ",
                "serverInfo": {"name": "x", "version": "1.0.0"}
            }
        }))
        .expect("message should parse");

        assert!(parse_initialize_result(message).is_err());
    }

    #[test]
    fn parse_list_tools_reads_tool_manifest() {
        let message = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {
                "tools": [{
                    "name": "lookup",
                    "description": "Looks things up",
                    "inputSchema": {"type": "object"}
                }]
            }
        }))
        .expect("message should parse");

        let list = parse_list_tools(message).unwrap();
        assert_eq!(list.tools.len(), 1);
        assert_eq!(list.tools[0].name, "lookup");
    }

    #[test]
    fn rpc_errors_surface_with_code_and_message() {
        let message = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {"code": -32000, "message": "nope"}
        }))
        .expect("message should parse");

        let err = parse_response_value(message).unwrap_err();
        assert_eq!(err, "MCP server error -32000: nope");
    }
}
