//! System instruction construction from the tool catalog
//!
//! The model never sees the bridge directly — it learns which servers and
//! tools exist from the instruction built here, and it is told to answer in
//! the JSON envelope the response parser expects. Instruction and catalog
//! are always rebuilt together so they cannot drift apart.

use crate::bridge::ToolCatalog;
use serde_json::Value;
use std::fmt::Write;

/// Protocol preamble establishing the reply envelope and tool-use rules
const BASE_INSTRUCTION: &str = r#"You are an AI assistant that uses available tools to help users accomplish tasks.
When responding, you must ALWAYS return answers in the following JSON format:
{
  "tool_call": {
    "server_id": "string or null",
    "tool_name": "string or null",
    "parameters": {} or null
  },
  "response": "string"
}

If you need to use a tool, fill in the server_id, tool_name, and parameters fields.
If you don't need to use a tool, set server_id, tool_name, and parameters to null.

Your response field should always contain your message to the user.

When a user asks for something that requires using these tools:
1. Figure out which tool is most appropriate
2. Format a proper JSON response with the tool_call filled in
3. Make your response helpful and conversational

When you receive feedback about a tool execution:
1. If you need to make another tool call based on the previous result, include it in your tool_call
2. If no more calls are needed, set server_id, tool_name, and parameters to null
3. Provide a helpful message about the final result in the response field

IMPORTANT: Some tool operations require explicit user confirmation for security
reasons. If an operation is waiting on confirmation or was cancelled by the user,
acknowledge that plainly and do not retry the same call on your own."#;

/// Build the full system instruction for a session
pub fn build_system_instruction(catalog: &ToolCatalog) -> String {
    format!(
        "{BASE_INSTRUCTION}\n\nHere's information about all the tools you can use:\n\n{}",
        describe_catalog(catalog)
    )
}

/// Render the catalog as markdown, one section per server
fn describe_catalog(catalog: &ToolCatalog) -> String {
    if catalog.is_empty() {
        return "No tool servers are currently available.".to_string();
    }

    let mut out = String::from("Available tools by server:\n\n");
    for (server_id, tools) in catalog {
        let _ = writeln!(out, "## Server: {server_id}\n");
        for tool in tools {
            let _ = writeln!(out, "### {}", tool.name);
            let _ = writeln!(
                out,
                "Description: {}",
                tool.description.as_deref().unwrap_or("No description")
            );
            if let Some(schema) = &tool.input_schema {
                describe_schema(&mut out, schema);
            }
            out.push('\n');
        }
    }
    out
}

/// Render a JSON schema's parameters as bullet points
fn describe_schema(out: &mut String, schema: &Value) {
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        out.push_str("Parameters:\n");
        for (param, details) in properties {
            let param_type = details
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("any");
            let param_desc = details
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("");
            let _ = writeln!(out, "- {param} ({param_type}): {param_desc}");
        }
    }
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let names: Vec<&str> = required.iter().filter_map(Value::as_str).collect();
        if !names.is_empty() {
            let _ = writeln!(out, "Required parameters: {}", names.join(", "));
        }
    }
}
