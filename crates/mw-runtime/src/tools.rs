use anyhow::Result;
use mw_core::{matches_filter, EnvError, LookupKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const HTML_DOCUMENT_PREFIX: &str = "<!DOCTYPE html>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ToolParameter>,
    /// Provider that serves this tool; filled in by the catalog.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
}

impl ToolDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: BTreeMap::new(),
            provider: String::new(),
        }
    }

    /// Reads parameters out of a JSON-Schema `object` description.
    pub fn from_input_schema(
        name: impl Into<String>,
        description: Option<String>,
        schema: &Value,
    ) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        let parameters = schema
            .get("properties")
            .and_then(|v| v.as_object())
            .map(|props| {
                props
                    .iter()
                    .map(|(param, spec)| {
                        let kind = spec
                            .get("type")
                            .and_then(|t| t.as_str())
                            .unwrap_or("any")
                            .to_string();
                        let description = spec
                            .get("description")
                            .and_then(|d| d.as_str())
                            .map(str::to_string);
                        (
                            param.clone(),
                            ToolParameter {
                                kind,
                                description,
                                required: required.contains(&param.as_str()),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            name: name.into(),
            description,
            parameters,
            provider: String::new(),
        }
    }
}

/// A source of tools the agent may call besides touching the screen.
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;
    fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;
    fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value>;
}

/// Every tool across all providers, each routed to exactly one provider.
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    routes: HashMap<String, Arc<dyn ToolProvider>>,
}

impl ToolCatalog {
    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            routes: HashMap::new(),
        }
    }

    /// Lists every provider once. A provider that cannot list its tools fails the load.
    pub fn load(providers: Vec<Arc<dyn ToolProvider>>) -> Result<Self, EnvError> {
        let mut catalog = Self::empty();
        for provider in providers {
            let listed = provider.list_tools().map_err(|err| {
                EnvError::transport(format!("failed to list tools from {}", provider.name()), err)
            })?;
            for mut tool in listed {
                if catalog.routes.contains_key(&tool.name) {
                    tracing::warn!(
                        tool = %tool.name,
                        provider = provider.name(),
                        "duplicate tool name; keeping the first provider"
                    );
                    continue;
                }
                tool.provider = provider.name().to_string();
                catalog.routes.insert(tool.name.clone(), Arc::clone(&provider));
                catalog.tools.push(tool);
            }
        }
        tracing::debug!(
            count = catalog.tools.len(),
            tools = ?catalog.names(),
            "loaded tool catalog"
        );
        Ok(catalog)
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Result<&ToolDescriptor, EnvError> {
        self.tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| EnvError::not_found(LookupKind::Tool, name, self.names()))
    }

    /// Tools whose name contains any of `filters`, in catalog order.
    pub fn filtered(&self, filters: &[String]) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .filter(|tool| filters.iter().any(|f| matches_filter(&tool.name, f)))
            .cloned()
            .collect()
    }

    pub fn call(&self, name: &str, arguments: &Value) -> Result<Value, EnvError> {
        let provider = self
            .routes
            .get(name)
            .ok_or_else(|| EnvError::not_found(LookupKind::Tool, name, self.names()))?;
        provider
            .call_tool(name, arguments)
            .map_err(|err| EnvError::transport(format!("tool call {} failed", name), err))
    }
}

/// Tools whose name contains `name_filter`, sorted by name.
pub fn list_tools(catalog: &ToolCatalog, name_filter: Option<&str>) -> Vec<ToolDescriptor> {
    let mut tools: Vec<ToolDescriptor> = catalog
        .tools()
        .iter()
        .filter(|tool| name_filter.map_or(true, |f| matches_filter(&tool.name, f)))
        .cloned()
        .collect();
    tools.sort_by(|a, b| a.name.cmp(&b.name));
    tools
}

pub fn get_tool_info(catalog: &ToolCatalog, name: &str) -> Result<ToolDescriptor, EnvError> {
    catalog.get(name).cloned()
}

/// Replaces full HTML documents in a tool result's text with plain text.
///
/// Handles both a top-level `text` field and MCP `content[].text` items.
pub fn condense_tool_result(mut result: Value) -> Value {
    condense_text_field(&mut result);
    if let Some(items) = result.get_mut("content").and_then(|c| c.as_array_mut()) {
        for item in items {
            condense_text_field(item);
        }
    }
    result
}

fn condense_text_field(value: &mut Value) {
    if let Some(Value::String(text)) = value.get_mut("text") {
        if text.starts_with(HTML_DOCUMENT_PREFIX) {
            *text = html_to_text(text);
        }
    }
}

/// Strips tags, drops `<script>`/`<style>` bodies, decodes common entities.
pub fn html_to_text(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut chars = html.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch == '<' {
            let tag_start: String = chars.clone().take(20).collect::<String>().to_lowercase();
            if tag_start.starts_with("<script") {
                skip_until_closing_tag(&mut chars, "script");
                result.push(' ');
                continue;
            }
            if tag_start.starts_with("<style") {
                skip_until_closing_tag(&mut chars, "style");
                result.push(' ');
                continue;
            }
            let is_block = ["<br", "<p", "</p", "<li", "<div", "</div", "<h", "</h", "<tr"]
                .iter()
                .any(|prefix| tag_start.starts_with(prefix));
            for c in chars.by_ref() {
                if c == '>' {
                    break;
                }
            }
            result.push(if is_block { '\n' } else { ' ' });
        } else if ch == '&' {
            result.push_str(&decode_html_entity(&mut chars));
        } else {
            result.push(ch);
            chars.next();
        }
    }

    collapse_whitespace(&result)
}

fn skip_until_closing_tag(chars: &mut std::iter::Peekable<std::str::Chars>, tag: &str) {
    let close = format!("</{tag}>");
    let mut tail = String::new();
    for c in chars.by_ref() {
        tail.push(c.to_ascii_lowercase());
        if tail.len() > close.len() {
            tail.remove(0);
        }
        if tail == close {
            return;
        }
    }
}

fn decode_html_entity(chars: &mut std::iter::Peekable<std::str::Chars>) -> String {
    chars.next();
    let mut entity = String::new();
    while let Some(&c) = chars.peek() {
        if c == ';' {
            chars.next();
            break;
        }
        if !(c.is_ascii_alphanumeric() || c == '#') || entity.len() > 10 {
            return format!("&{entity}");
        }
        entity.push(c);
        chars.next();
    }
    match entity.as_str() {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" => "'".to_string(),
        "nbsp" => " ".to_string(),
        _ if entity.starts_with('#') => {
            decode_numeric_entity(&entity[1..]).unwrap_or_else(|| format!("&{entity};"))
        }
        _ => format!("&{entity};"),
    }
}

fn decode_numeric_entity(s: &str) -> Option<String> {
    let code = if let Some(hex) = s.strip_prefix('x').or_else(|| s.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        s.parse::<u32>().ok()?
    };
    char::from_u32(code).map(|c| c.to_string())
}

/// Collapses runs of spaces within lines and drops blank lines.
fn collapse_whitespace(s: &str) -> String {
    s.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
