//! Plain-text rendering for CLI output.

use crate::core::config::Config;
use crate::mcp::capability::{CapabilityDescriptor, CapabilityKind};
use crate::mcp::content::{ContentBlock, InvocationResult, PromptResult};
use crate::mcp::events::{BridgeEvent, InvocationOutcome};

pub fn render_peers(config: &Config) -> String {
    if config.peers.is_empty() {
        return "No peers configured.\n".to_string();
    }
    let width = config
        .peers
        .iter()
        .map(|peer| peer.id.len())
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    for peer in &config.peers {
        let transport = peer.transport.as_deref().unwrap_or("streamable-http");
        let target = if transport == "stdio" {
            peer.command.clone().unwrap_or_default()
        } else {
            peer.base_url.clone().unwrap_or_default()
        };
        let disabled = if peer.is_enabled() { "" } else { " (disabled)" };
        let name = if peer.display_name.is_empty() {
            peer.id.as_str()
        } else {
            peer.display_name.as_str()
        };
        out.push_str(&format!(
            "{:<width$}  {name}  [{transport}] {target}{disabled}\n",
            peer.id
        ));
    }
    out
}

pub fn render_descriptors(kind: CapabilityKind, entries: &[CapabilityDescriptor]) -> String {
    if entries.is_empty() {
        return format!("No {}s.\n", kind.label());
    }
    let mut out = String::new();
    for entry in entries {
        match kind {
            CapabilityKind::Resource => {
                out.push_str(entry.key());
                if entry.key() != entry.name {
                    out.push_str(&format!(" ({})", entry.name));
                }
                if let Some(mime_type) = &entry.mime_type {
                    out.push_str(&format!(" [{mime_type}]"));
                }
            }
            _ => out.push_str(&entry.name),
        }
        if !entry.description.is_empty() {
            out.push_str(&format!("  {}", entry.description));
        }
        out.push('\n');
        for param in &entry.parameters {
            let type_name = param.type_hint.schema_type().unwrap_or("any");
            let required = if param.required { ", required" } else { "" };
            out.push_str(&format!("    {} ({type_name}{required})", param.name));
            if let Some(description) = &param.description {
                out.push_str(&format!("  {description}"));
            }
            out.push('\n');
        }
    }
    out
}

fn render_block(block: &ContentBlock) -> String {
    match block {
        ContentBlock::Text(text) => text.clone(),
        ContentBlock::Image { mime_type, .. } => {
            format!("[image {mime_type}, {}]", byte_count(block))
        }
        ContentBlock::Binary { mime_type, uri, .. } => {
            let mut label = String::from("[binary");
            if let Some(uri) = uri {
                label.push_str(&format!(" {uri}"));
            }
            if let Some(mime_type) = mime_type {
                label.push_str(&format!(" {mime_type}"));
            }
            format!("{label}, {}]", byte_count(block))
        }
        ContentBlock::Other(value) => value.to_string(),
    }
}

fn byte_count(block: &ContentBlock) -> String {
    match block.decode_bytes() {
        Some(Ok(bytes)) => format!("{} bytes", bytes.len()),
        _ => "undecodable".to_string(),
    }
}

/// Every content block on its own line; structured content is appended as JSON.
pub fn render_result(result: &InvocationResult) -> String {
    let mut lines: Vec<String> = result.content.iter().map(render_block).collect();
    if let Some(structured) = &result.structured_content {
        lines.push(structured.to_string());
    }
    if lines.is_empty() {
        lines.push(result.as_text());
    }
    lines.join("\n")
}

pub fn render_prompt(prompt: &PromptResult) -> String {
    if prompt.is_error {
        return prompt.description.clone().unwrap_or_default();
    }
    let mut out = String::new();
    if let Some(description) = &prompt.description {
        out.push_str(description);
        out.push_str("\n\n");
    }
    let messages: Vec<String> = prompt
        .messages
        .iter()
        .map(|message| format!("{}: {}", message.role.as_str(), render_block(&message.content)))
        .collect();
    out.push_str(&messages.join("\n"));
    out
}

/// One line per event worth showing while watching; invocation events are skipped.
pub fn render_event(event: &BridgeEvent) -> Option<String> {
    match event {
        BridgeEvent::ChangeRecorded(change) => {
            let mut line = format!(
                "#{} {} {} {}",
                change.sequence,
                change.timestamp.format("%H:%M:%S"),
                change.kind,
                change.change_type
            );
            if change.is_detailed() {
                let names: Vec<&str> = change.affected_names.iter().map(String::as_str).collect();
                line.push_str(&format!(" [{}]", names.join(", ")));
            }
            if let Some(description) = &change.description {
                line.push_str(&format!(" {description}"));
            }
            Some(line)
        }
        BridgeEvent::CacheInvalidated { kind, names, .. } => {
            Some(format!("  {kind} cache: marked stale {}", names.join(", ")))
        }
        BridgeEvent::CacheRefreshed { kind, entries, .. } => {
            Some(format!("  {kind} cache: refreshed, {entries} entries"))
        }
        BridgeEvent::RefreshFailed { kind, message, .. } => {
            Some(format!("  {kind} cache: refresh failed, keeping previous entries ({message})"))
        }
        BridgeEvent::InvocationFinished {
            outcome: InvocationOutcome::Fault,
            kind,
            name,
            ..
        } => Some(format!("  {kind} {name}: fault")),
        BridgeEvent::InvocationStarted { .. } | BridgeEvent::InvocationFinished { .. } => None,
    }
}
