//! Formatting utilities for CLI output.

use crate::dbus::{InterfaceTable, PropertyMap, Value};

/// ANSI color codes for terminal output
pub struct Colors;

impl Colors {
    /// Reset all formatting
    pub const RESET: &'static str = "\x1b[0m";
    /// Bold text
    pub const BOLD: &'static str = "\x1b[1m";
    /// Dim text
    pub const DIM: &'static str = "\x1b[2m";

    /// Red color
    pub const RED: &'static str = "\x1b[31m";
    /// Green color
    pub const GREEN: &'static str = "\x1b[32m";
    /// Yellow color
    pub const YELLOW: &'static str = "\x1b[33m";
    /// Cyan color
    pub const CYAN: &'static str = "\x1b[36m";
}

/// Formats section headers with styling
pub fn format_header(text: &str) -> String {
    format!("{}{}{}{}", Colors::BOLD, Colors::CYAN, text, Colors::RESET)
}

/// Formats subheaders with styling
pub fn format_subheader(text: &str) -> String {
    format!(
        "{}{}{}{}",
        Colors::BOLD,
        Colors::YELLOW,
        text,
        Colors::RESET
    )
}

/// Formats member names with styling
pub fn format_member(text: &str) -> String {
    format!("{}{}{}", Colors::GREEN, text, Colors::RESET)
}

/// Formats signatures and other secondary detail with muted styling
pub fn format_description(text: &str) -> String {
    format!("{}{}{}", Colors::DIM, text, Colors::RESET)
}

/// Formats error messages with red styling
pub fn format_error(text: &str) -> String {
    format!("{}{}{}{}", Colors::BOLD, Colors::RED, text, Colors::RESET)
}

/// Formats a bus value for human-readable output.
///
/// Scalars print as-is; containers print inline up to a few entries and
/// otherwise only show their size.
///
/// ```
/// use supervisor_bus::{cli::formatting::format_value, dbus::Value};
///
/// assert_eq!(format_value(&Value::from("hello")), "\"hello\"");
/// assert_eq!(format_value(&Value::U32(42)), "42");
/// ```
pub fn format_value(value: &Value) -> String {
    const INLINE_LIMIT: usize = 8;

    match value {
        Value::Array { items, .. } if items.len() > INLINE_LIMIT => {
            format!("[{} items]", items.len())
        }
        Value::Dict { entries, .. } if entries.len() > INLINE_LIMIT => {
            format!("{{{} entries}}", entries.len())
        }
        Value::Variant(inner) => format_value(inner),
        other => other.to_string(),
    }
}

/// One `name = value` line per property, sorted by name.
pub fn format_properties(properties: &PropertyMap) -> String {
    let width = properties.keys().map(String::len).max().unwrap_or(0);
    properties
        .iter()
        .map(|(name, value)| format!("  {name:<width$} = {}", format_value(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lists the methods, properties and signals of one interface.
pub fn format_interface(table: &InterfaceTable) -> String {
    let mut output = format_subheader(&table.name);

    for (name, method) in &table.methods {
        output.push_str(&format!(
            "\n  method   {}({}) {}",
            format_member(name),
            method.inputs,
            format_description(&format!("-> ({})", method.outputs))
        ));
    }
    for (name, property) in &table.properties {
        output.push_str(&format!(
            "\n  property {} {}",
            format_member(name),
            format_description(&format!("{} {:?}", property.signature, property.access))
        ));
    }
    for (name, signature) in &table.signals {
        output.push_str(&format!(
            "\n  signal   {}({signature})",
            format_member(name)
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_arrays_are_summarised() {
        let value = Value::array("u", (0..20).map(Value::U32).collect());
        assert_eq!(format_value(&value), "[20 items]");
    }

    #[test]
    fn properties_are_aligned() {
        let properties: PropertyMap = [
            (String::from("A"), Value::U32(1)),
            (String::from("Long"), Value::Bool(true)),
        ]
        .into_iter()
        .collect();

        assert_eq!(format_properties(&properties), "  A    = 1\n  Long = true");
    }
}
