//! Case-insensitive HTTP header multimap
//!
//! Names are normalized to lowercase for storage and restored to canonical
//! `Word-Word` casing when written to the wire. Multiple values per name
//! keep insertion order.

use std::collections::HashMap;

/// HTTP header collection
#[derive(Debug, Clone, Default)]
pub struct Headers {
    map: HashMap<String, Vec<String>>,
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

// Names whose canonical form doesn't follow Word-Word capitalization.
const CASING_OVERRIDES: &[(&str, &str)] = &[
    ("sec-websocket-accept", "Sec-WebSocket-Accept"),
    ("sec-websocket-extensions", "Sec-WebSocket-Extensions"),
    ("sec-websocket-key", "Sec-WebSocket-Key"),
    ("sec-websocket-protocol", "Sec-WebSocket-Protocol"),
    ("sec-websocket-version", "Sec-WebSocket-Version"),
];

fn restore_name(name: &str) -> String {
    if let Some((_, canonical)) = CASING_OVERRIDES.iter().find(|(lower, _)| *lower == name) {
        return (*canonical).to_string();
    }
    let mut restored = String::with_capacity(name.len());
    let mut uppercase_next = true;
    for c in name.chars() {
        if uppercase_next {
            restored.extend(c.to_uppercase());
        } else {
            restored.push(c);
        }
        uppercase_next = c == '-';
    }
    restored
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Append a value under the given name
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.map
            .entry(normalize_name(name))
            .or_default()
            .push(value.into());
    }

    /// Parse and append a raw `Name: value` header line
    ///
    /// A line without a colon stores the whole line as a name with an empty
    /// value; the value side is trimmed.
    pub fn add_line(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        match line.find(':') {
            Some(delimiter) => {
                let name = &line[..delimiter];
                let value = line[delimiter + 1..].trim().to_string();
                self.add(name, value);
            }
            None => self.add(line, ""),
        }
    }

    /// All values stored under a name, in insertion order
    pub fn get(&self, name: &str) -> &[String] {
        self.map
            .get(&normalize_name(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First value stored under a name
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.get(name).first().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&normalize_name(name))
    }

    /// Iterate `(canonical name, value)` pairs for wire output
    pub fn iter(&self) -> impl Iterator<Item = (String, &str)> + '_ {
        self.map.iter().flat_map(|(name, values)| {
            let restored = restore_name(name);
            values
                .iter()
                .map(move |value| (restored.clone(), value.as_str()))
        })
    }
}
