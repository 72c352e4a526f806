//! Request header set and response header capture.

use std::collections::{HashMap, HashSet};

/// Ordered request header list with value semantics.
///
/// Entries are full `"Name: Value"` lines in insertion order. Cloning copies
/// the strings; nothing is shared with the original. The engine-side list is
/// rebuilt from scratch each time the set is applied to a handle, so two
/// handles never alias list nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<String>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header by name (ASCII case-insensitive).
    /// Replacement keeps the entry's position. Returns true when an existing
    /// entry was replaced, false when the header was appended.
    pub fn update(&mut self, name: &str, value: &str) -> bool {
        let line = format!("{}: {}", name.trim(), value.trim());
        for entry in &mut self.entries {
            if let Some((n, _)) = entry.split_once(':') {
                if n.trim().eq_ignore_ascii_case(name.trim()) {
                    *entry = line;
                    return true;
                }
            }
        }
        self.entries.push(line);
        false
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The `"Name: Value"` lines in order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Build a fresh engine list from the entries. Always allocates, even
    /// when empty: applying an empty list clears a handle's previous one.
    pub fn to_curl_list(&self) -> Result<curl::easy::List, curl::Error> {
        let mut list = curl::easy::List::new();
        for entry in &self.entries {
            list.append(entry)?;
        }
        Ok(list)
    }
}

/// Response header names to capture, matched case-insensitively.
/// An empty set captures nothing.
#[derive(Debug, Clone, Default)]
pub struct CaptureSet {
    names: HashSet<String>,
}

impl CaptureSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.trim().to_ascii_lowercase())
    }
}

/// Feed one raw response-header line into `captured`.
///
/// An `HTTP/` status line starts a new header block (redirect hop or interim
/// response); anything captured so far is dropped so the map reflects the
/// final response only. Captured names are stored lowercased.
pub fn capture_header_line(set: &CaptureSet, captured: &mut HashMap<String, String>, line: &[u8]) {
    if let Ok(s) = std::str::from_utf8(line) {
        let line = s.trim_end();
        if line.starts_with("HTTP/") {
            captured.clear();
            return;
        }
        if set.is_empty() {
            return;
        }
        if let Some((name, value)) = line.split_once(':') {
            if set.contains(name) {
                captured.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }
    }
}
