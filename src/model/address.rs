//! Mailbox addresses as they appear in `From:` (RFC 5322 §3.4).

/// One address with its optional display name.
///
/// `"Report Bot <expected@x.com>"` parses to `display_name = "Report Bot"`,
/// `address = "expected@x.com"`; a bare `"expected@x.com"` has an empty name.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    pub display_name: String,
    /// `local@domain`, as written (case preserved).
    pub address: String,
}

impl EmailAddress {
    /// Parse one `name-addr` or `addr-spec`. Returns `None` for blank input.
    ///
    /// Input that is not in angle-bracket form is taken verbatim as the address.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let bracketed = raw
            .rfind('<')
            .and_then(|open| raw[open..].find('>').map(|len| (open, open + len)));

        let (display_name, address) = match bracketed {
            Some((open, close)) => (unquote(&raw[..open]), raw[open + 1..close].trim()),
            None => (String::new(), raw),
        };

        if address.is_empty() {
            return None;
        }
        Some(Self {
            display_name,
            address: address.to_string(),
        })
    }

    /// First address of a comma-separated list. Commas inside quoted display
    /// names or angle brackets do not split.
    pub fn first_of_list(raw: &str) -> Option<Self> {
        let mut quoted = false;
        let mut depth = 0usize;
        let mut start = 0;

        for (i, ch) in raw.char_indices() {
            match ch {
                '"' => quoted = !quoted,
                '<' if !quoted => depth += 1,
                '>' if !quoted => depth = depth.saturating_sub(1),
                ',' if !quoted && depth == 0 => {
                    if let Some(addr) = Self::parse(&raw[start..i]) {
                        return Some(addr);
                    }
                    start = i + 1;
                }
                _ => {}
            }
        }
        Self::parse(&raw[start..])
    }

    /// Case-insensitive comparison of the bare address, ignoring the display name.
    pub fn is_same_mailbox(&self, other: &str) -> bool {
        self.address.trim().to_lowercase() == other.trim().to_lowercase()
    }
}

fn unquote(name: &str) -> String {
    let name = name.trim();
    name.strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .unwrap_or(name)
        .trim()
        .to_string()
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.display_name.as_str() {
            "" => f.write_str(&self.address),
            name => write!(f, "{name} <{}>", self.address),
        }
    }
}
