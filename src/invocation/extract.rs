// src/invocation/extract.rs

//! Regex extraction of argument values from captured output.

use regex::Regex;

use crate::errors::{JobdagError, Result};

/// Compile an argument's regex, mapping failures to [`JobdagError::InvalidRegex`].
pub fn compile(argument: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| JobdagError::InvalidRegex {
        argument: argument.to_string(),
        message: e.to_string(),
    })
}

/// Apply `re` to `text`.
///
/// Returns the first capture group if the pattern has one (an empty or
/// non-participating group yields `""`), otherwise the whole match. `None`
/// means no match at all.
pub fn extract(re: &Regex, text: &str) -> Option<String> {
    let caps = re.captures(text)?;
    if re.captures_len() > 1 {
        Some(caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default())
    } else {
        caps.get(0).map(|m| m.as_str().to_string())
    }
}

/// Try a regex against sample text (the "test regex" operation).
pub fn test_extraction(pattern: &str, text: &str) -> Result<Option<String>> {
    let re = compile("<test>", pattern)?;
    Ok(extract(&re, text))
}
