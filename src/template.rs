// src/template.rs

//! `{{name}}` template expansion against a [`Variables`] mapping.
//!
//! Expansion is a single pass: a variable whose value itself contains
//! `{{...}}` is inserted verbatim and never expanded again. Unknown names
//! are left untouched.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::model::Variables;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("token pattern is valid"));

/// Replace every `{{name}}` in `template` with the value of `name`.
pub fn substitute(template: &str, variables: &Variables) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    TOKEN
        .replace_all(template, |caps: &Captures<'_>| {
            match variables.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
