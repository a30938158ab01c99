//! Identifier helpers: quoting, naming conventions and path validation.

use std::sync::OnceLock;

use regex::Regex;

/// Quote an SQL identifier with double quotes, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote an SQL identifier with backticks (MySQL).
pub fn quote_ident_mysql(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static identifier regex"))
}

fn path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .expect("static path regex")
    })
}

/// True if `name` is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_match(name)
}

/// True if `path` is a dotted chain of identifiers, e.g. `User.Profile.Age`.
pub fn is_valid_path(path: &str) -> bool {
    path_regex().is_match(path)
}

/// Convert a CamelCase name to snake_case.
///
/// Acronyms are lowered as one word: `HTMLData` becomes `html_data`,
/// `UserName` becomes `user_name`.
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if i > 0
            && c.is_uppercase()
            && (chars.get(i + 1).is_some_and(|n| n.is_lowercase()) || chars[i - 1].is_lowercase())
        {
            out.push('_');
        }
        out.extend(c.to_lowercase());
    }
    out
}
