use std::fmt;

/// Upper-case letters folded by [`Locator::text_ci`], including the
/// Portuguese accented vowels and cedilla.
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZÁÀÂÃÉÊÍÓÔÕÚÇ";
const LOWER: &str = "abcdefghijklmnopqrstuvwxyzáàâãéêíóôõúç";

/// An element lookup strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    /// Innermost elements whose normalized text contains `text`.
    pub fn text(text: &str) -> Self {
        let lit = xpath_literal(text);
        Self::XPath(format!(
            "//*[contains(normalize-space(.), {lit}) and not(*[contains(normalize-space(.), {lit})])]"
        ))
    }

    /// Case-insensitive variant of [`Locator::text`].
    pub fn text_ci(text: &str) -> Self {
        let lit = xpath_literal(&text.to_lowercase());
        let folded = format!("translate(normalize-space(.), '{UPPER}', '{LOWER}')");
        Self::XPath(format!(
            "//*[contains({folded}, {lit}) and not(*[contains({folded}, {lit})])]"
        ))
    }

    /// The `using` value of the W3C "find elements" command.
    pub(crate) fn strategy(&self) -> &'static str {
        match self {
            Self::Css(_) => "css selector",
            Self::XPath(_) => "xpath",
        }
    }

    pub(crate) fn value(&self) -> &str {
        match self {
            Self::Css(v) | Self::XPath(v) => v,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(v) => write!(f, "css `{v}`"),
            Self::XPath(v) => write!(f, "xpath `{v}`"),
        }
    }
}

/// Quote `text` as an XPath 1.0 string literal.
///
/// XPath 1.0 has no escape sequences, so text containing both quote kinds
/// is split and joined with `concat()`.
pub fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        return format!("'{text}'");
    }
    if !text.contains('"') {
        return format!("\"{text}\"");
    }
    let parts: Vec<String> = text.split('\'').map(|p| format!("'{p}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}
