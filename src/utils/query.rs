/// Quotes a value as an exact-phrase constraint for openFDA's Lucene-like search syntax.
///
/// Inside a quoted phrase only the quote and backslash characters carry meaning, so
/// those are the only ones escaped; everything else is matched literally.
pub(crate) fn quote_phrase(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if matches!(ch, '\\' | '"') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Renders an inclusive range clause, using `*` for an open end.
pub(crate) fn range_clause(field: &str, from: Option<&str>, to: Option<&str>) -> String {
    format!("{field}:[{} TO {}]", from.unwrap_or("*"), to.unwrap_or("*"))
}

#[cfg(test)]
mod tests {
    use super::{quote_phrase, range_clause};

    #[test]
    fn quote_phrase_escapes_quotes_and_backslashes_only() {
        assert_eq!(
            quote_phrase(r#"fluticasone/salmeterol "inh"\x"#),
            r#""fluticasone/salmeterol \"inh\"\\x""#
        );
        assert_eq!(quote_phrase("ms contin"), "\"ms contin\"");
    }

    #[test]
    fn range_clause_uses_wildcard_for_open_ends() {
        assert_eq!(
            range_clause("receivedate", Some("20200101"), None),
            "receivedate:[20200101 TO *]"
        );
        assert_eq!(
            range_clause("patient.patientonsetage", Some("18"), Some("65")),
            "patient.patientonsetage:[18 TO 65]"
        );
    }
}
