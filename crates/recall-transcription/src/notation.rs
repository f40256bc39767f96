/// True iff `text` contains a non-empty `$...$` or `` `...` `` span.
pub fn has_notation(text: &str) -> bool {
    contains_delimited_span(text, '$') || contains_delimited_span(text, '`')
}

fn contains_delimited_span(text: &str, delim: char) -> bool {
    let mut rest = text;
    loop {
        let Some(start) = rest.find(delim) else { return false };
        let after = &rest[start + delim.len_utf8()..];
        match after.find(delim) {
            Some(0) => rest = &after[delim.len_utf8()..],
            Some(end) if end > 0 => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_dollar_notation() {
        assert!(has_notation("the formula is $E=mc^2$ here"));
    }

    #[test]
    fn detects_backtick_notation() {
        assert!(has_notation("run `cargo test` please"));
    }

    #[test]
    fn plain_text_has_no_notation() {
        assert!(!has_notation("just plain words"));
    }

    #[test]
    fn unmatched_delimiter_is_not_notation() {
        assert!(!has_notation("costs $5 total"));
    }

    #[test]
    fn empty_delimited_span_is_not_notation() {
        assert!(!has_notation("weird $$ case"));
    }
}
