//! Strict JSON parsing with a markdown-fence fallback — models routinely
//! wrap JSON responses in ```json fences despite instructions not to.

pub fn parse_lenient<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    let trimmed = strip_code_fence(text.trim());
    serde_json::from_str(trimmed)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\n', '\r']);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Sample {
        ok: bool,
    }

    #[test]
    fn parses_bare_json() {
        let v: Sample = parse_lenient(r#"{"ok":true}"#).unwrap();
        assert_eq!(v, Sample { ok: true });
    }

    #[test]
    fn strips_json_code_fence() {
        let v: Sample = parse_lenient("```json\n{\"ok\":true}\n```").unwrap();
        assert_eq!(v, Sample { ok: true });
    }

    #[test]
    fn strips_bare_code_fence() {
        let v: Sample = parse_lenient("```\n{\"ok\":true}\n```").unwrap();
        assert_eq!(v, Sample { ok: true });
    }
}
