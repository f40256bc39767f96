//! Strict JSON parsing with a markdown-fence fallback (mirrors
//! `recall-evaluator`'s `json` module — small enough in each crate that
//! sharing it isn't worth a dependency edge).

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
    fn strips_json_code_fence() {
        let v: Sample = parse_lenient("```json\n{\"ok\":true}\n```").unwrap();
        assert_eq!(v, Sample { ok: true });
    }
}
