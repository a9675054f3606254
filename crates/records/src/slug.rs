use crate::record::Classification;
use regex::Regex;
use std::sync::OnceLock;

const EMPTY_SLUG: &str = "record";

fn non_alphanumeric_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static slug pattern"))
}

/// Filesystem-safe identifier: lowercase, non-alphanumeric runs collapsed to a
/// single `_`, leading/trailing `_` trimmed. Empty input maps to `record`.
#[must_use]
pub fn to_slug(text: &str) -> String {
    let lowered = text.to_lowercase();
    let collapsed = non_alphanumeric_runs().replace_all(&lowered, "_");
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Slug for a submission: the title when present, else `category_sub_category`.
#[must_use]
pub fn slug_for(classification: &Classification) -> String {
    match classification.title.as_deref() {
        Some(title) if !title.trim().is_empty() => to_slug(title),
        _ => to_slug(&format!(
            "{}_{}",
            classification.category, classification.sub_category
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn collapses_and_trims() {
        assert_eq!(to_slug("Sample X"), "sample_x");
        assert_eq!(to_slug("  --Log4Shell (CVE-2021-44228)!! "), "log4shell_cve_2021_44228");
        assert_eq!(to_slug("a__b"), "a_b");
        assert_eq!(to_slug("***"), "record");
    }

    #[test]
    fn non_ascii_letters_are_separators() {
        assert_eq!(to_slug("Café Attack"), "caf_attack");
    }

    #[test]
    fn falls_back_to_classification() {
        let classification = Classification {
            category: "Malware".into(),
            sub_category: "Ransom Ware".into(),
            title: Some("   ".into()),
        };
        assert_eq!(slug_for(&classification), "malware_ransom_ware");

        let titled = Classification {
            title: Some("Sample X".into()),
            ..classification
        };
        assert_eq!(slug_for(&titled), "sample_x");
    }
}
