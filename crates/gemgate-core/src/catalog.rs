/// Caller-facing model ids and the upstream names they resolve to. Unknown
/// ids pass through unchanged so new upstream models work without a release.
const ALIASES: &[(&str, &str)] = &[
    ("gemini-2.5-pro", "gemini-2.5-pro"),
    ("gemini-2.5-flash", "gemini-2.5-flash"),
    ("gemini-2.5-flash-lite", "gemini-2.5-flash-lite"),
    ("gemini-pro", "gemini-2.5-pro"),
    ("gemini-flash", "gemini-2.5-flash"),
    ("gemini-flash-lite", "gemini-2.5-flash-lite"),
];

pub fn resolve_model(requested: &str) -> &str {
    let requested = requested.trim();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == requested)
        .map(|(_, upstream)| *upstream)
        .unwrap_or(requested)
}

pub fn known_models() -> impl Iterator<Item = &'static str> {
    ALIASES.iter().map(|(alias, _)| *alias)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_and_unknown_ids_pass_through() {
        assert_eq!(resolve_model("gemini-pro"), "gemini-2.5-pro");
        assert_eq!(resolve_model(" gemini-flash "), "gemini-2.5-flash");
        assert_eq!(resolve_model("gemini-3.0-ultra"), "gemini-3.0-ultra");
    }

    #[test]
    fn listing_covers_every_alias() {
        assert_eq!(known_models().count(), 6);
        assert!(known_models().any(|id| id == "gemini-2.5-flash-lite"));
    }
}
