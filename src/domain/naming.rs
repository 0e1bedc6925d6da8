use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonical comparison key for a column name.
///
/// Spreadsheet headers, store column identifiers and rule labels are all
/// compared through this key:
/// 1. lower-case,
/// 2. decompose (NFD) and drop combining marks, so `É` becomes `e`,
/// 3. keep ASCII letters and digits only (whitespace, `-`, `_` and any
///    other punctuation disappear).
///
/// Total and idempotent: `normalize_name(&normalize_name(x)) == normalize_name(x)`.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Display label: trims and collapses whitespace runs to one space.
/// Case and accents are preserved. Never use this for matching.
pub fn clean_label(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_case_and_spacing() {
        assert_eq!(normalize_name("É cole  "), "ecole");
        assert_eq!(normalize_name("É cole  "), normalize_name("ecole"));
    }

    #[test]
    fn drops_separators_and_punctuation() {
        assert_eq!(normalize_name("Date_de-naissance (J/M/A)"), "datedenaissancejma");
        assert_eq!(normalize_name("N° client"), "nclient");
    }

    #[test]
    fn is_idempotent() {
        for raw in ["Prénom", "  Code  Postal ", "e-mail_2", "", "ÀÉÎÕÜ", "日本"] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn non_latin_letters_vanish() {
        assert_eq!(normalize_name("日本"), "");
    }

    #[test]
    fn clean_label_keeps_case_and_accents() {
        assert_eq!(clean_label("  Prénom   du\tContact "), "Prénom du Contact");
        assert_ne!(clean_label("Prénom"), normalize_name("Prénom"));
    }
}
