use std::collections::HashMap;

use fluent_templates::{fluent_bundle::FluentValue, static_loader, Loader};

pub use fluent_templates::fluent_bundle::FluentArgs;
use once_cell::sync::{Lazy, OnceCell};
use unic_langid::LanguageIdentifier;

static_loader! {
    static LOCALES = {
        locales: "./locales",
        fallback_language: "en",
    };
}

/// Supported languages (code, human-readable name).
pub static SUPPORTED_LANGS: &[(&str, &str)] = &[("en", "English"), ("ru", "Русский")];

/// Built-in fallback language identifier.
#[allow(clippy::unwrap_used)]
static FALLBACK_LANG: Lazy<LanguageIdentifier> = Lazy::new(|| "en".parse().unwrap());

/// Configured default language, set once at startup.
static DEFAULT_LANG: OnceCell<LanguageIdentifier> = OnceCell::new();

/// Sets the language used for users without a supported language of their own.
///
/// Only the first call takes effect; returns `false` if the default was
/// already set or `code` is not supported.
pub fn set_default_language(code: &str) -> bool {
    let Some(lang) = is_language_supported(code).and_then(|c| c.parse().ok()) else {
        log::warn!("Ignoring unsupported default language {:?}", code);
        return false;
    };
    DEFAULT_LANG.set(lang).is_ok()
}

/// The configured default language, English until one is set.
pub fn default_language() -> &'static LanguageIdentifier {
    DEFAULT_LANG.get().unwrap_or(&*FALLBACK_LANG)
}

/// Normalizes a language code into a LanguageIdentifier (falls back to default).
pub fn lang_from_code(code: &str) -> LanguageIdentifier {
    match is_language_supported(code).and_then(|c| c.parse().ok()) {
        Some(lang) => lang,
        None => default_language().clone(),
    }
}

/// Returns a localized string for the given key.
/// Converts literal `\n` sequences to actual newlines.
pub fn t(lang: &LanguageIdentifier, key: &str) -> String {
    let text = LOCALES
        .lookup(lang, key)
        .unwrap_or_else(|| LOCALES.lookup(default_language(), key).unwrap_or_else(|| key.to_string()));
    text.replace("\\n", "\n")
}

/// Returns a localized string with arguments for interpolation.
pub fn t_args(lang: &LanguageIdentifier, key: &str, args: &FluentArgs) -> String {
    let args_map: HashMap<String, FluentValue> = args.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();

    let text = LOCALES.lookup_with_args(lang, key, &args_map).unwrap_or_else(|| {
        LOCALES
            .lookup_with_args(default_language(), key, &args_map)
            .unwrap_or_else(|| key.to_string())
    });
    // Fluent wraps interpolated values in bidi isolation marks
    text.replace("\\n", "\n").replace(['\u{2068}', '\u{2069}'], "")
}

/// Finds a human-friendly name for a language code.
pub fn language_name(code: &str) -> &str {
    SUPPORTED_LANGS
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, name)| *name)
        .unwrap_or("Unknown")
}

/// Checks if a language code is supported.
/// Returns the normalized language code if supported, None otherwise.
pub fn is_language_supported(code: &str) -> Option<&'static str> {
    let normalized = code.split(['-', '_']).next().unwrap_or(code).to_lowercase();

    SUPPORTED_LANGS
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(&normalized))
        .map(|(c, _)| *c)
}
