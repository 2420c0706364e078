//! Text normalization for registry labels, values and tax ids.

use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Expected number of digits in a tax id (CNPJ).
pub const TAX_ID_DIGITS: usize = 14;

static NON_KEY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_-]").expect("static regex"));
static UNDERSCORE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("static regex"));
static WHITESPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Labels whose generic normalization varies with punctuation; mapped to one key.
const KEY_OVERRIDES: &[(&str, &str)] = &[
    ("operacoes_com_nf-e", "operacoes_com_nfe"),
    ("operacoes_com_nf_e", "operacoes_com_nfe"),
    ("operacoes_com_nfe", "operacoes_com_nfe"),
];

/// NFKD-decomposes `text` and drops the combining marks (`"Razão"` -> `"Razao"`).
pub fn strip_accents(text: &str) -> String {
    text.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Turns a page label into a lookup key.
///
/// `"Razão Social:"` -> `"razao_social"`, `"CNPJ/CPF"` -> `"cnpj_cpf"`. Idempotent.
pub fn normalize_key(label: &str) -> String {
    let lowered = label.trim().to_lowercase();
    let without_colon = lowered.trim_end_matches(':');
    let ascii = strip_accents(without_colon);

    let replaced = NON_KEY_CHARS.replace_all(&ascii, "_");
    let collapsed = UNDERSCORE_RUNS.replace_all(&replaced, "_");
    let key = collapsed.trim_matches('_');

    KEY_OVERRIDES
        .iter()
        .find(|(variant, _)| *variant == key)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| key.to_string())
}

/// Normalizes an extracted value: accents stripped, `---` placeholders removed,
/// whitespace runs collapsed to one space, trimmed.
pub fn normalize_value(text: &str) -> String {
    let ascii = strip_accents(text).replace("---", "");
    WHITESPACE_RUNS.replace_all(&ascii, " ").trim().to_string()
}

/// Keeps only the ASCII digits of `raw`.
pub fn tax_id_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Syntactic check used by the dispatcher: exactly 14 ASCII digits, nothing else.
pub fn is_valid_tax_id(raw: &str) -> bool {
    raw.len() == TAX_ID_DIGITS && raw.chars().all(|c| c.is_ascii_digit())
}

/// Canonicalizes a tax id into `XX.XXX.XXX/XXXX-XX`.
///
/// Non-digits are stripped first; `None` if the remaining digit count is wrong.
pub fn format_tax_id(raw: &str) -> Option<String> {
    let digits = tax_id_digits(raw);
    if digits.len() != TAX_ID_DIGITS {
        return None;
    }

    Some(format!(
        "{}.{}.{}/{}-{}",
        &digits[..2],
        &digits[2..5],
        &digits[5..8],
        &digits[8..12],
        &digits[12..14]
    ))
}
