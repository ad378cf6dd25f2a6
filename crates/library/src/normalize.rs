use std::collections::HashSet;

/// Comparison key for names: lower-cased, accents folded, punctuation
/// dropped and whitespace collapsed. Applying it twice changes nothing.
pub fn normalize_name(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_space = false;
    for ch in value.chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() || ch == '_' {
            pending_space = !out.is_empty();
            continue;
        }
        let mut folded = String::new();
        fold_char(ch, &mut folded);
        for mapped in folded.chars() {
            if !mapped.is_alphanumeric() {
                continue;
            }
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(mapped);
        }
    }
    out
}

/// Letters and digits only, used for loose alternate-name matching.
pub fn alphanumeric_key(value: &str) -> String {
    normalize_name(value)
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .collect()
}

fn fold_char(ch: char, out: &mut String) {
    match ch {
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' => out.push('a'),
        'ç' => out.push('c'),
        'è' | 'é' | 'ê' | 'ë' => out.push('e'),
        'ì' | 'í' | 'î' | 'ï' => out.push('i'),
        'ñ' => out.push('n'),
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' | 'ø' => out.push('o'),
        'ù' | 'ú' | 'û' | 'ü' => out.push('u'),
        'ý' | 'ÿ' => out.push('y'),
        'ß' => out.push_str("ss"),
        'œ' => out.push_str("oe"),
        'æ' => out.push_str("ae"),
        '&' => out.push_str("and"),
        _ => out.push(ch),
    }
}

/// Cleans a genre list read from tags or providers: canonical labels,
/// case-insensitive de-duplication, first spelling wins.
pub fn canonical_genres(incoming: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for genre in incoming {
        let label = canonical_genre_label(genre);
        if label.is_empty() {
            continue;
        }
        if seen.insert(normalize_name(&label)) {
            out.push(label);
        }
    }
    out
}

/// Maps localized or decorated genre names onto one canonical label.
pub fn canonical_genre_label(value: &str) -> String {
    let lower = value.trim().to_lowercase();
    let exact = match lower.as_str() {
        "musique classique" | "classique" | "klassik" | "klassische musik" => "Classical",
        "musica clasica" | "música clásica" | "musica classica" => "Classical",
        "musique de chambre" | "musica de camara" | "música de cámara" => "Chamber music",
        "kammermusik" => "Chamber music",
        "musique de film" | "musiques de film" | "banda sonora" | "colonna sonora" => {
            "Soundtrack"
        }
        "musica de pelicula" | "música de película" | "filmmusik" => "Soundtrack",
        "musique électronique" | "musique electronique" | "elektronische musik" => "Electronic",
        "musica elettronica" | "música electrónica" | "música electronica" => "Electronic",
        "musique instrumentale" | "musica strumentale" | "música instrumental" => {
            "Instrumental"
        }
        "instrumentalmusik" => "Instrumental",
        "musique ambient" | "musique ambiante" | "musica ambient" => "Ambient",
        "piano solo" => "Solo piano",
        "música clásica contemporánea" | "musica contemporanea" => "Contemporary classical",
        "zeitgenössische klassische musik" | "zeitgenossische klassische musik" => {
            "Contemporary classical"
        }
        _ => "",
    };
    if !exact.is_empty() {
        return exact.to_string();
    }
    match match_genre_key(&normalize_name(&lower)) {
        Some(mapped) => mapped.to_string(),
        None => value.trim().to_string(),
    }
}

fn match_genre_key(value: &str) -> Option<&'static str> {
    let rules: [(&str, &[&str]); 6] = [
        ("Contemporary classical", &["contemporary classical", "zeitgenossisch"]),
        ("Chamber music", &["chamber music", "musique de chambre", "musica de camara"]),
        ("Classical", &["classical", "klassik", "musica clasica", "musique classique"]),
        ("Soundtrack", &["musique de film", "banda sonora", "colonna sonora", "filmmusik"]),
        ("Electronic", &["electronique", "elektronisch", "musica elettronica"]),
        ("Instrumental", &["instrumentale", "strumentale", "instrumentalmusik"]),
    ];

    for (label, terms) in rules {
        if terms.iter().any(|term| value.contains(term)) {
            return Some(label);
        }
    }
    if value.contains("solo piano") || value.contains("piano solo") {
        return Some("Solo piano");
    }
    None
}
