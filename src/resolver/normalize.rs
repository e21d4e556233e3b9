//! Street name normalization

/// Maps a raw street name to the form used for indexing and matching.
///
/// The same normalizer must be used to build the index and to query it.
pub trait StreetNormalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> String;
}

impl<F> StreetNormalizer for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn normalize(&self, raw: &str) -> String {
        self(raw)
    }
}

/// Lowercases, strips punctuation and expands common directory abbreviations
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicNormalizer;

impl BasicNormalizer {
    pub fn new() -> Self {
        Self
    }

    fn expand(token: &str, position: usize, token_count: usize) -> &str {
        match token {
            // "St. Mark's Place" vs "Mott St."
            "st" if position == 0 && token_count > 1 => "saint",
            "st" | "str" => "street",
            "bway" | "bdway" | "brdway" => "broadway",
            "av" | "ave" | "avn" => "avenue",
            "pl" => "place",
            "sq" => "square",
            "rd" => "road",
            "ln" => "lane",
            "ct" => "court",
            "ter" => "terrace",
            "blvd" => "boulevard",
            "hts" => "heights",
            "aly" => "alley",
            "e" => "east",
            "w" => "west",
            "n" => "north",
            "s" => "south",
            other => other,
        }
    }
}

impl StreetNormalizer for BasicNormalizer {
    fn normalize(&self, raw: &str) -> String {
        // Apostrophes vanish ("B'way"), other punctuation splits tokens
        let cleaned: String = raw
            .to_lowercase()
            .chars()
            .filter(|c| *c != '\'' && *c != '’')
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();

        let tokens: Vec<&str> = cleaned.split_whitespace().collect();
        tokens
            .iter()
            .enumerate()
            .map(|(i, token)| Self::expand(token, i, tokens.len()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
