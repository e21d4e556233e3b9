//! Fuzzy street search using Tantivy
//!
//! Candidates come from an in-memory inverted index queried with exact terms
//! for short or numeric tokens and Levenshtein-automaton terms for the rest.
//! The final pick is made on the true edit distance of the whole normalized
//! street name.

use super::address::{AddressFragment, ResolvedAddress};
use super::normalize::StreetNormalizer;
use super::ResolverError;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tantivy::{
    collector::DocSetCollector,
    query::{BooleanQuery, FuzzyTermQuery, Occur, Query, TermQuery},
    schema::{Field, IndexRecordOption, Schema, Value, INDEXED, STORED, TEXT},
    tokenizer::TokenStream,
    Index, IndexReader, ReloadPolicy, TantivyDocument, Term,
};
use tracing::{debug, info};

/// Tokens of this many characters or fewer are matched exactly
const EXACT_TOKEN_MAX_CHARS: usize = 3;

/// Edit distance allowed per fuzzy query token
const TOKEN_EDIT_DISTANCE: u8 = 2;

/// Tuning knobs for street resolution
#[derive(Debug, Clone, Copy)]
pub struct ResolverOptions {
    /// Largest accepted edit distance for the whole street name
    pub max_edit_distance: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_edit_distance: 2,
        }
    }
}

impl From<&crate::config::ResolverConfig> for ResolverOptions {
    fn from(config: &crate::config::ResolverConfig) -> Self {
        Self {
            max_edit_distance: config.max_edit_distance,
        }
    }
}

/// One distinct street in the index
#[derive(Debug, Clone)]
struct Street {
    normalized: String,
    display: String,
}

/// Schema fields for the street index
struct StreetSchema {
    id: Field,
    name: Field,
}

/// Read-only index of canonical street names
pub struct StreetIndex {
    index: Index,
    reader: IndexReader,
    schema: StreetSchema,
    /// Indexed by dense street id
    streets: Vec<Street>,
    normalizer: Arc<dyn StreetNormalizer>,
    options: ResolverOptions,
}

impl StreetIndex {
    /// Build the index from raw street names (duplicates allowed)
    pub fn build<I, S>(
        raw_names: I,
        normalizer: Arc<dyn StreetNormalizer>,
        options: ResolverOptions,
    ) -> Result<Self, ResolverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut streets: Vec<Street> = Vec::new();
        let mut ids: HashMap<String, usize> = HashMap::new();

        for raw in raw_names {
            let raw = raw.as_ref().trim();
            let normalized = normalizer.normalize(raw);
            if normalized.is_empty() || ids.contains_key(&normalized) {
                continue;
            }
            ids.insert(normalized.clone(), streets.len());
            streets.push(Street {
                normalized,
                display: raw.to_string(),
            });
        }

        let (schema, fields) = Self::build_schema();
        let index = Index::create_in_ram(schema);

        let mut writer = index.writer_with_num_threads(1, 15_000_000)?;
        for (id, street) in streets.iter().enumerate() {
            let mut doc = TantivyDocument::new();
            doc.add_u64(fields.id, id as u64);
            doc.add_text(fields.name, &street.normalized);
            writer.add_document(doc)?;
        }
        writer.commit()?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        info!("Built street index with {} distinct streets", streets.len());

        Ok(Self {
            index,
            reader,
            schema: fields,
            streets,
            normalizer,
            options,
        })
    }

    /// Build the index from a text file with one street name per line
    pub fn from_file(
        path: impl AsRef<Path>,
        normalizer: Arc<dyn StreetNormalizer>,
        options: ResolverOptions,
    ) -> Result<Self, ResolverError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| ResolverError::StreetList {
            path: path.display().to_string(),
            source,
        })?;

        let names = std::io::BufReader::new(file)
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ResolverError::StreetList {
                path: path.display().to_string(),
                source,
            })?;

        Self::build(
            names.iter().filter(|name| !name.trim().is_empty()),
            normalizer,
            options,
        )
    }

    fn build_schema() -> (Schema, StreetSchema) {
        let mut schema_builder = Schema::builder();

        let id = schema_builder.add_u64_field("id", INDEXED | STORED);
        let name = schema_builder.add_text_field("name", TEXT | STORED);

        (schema_builder.build(), StreetSchema { id, name })
    }

    /// Number of distinct streets
    pub fn len(&self) -> usize {
        self.streets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streets.is_empty()
    }

    /// Resolve a raw address fragment such as `"123 Bway"`.
    ///
    /// Returns `Ok(None)` when the fragment has no leading house number or no
    /// street is within the allowed edit distance.
    pub fn resolve(&self, raw: &str) -> Result<Option<ResolvedAddress>, ResolverError> {
        let Some(fragment) = AddressFragment::parse(raw) else {
            return Ok(None);
        };

        let normalized = self.normalizer.normalize(&fragment.street);
        if normalized.is_empty() {
            return Ok(None);
        }

        let Some(query) = self.build_query(&normalized)? else {
            return Ok(None);
        };

        let searcher = self.reader.searcher();
        // Every hit is reranked on edit distance, not only the best scored ones
        let hits = searcher.search(&query, &DocSetCollector)?;

        let mut best: Option<(usize, &str, u64)> = None;
        for doc_address in hits {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            let Some(id) = doc.get_first(self.schema.id).and_then(|v| v.as_u64()) else {
                continue;
            };
            let Some(street) = self.streets.get(id as usize) else {
                continue;
            };

            let distance = strsim::levenshtein(&normalized, &street.normalized);
            if distance > self.options.max_edit_distance {
                continue;
            }

            // Ties go to the lexicographically smaller name, then the smaller id
            let candidate = (distance, street.normalized.as_str(), id);
            if best.map_or(true, |current| candidate < current) {
                best = Some(candidate);
            }
        }

        let resolved = best.map(|(edit_distance, _, id)| {
            let street = &self.streets[id as usize];
            ResolvedAddress {
                number: fragment.number.clone(),
                street: street.display.clone(),
                normalized: street.normalized.clone(),
                street_id: id,
                edit_distance,
            }
        });

        debug!(
            "Resolved '{}' -> {}",
            raw,
            resolved.as_ref().map_or_else(|| "miss".to_string(), |r| r.to_string())
        );
        Ok(resolved)
    }

    /// OR of one clause per token of the normalized street
    fn build_query(&self, normalized: &str) -> Result<Option<Box<dyn Query>>, ResolverError> {
        let mut tokenizer = self.index.tokenizer_for_field(self.schema.name)?;
        let mut stream = tokenizer.token_stream(normalized);

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        while stream.advance() {
            let text = stream.token().text.clone();
            let term = Term::from_field_text(self.schema.name, &text);

            let exact = text.chars().count() <= EXACT_TOKEN_MAX_CHARS
                || text.chars().all(|c| c.is_ascii_digit());
            let clause: Box<dyn Query> = if exact {
                Box::new(TermQuery::new(term, IndexRecordOption::Basic))
            } else {
                Box::new(FuzzyTermQuery::new(term, TOKEN_EDIT_DISTANCE, false))
            };
            clauses.push((Occur::Should, clause));
        }

        if clauses.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(BooleanQuery::new(clauses))))
    }
}
