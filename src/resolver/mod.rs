//! Fuzzy street resolution
//!
//! Maps noisy OCR address fragments (`"123 Bway"`) onto a canonical street
//! list. Candidates come from a Tantivy index with fuzzy term matching and are
//! reranked by Levenshtein distance over the normalized street name.

mod address;
mod normalize;
mod street_index;

pub use address::{AddressFragment, ResolvedAddress};
pub use normalize::{BasicNormalizer, StreetNormalizer};
pub use street_index::{ResolverOptions, StreetIndex};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Failed to read street list '{path}': {source}")]
    StreetList {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Street index error: {0}")]
    Index(#[from] tantivy::TantivyError),
}
