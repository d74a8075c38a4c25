//! Reserved vocabularies of the engine.
//!
//! Triples whose predicate falls into one of these namespaces are "magic":
//! they configure the evaluator instead of matching data and are stripped from
//! basic graph patterns before evaluation.

// Re-export the W3C vocabularies alongside our own.
pub use oxrdf::vocab::{rdf, rdfs, xsd};

pub mod hints {
    //! Query-hint vocabulary.
    //!
    //! Hint triples are collected into the execution context before a basic
    //! graph pattern is evaluated.
    use oxrdf::NamedNodeRef;

    /// Namespace of all query hints.
    pub const NAMESPACE: &str = "https://sparflow.rs/hints#";

    /// Disables the bound-join strategy for the enclosing query.
    pub const FORCE_INDEX_JOIN: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://sparflow.rs/hints#forceIndexJoin");
}

pub mod search {
    //! Full-text-search vocabulary.
    //!
    //! A full-text-search query is declared by annotating a regular triple
    //! pattern with magic triples on its query variable.
    use oxrdf::NamedNodeRef;

    /// Namespace of all full-text-search magic predicates.
    pub const NAMESPACE: &str = "https://sparflow.rs/search#";

    /// The keyword list of the search, as a whitespace-separated literal.
    pub const SEARCH: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://sparflow.rs/search#search");

    /// Requires every keyword to match.
    pub const MATCH_ALL_TERMS: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://sparflow.rs/search#matchAllTerms");

    /// Lower bound (inclusive) on relevance scores.
    pub const MIN_RELEVANCE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://sparflow.rs/search#minRelevance");

    /// Upper bound (inclusive) on relevance scores.
    pub const MAX_RELEVANCE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://sparflow.rs/search#maxRelevance");

    /// Lower bound (inclusive) on result ranks.
    pub const MIN_RANK: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://sparflow.rs/search#minRank");

    /// Upper bound (inclusive) on result ranks.
    pub const MAX_RANK: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://sparflow.rs/search#maxRank");

    /// Binds the relevance score of each match to a variable.
    pub const RELEVANCE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://sparflow.rs/search#relevance");

    /// Binds the rank of each match to a variable.
    pub const RANK: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://sparflow.rs/search#rank");
}
