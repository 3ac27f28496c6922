use crate::catalog::{Catalog, Category};

/// Keyword-overlap scorer over a [`Catalog`].
#[derive(Debug, Clone)]
pub struct Responder {
    catalog: Catalog,
}

#[derive(Debug, Clone, Copy)]
pub struct Match<'a> {
    pub category: &'a Category,
    pub score: usize,
}

impl Match<'_> {
    pub fn is_fallback(&self) -> bool {
        self.score == 0
    }
}

impl Responder {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Picks the category whose keywords occur most often in `query`.
    ///
    /// Keywords are matched as plain substrings of the lowercased query, so
    /// `"db"` also counts inside `"goodbye"`. Equal scores go to the category
    /// declared first; no match at all yields the `default` category.
    pub fn best_match(&self, query: &str) -> Match<'_> {
        let normalized = query.to_lowercase();
        let mut best: Option<Match<'_>> = None;
        for category in self.catalog.keyed_categories() {
            let score = keyword_score(category, &normalized);
            if score == 0 {
                continue;
            }
            if best.map_or(true, |current| score > current.score) {
                best = Some(Match { category, score });
            }
        }
        best.unwrap_or(Match {
            category: self.catalog.default_category(),
            score: 0,
        })
    }

    pub fn respond(&self, query: &str) -> &str {
        self.best_match(query).category.response.as_str()
    }
}

pub fn keyword_score(category: &Category, normalized_query: &str) -> usize {
    category
        .keywords
        .iter()
        .filter(|keyword| normalized_query.contains(keyword.as_str()))
        .count()
}
