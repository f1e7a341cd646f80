//! TF-IDF keyword extraction over justification documents.
//!
//! Document frequencies are counted over every record with text, so IDF only needs
//! the phase 1 pass; the flagged/background split is applied afterwards for lift.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::TextConfig;
use crate::constants::{SIN_DOCUMENTO, STOPWORDS};

/// True for real justification text; the imputed placeholder counts as empty
pub fn has_text(documento: &str) -> bool {
    let trimmed = documento.trim();
    !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case(SIN_DOCUMENTO)
}

fn fold(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' => 'a',
        'é' | 'è' | 'ë' => 'e',
        'í' | 'ì' | 'ï' => 'i',
        'ó' | 'ò' | 'ö' => 'o',
        'ú' | 'ù' | 'ü' => 'u',
        'ñ' => 'n',
        other => other,
    }
}

/// Lowercase, accent-folded alphanumeric runs, minus short, numeric and stop words
pub fn tokenize(text: &str, min_len: usize) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(fold)
        .collect::<String>()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= min_len)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightedTerm {
    pub term: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TermLift {
    pub term: String,
    pub df_flagged: usize,
    pub df_background: usize,
    pub lift: f64,
}

/// Document frequencies over the whole corpus (flagged plus background)
#[derive(Debug, Clone, Default)]
pub struct TextMiner {
    df: HashMap<String, usize>,
    documents: usize,
    min_token_len: usize,
    top_terms: usize,
    corpus_terms: usize,
}

impl TextMiner {
    pub fn fit<'a, I: IntoIterator<Item = &'a str>>(documents: I, config: &TextConfig) -> Self {
        let mut miner = Self {
            min_token_len: config.min_token_len,
            top_terms: config.top_terms,
            corpus_terms: config.corpus_terms,
            ..Self::default()
        };
        for doc in documents.into_iter().filter(|d| has_text(d)) {
            miner.documents += 1;
            let unique: HashSet<String> = tokenize(doc, miner.min_token_len).into_iter().collect();
            for term in unique {
                *miner.df.entry(term).or_insert(0) += 1;
            }
        }
        miner
    }

    pub fn documents(&self) -> usize {
        self.documents
    }

    /// Smoothed IDF: ln((1 + N) / (1 + df)) + 1
    pub fn idf(&self, term: &str) -> f64 {
        let df = self.df.get(term).copied().unwrap_or(0);
        ((1.0 + self.documents as f64) / (1.0 + df as f64)).ln() + 1.0
    }

    /// Highest TF-IDF terms of one document, ties broken alphabetically
    pub fn top_terms(&self, documento: &str) -> Vec<WeightedTerm> {
        if !has_text(documento) {
            return Vec::new();
        }
        let tokens = tokenize(documento, self.min_token_len);
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for t in &tokens {
            *counts.entry(t.as_str()).or_insert(0) += 1;
        }
        let len = tokens.len() as f64;
        let mut weighted: Vec<WeightedTerm> = counts
            .into_iter()
            .map(|(term, count)| WeightedTerm {
                term: term.to_string(),
                weight: count as f64 / len * self.idf(term),
            })
            .collect();
        weighted.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.term.cmp(&b.term)));
        weighted.truncate(self.top_terms);
        weighted
    }

    /// Terms over-represented in the flagged documents relative to the background:
    /// lift = (df_flagged / N_flagged) / ((df_background + 1) / (N_background + 1))
    pub fn corpus_lift<'a, I>(&self, flagged_documents: I) -> Vec<TermLift>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut df_flagged: HashMap<String, usize> = HashMap::new();
        let mut n_flagged = 0usize;
        for doc in flagged_documents.into_iter().filter(|d| has_text(d)) {
            n_flagged += 1;
            let unique: HashSet<String> = tokenize(doc, self.min_token_len).into_iter().collect();
            for term in unique {
                *df_flagged.entry(term).or_insert(0) += 1;
            }
        }
        if n_flagged == 0 {
            return Vec::new();
        }

        let n_background = self.documents.saturating_sub(n_flagged);
        let mut lifts: Vec<TermLift> = df_flagged
            .into_iter()
            .map(|(term, df_f)| {
                let df_total = self.df.get(&term).copied().unwrap_or(df_f);
                let df_b = df_total.saturating_sub(df_f);
                let lift = (df_f as f64 / n_flagged as f64)
                    / ((df_b as f64 + 1.0) / (n_background as f64 + 1.0));
                TermLift {
                    term,
                    df_flagged: df_f,
                    df_background: df_b,
                    lift,
                }
            })
            .collect();
        lifts.sort_by(|a, b| b.lift.total_cmp(&a.lift).then_with(|| a.term.cmp(&b.term)));
        lifts.truncate(self.corpus_terms);
        lifts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn miner(docs: &[&str]) -> TextMiner {
        TextMiner::fit(docs.iter().copied(), &TextConfig::default())
    }

    #[test]
    fn test_tokenize_folds_and_filters() {
        let tokens = tokenize("Compraventa de PREDIO según Escritura 1234 del año 2019", 3);
        assert_eq!(tokens, vec!["compraventa", "predio", "escritura", "ano"]);
    }

    #[test]
    fn test_placeholder_is_not_text() {
        assert!(!has_text(SIN_DOCUMENTO));
        assert!(!has_text("   "));
        assert!(has_text("ESCRITURA 55"));
        assert!(miner(&["ESCRITURA"]).top_terms(SIN_DOCUMENTO).is_empty());
    }

    #[test]
    fn test_background_terms_get_low_weight() {
        let mut docs = vec!["escritura publica notaria"; 20];
        docs.push("escritura publica remate judicial");
        let miner = miner(&docs);

        let top = miner.top_terms("escritura publica remate judicial");
        let terms: Vec<&str> = top.iter().map(|t| t.term.as_str()).collect();
        // Rare terms first, tied weights broken alphabetically
        assert_eq!(terms, vec!["judicial", "remate", "escritura", "publica"]);
        assert!(top[0].weight > top[2].weight);
    }

    #[test]
    fn test_idf_formula() {
        let miner = miner(&["alfa beta", "alfa gamma", "delta"]);
        assert!((miner.idf("alfa") - ((4.0f64 / 3.0).ln() + 1.0)).abs() < 1e-12);
        assert!((miner.idf("zzz") - (4.0f64.ln() + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_corpus_lift_ranks_flagged_vocabulary() {
        let mut docs = vec!["escritura compraventa"; 10];
        docs.push("escritura remate");
        docs.push("escritura remate");
        let miner = miner(&docs);

        let lifts = miner.corpus_lift(["escritura remate", "escritura remate"]);
        assert_eq!(lifts[0].term, "remate");
        assert_eq!(lifts[0].df_flagged, 2);
        assert_eq!(lifts[0].df_background, 0);
        assert!(lifts[0].lift > lifts[1].lift);
    }
}
