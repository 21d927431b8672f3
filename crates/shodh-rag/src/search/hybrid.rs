use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub enum HybridSource {
    Vector,
    TextSearch,
    Both,
}

/// Union-dedup fusion for the chat retrieval path: no rank or score
/// blending, just a set union of dense and sparse candidates keeping the
/// better of the two scores per chunk id when both lists surface it.
/// Order is preserved from each source list; reranking is what produces
/// the final authoritative order downstream, not this step. Intentionally
/// not a weighted combination — the cross-encoder reranker is the only
/// place scores get blended into a final order.
pub fn union_dedup(
    vector_results: Vec<(String, f32)>,
    fts_results: Vec<(String, f32)>,
) -> Vec<(String, f32, HybridSource)> {
    let mut merged: HashMap<String, (f32, HybridSource)> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for (id, score) in vector_results {
        order.push(id.clone());
        merged.insert(id, (score, HybridSource::Vector));
    }

    for (id, score) in fts_results {
        match merged.get_mut(&id) {
            Some((existing_score, source)) => {
                *source = HybridSource::Both;
                if score > *existing_score {
                    *existing_score = score;
                }
            }
            None => {
                order.push(id.clone());
                merged.insert(id, (score, HybridSource::TextSearch));
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| merged.remove(&id).map(|(score, source)| (id, score, source)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_dedup_keeps_better_score_on_overlap() {
        let vector = vec![("a".to_string(), 0.4)];
        let fts = vec![("a".to_string(), 0.9)];
        let merged = union_dedup(vector, fts);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].1, 0.9);
        assert!(matches!(merged[0].2, HybridSource::Both));
    }

    #[test]
    fn union_dedup_preserves_first_seen_order() {
        let vector = vec![("a".to_string(), 0.5), ("b".to_string(), 0.4)];
        let fts = vec![("c".to_string(), 0.8)];
        let merged = union_dedup(vector, fts);
        let ids: Vec<&str> = merged.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
