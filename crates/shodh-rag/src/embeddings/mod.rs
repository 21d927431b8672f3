pub mod e5;
pub mod tokenizer;

use crate::error::RagError;
use anyhow::Result;

/// Unified embedding model trait (C1). The declared dimension is fixed at
/// construction and validated on every call — see `EmbeddingService`.
pub trait EmbeddingModel: Send + Sync {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
    fn embed_document(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_document(t)).collect()
    }

    fn dimension(&self) -> usize;
    fn model_id(&self) -> &str;
}

/// Thin wrapper around an `EmbeddingModel` enforcing the dimension
/// invariant spec.md §4.1 calls for: every produced vector must match the
/// model's declared dimension. This is the only historical defect class
/// (query embedder != index embedder) worth a hard runtime check.
pub struct EmbeddingService {
    model: Box<dyn EmbeddingModel>,
}

impl EmbeddingService {
    pub fn new(model: Box<dyn EmbeddingModel>) -> Self {
        Self { model }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub fn dimension(&self) -> usize {
        self.model.dimension()
    }

    fn check_dim(&self, vec: &[f32]) -> Result<(), RagError> {
        if vec.len() != self.model.dimension() {
            return Err(RagError::ConfigurationMismatch(format!(
                "embedding model '{}' declares dimension {} but produced a vector of length {}",
                self.model.model_id(),
                self.model.dimension(),
                vec.len()
            )));
        }
        Ok(())
    }

    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let vec = self
            .model
            .embed_query(text)
            .map_err(|e| RagError::Store(e))?;
        self.check_dim(&vec)?;
        Ok(vec)
    }

    pub fn embed_document(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let vec = self
            .model
            .embed_document(text)
            .map_err(|e| RagError::Store(e))?;
        self.check_dim(&vec)?;
        Ok(vec)
    }

    pub fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        let vecs = self
            .model
            .embed_documents(texts)
            .map_err(|e| RagError::Store(e))?;
        for v in &vecs {
            self.check_dim(v)?;
        }
        Ok(vecs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedVectorModel {
        dimension: usize,
        produces: usize,
    }

    impl EmbeddingModel for FixedVectorModel {
        fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; self.produces])
        }
        fn embed_document(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; self.produces])
        }
        fn dimension(&self) -> usize {
            self.dimension
        }
        fn model_id(&self) -> &str {
            "fixed-vector-model"
        }
    }

    #[test]
    fn matching_dimension_passes() {
        let service = EmbeddingService::new(Box::new(FixedVectorModel { dimension: 768, produces: 768 }));
        assert!(service.embed_query("hello").is_ok());
    }

    #[test]
    fn mismatched_dimension_is_configuration_mismatch() {
        let service = EmbeddingService::new(Box::new(FixedVectorModel { dimension: 768, produces: 384 }));
        let err = service.embed_document("hello").unwrap_err();
        assert!(matches!(err, RagError::ConfigurationMismatch(_)));
    }
}
