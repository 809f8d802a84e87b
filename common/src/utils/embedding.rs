use std::sync::Arc;

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::AppError;

/// Embedding backend behind one call site. `OpenAi` is the production path;
/// `Hashed` is deterministic and offline, for tests and air-gapped runs.
pub enum EmbeddingProvider {
    OpenAi {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimensions: usize,
    },
}

impl EmbeddingProvider {
    pub fn new_openai(
        client: Arc<Client<OpenAIConfig>>,
        model: impl Into<String>,
        dimensions: u32,
    ) -> Self {
        Self::OpenAi {
            client,
            model: model.into(),
            dimensions,
        }
    }

    pub fn new_hashed(dimensions: usize) -> Self {
        Self::Hashed { dimensions }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::OpenAi { dimensions, .. } => *dimensions as usize,
            Self::Hashed { dimensions } => *dimensions,
        }
    }

    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        match self {
            Self::OpenAi {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model)
                    .dimensions(*dimensions)
                    .input([input])
                    .build()?;

                let response = client.embeddings().create(request).await?;

                let embedding = response
                    .data
                    .first()
                    .ok_or_else(|| AppError::Llm("No embedding data received".into()))?
                    .embedding
                    .clone();

                debug!(dimensions = embedding.len(), "embedding generated");
                Ok(embedding)
            }
            Self::Hashed { dimensions } => Ok(hashed_embedding(input, *dimensions)),
        }
    }
}

/// Token-bucket hashing: each whitespace token lands in a bucket derived from
/// its SHA-256, the result is L2-normalized. Stable across runs, similar
/// texts land near each other, which is all the tests need.
fn hashed_embedding(input: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dimensions.max(1)];

    for token in input.split_whitespace() {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let mut bytes = [0_u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bytes) % vector.len() as u64) as usize;
        if let Some(slot) = vector.get_mut(bucket) {
            *slot += 1.0;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}
