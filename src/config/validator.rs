use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{EarshotError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_context(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EarshotError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "embedding.max_concurrent",
                "Concurrency must be greater than 0",
            ));
        }

        if config.embedding.enabled && config.embedding.model.trim().is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;

        if indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if indexing.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }

        if !(indexing.bm25_k1 >= 0.0 && indexing.bm25_k1.is_finite()) {
            errors.push(ValidationError::new(
                "indexing.bm25_k1",
                format!("k1 must be a non-negative number, got {}", indexing.bm25_k1),
            ));
        }

        if !(0.0..=1.0).contains(&indexing.bm25_b) {
            errors.push(ValidationError::new(
                "indexing.bm25_b",
                format!("b must be between 0.0 and 1.0, got {}", indexing.bm25_b),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.lexical_top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.lexical_top_k",
                "Lexical candidate count must be greater than 0",
            ));
        }

        if retrieval.vector_top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.vector_top_k",
                "Vector candidate count must be greater than 0",
            ));
        }

        if retrieval.final_count == 0 {
            errors.push(ValidationError::new(
                "retrieval.final_count",
                "Final excerpt count must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&retrieval.mmr_lambda) {
            errors.push(ValidationError::new(
                "retrieval.mmr_lambda",
                format!("Lambda must be between 0.0 and 1.0, got {}", retrieval.mmr_lambda),
            ));
        }
    }

    fn validate_context(config: &Config, errors: &mut Vec<ValidationError>) {
        let context = &config.context;

        if context.excerpt_token_cap == 0 {
            errors.push(ValidationError::new(
                "context.excerpt_token_cap",
                "Excerpt token cap must be greater than 0",
            ));
        }

        if context.excerpt_token_cap > context.total_token_budget {
            errors.push(ValidationError::new(
                "context.excerpt_token_cap",
                format!(
                    "Excerpt cap {} exceeds total budget {}",
                    context.excerpt_token_cap, context.total_token_budget
                ),
            ));
        }

        if context.reserved_answer_tokens >= context.total_token_budget {
            errors.push(ValidationError::new(
                "context.reserved_answer_tokens",
                format!(
                    "Answer reserve {} must be below total budget {}",
                    context.reserved_answer_tokens, context.total_token_budget
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_paths(config: &Config) -> Vec<String> {
        match ConfigValidator::validate(config) {
            Ok(()) => Vec::new(),
            Err(EarshotError::ConfigValidation { errors }) => {
                errors.into_iter().map(|e| e.path).collect()
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_lambda_range() {
        let mut config = Config::default();
        config.retrieval.mmr_lambda = -0.5;
        assert_eq!(error_paths(&config), vec!["retrieval.mmr_lambda"]);

        config.retrieval.mmr_lambda = 1.0;
        assert!(error_paths(&config).is_empty());
    }

    #[test]
    fn test_budget_constraints() {
        let mut config = Config::default();
        config.context.total_token_budget = 100;
        config.context.excerpt_token_cap = 180;
        config.context.reserved_answer_tokens = 500;

        assert_eq!(
            error_paths(&config),
            vec!["context.excerpt_token_cap", "context.reserved_answer_tokens"]
        );
    }

    #[test]
    fn test_zero_counts() {
        let mut config = Config::default();
        config.embedding.batch_size = 0;
        config.retrieval.final_count = 0;
        config.indexing.hnsw_m = 0;

        let paths = error_paths(&config);
        assert_eq!(paths.len(), 3);
        assert!(paths.contains(&"embedding.batch_size".to_string()));
    }

    #[test]
    fn test_empty_model_only_matters_when_enabled() {
        let mut config = Config::default();
        config.embedding.model = String::new();
        assert_eq!(error_paths(&config), vec!["embedding.model"]);

        config.embedding.enabled = false;
        assert!(error_paths(&config).is_empty());
    }

    #[test]
    fn test_schema_version() {
        let mut config = Config::default();
        config.meta.schema_version = "0.9.0".to_string();
        assert_eq!(error_paths(&config), vec!["_meta.schema_version"]);
    }
}
