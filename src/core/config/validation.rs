use super::defaults::RagConfig;
use crate::core::errors::RagError;

pub fn validate_config(config: &RagConfig) -> Result<(), RagError> {
    validate_usize_field("fusion.rrf_k", config.fusion.rrf_k, 1, 100_000)?;
    validate_usize_field("retrieval.top_k", config.retrieval.top_k, 1, 10_000)?;
    validate_required_string_field("retrieval.index_id", &config.retrieval.index_id)?;
    validate_required_string_field("retrieval.graph_id", &config.retrieval.graph_id)?;
    if let Some(dimensions) = config.retrieval.expected_dimensions {
        validate_usize_field("retrieval.expected_dimensions", dimensions, 1, 65_536)?;
    }

    if let Some(limit) = config.rerank.limit {
        validate_usize_field("rerank.limit", limit, 1, 10_000)?;
    }
    if !config.rerank.threshold.is_finite() {
        return Err(config_error("rerank.threshold", "must be a finite number"));
    }

    validate_usize_field(
        "grounding.max_corrections",
        config.grounding.max_corrections,
        0,
        20,
    )?;

    validate_usize_field(
        "community.max_iterations",
        config.community.max_iterations,
        1,
        1_000,
    )?;
    validate_usize_field(
        "community.hierarchy_levels",
        config.community.hierarchy_levels,
        1,
        16,
    )?;
    if let Some(threshold) = config.community.convergence_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(config_error(
                "community.convergence_threshold",
                "must be between 0 and 1",
            ));
        }
    }

    let timeouts = &config.timeouts;
    for (path, value) in [
        ("timeouts.embed_ms", timeouts.embed_ms),
        ("timeouts.search_ms", timeouts.search_ms),
        ("timeouts.graph_ms", timeouts.graph_ms),
        ("timeouts.llm_ms", timeouts.llm_ms),
        ("timeouts.rerank_ms", timeouts.rerank_ms),
        ("timeouts.request_ms", timeouts.request_ms),
    ] {
        if value == 0 {
            return Err(config_error(path, "must be greater than 0"));
        }
    }

    for (path, value) in [
        ("rate_limits.llm_per_second", config.rate_limits.llm_per_second),
        ("rate_limits.embed_per_second", config.rate_limits.embed_per_second),
    ] {
        if value == Some(0) {
            return Err(config_error(path, "must be greater than 0 when set"));
        }
    }

    for (index, source) in config.query.available_sources.iter().enumerate() {
        validate_required_string_field(&format!("query.available_sources[{}]", index), source)?;
    }

    Ok(())
}

fn validate_usize_field(path: &str, value: usize, min: usize, max: usize) -> Result<(), RagError> {
    if value < min || value > max {
        return Err(config_error(
            path,
            &format!("must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

fn validate_required_string_field(path: &str, value: &str) -> Result<(), RagError> {
    if value.trim().is_empty() {
        return Err(config_error(path, "value cannot be empty"));
    }
    Ok(())
}

fn config_error(path: &str, message: &str) -> RagError {
    RagError::InvalidConfig(format!("Invalid config at '{}': {}", path, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&RagConfig::default()).is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = RagConfig::default();
        config.community.convergence_threshold = Some(1.5);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("community.convergence_threshold"));

        let mut config = RagConfig::default();
        config.timeouts.llm_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = RagConfig::default();
        config.query.available_sources = vec!["docs".into(), " ".into()];
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("available_sources[1]"));
    }
}
