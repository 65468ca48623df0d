use crate::context::RequestContext;
use crate::core::config::QuerySettings;
use crate::core::deadline::{guarded, CallOptions};

use super::QueryTransformer;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub rewrite: bool,
    pub expand: bool,
    pub decompose: bool,
    pub select_sources: bool,
    pub available_sources: Vec<String>,
}

impl QueryOptions {
    pub fn is_noop(&self) -> bool {
        !(self.rewrite || self.expand || self.decompose || self.select_sources)
    }
}

impl From<&QuerySettings> for QueryOptions {
    fn from(settings: &QuerySettings) -> Self {
        Self {
            rewrite: settings.rewrite,
            expand: settings.expand,
            decompose: settings.decompose,
            select_sources: settings.select_sources,
            available_sources: settings.available_sources.clone(),
        }
    }
}

/// Applies the enabled transformations in order, each one reading the
/// effective query left by the previous step.
pub struct QueryProcessor;

impl QueryProcessor {
    pub async fn process(
        mut ctx: RequestContext,
        transformer: &dyn QueryTransformer,
        opts: &QueryOptions,
        call: &CallOptions,
    ) -> RequestContext {
        if ctx.should_skip() || opts.is_noop() {
            return ctx;
        }

        if opts.rewrite {
            let query = ctx.effective_query().to_string();
            match guarded("query.rewrite", call, transformer.rewrite(&query, call)).await {
                Ok(rewritten) => ctx.rewritten_query = non_blank(rewritten),
                Err(err) => return ctx.fail(err),
            }
        }

        if opts.expand {
            let query = ctx.effective_query().to_string();
            match guarded("query.expand", call, transformer.expand(&query, call)).await {
                Ok(expanded) => ctx.expanded_query = non_blank(expanded),
                Err(err) => return ctx.fail(err),
            }
        }

        if opts.decompose {
            let query = ctx.effective_query().to_string();
            match guarded("query.decompose", call, transformer.decompose(&query, call)).await {
                Ok(parts) => {
                    ctx.sub_questions = parts.into_iter().filter_map(non_blank).collect();
                }
                Err(err) => return ctx.fail(err),
            }
        }

        if opts.select_sources && !opts.available_sources.is_empty() {
            let query = ctx.effective_query().to_string();
            match guarded(
                "query.select_sources",
                call,
                transformer.select_sources(&query, &opts.available_sources, call),
            )
            .await
            {
                Ok(selected) => {
                    ctx.selected_sources = selected
                        .into_iter()
                        .filter(|s| opts.available_sources.contains(s))
                        .collect();
                }
                Err(err) => return ctx.fail(err),
            }
        }

        tracing::debug!(
            request_id = %ctx.request_id,
            effective_query = ctx.effective_query(),
            sub_questions = ctx.sub_questions.len(),
            sources = ?ctx.selected_sources,
            "Query processed"
        );
        ctx
    }
}

fn non_blank(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
