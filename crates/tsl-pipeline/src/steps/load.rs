use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use tsl_types::{is_truthy, split_option, Result, TslError};

use crate::context::Context;
use crate::engine::Pipeline;
use crate::fetch::Fetcher;
use crate::registry::StepHandler;
use crate::resolve::Resolver;
use crate::tree::TslTree;

/// `load <url> [max-depth:N] [prefer-xml:bool]`: fetch a TSL, follow its
/// pointers, and push the resulting tree onto the context.
pub struct LoadStep;

#[async_trait]
impl StepHandler for LoadStep {
    fn step_name(&self) -> &str {
        "load"
    }

    async fn execute(&self, pipeline: &Pipeline, ctx: &mut Context, args: &[String]) -> Result<()> {
        let (url, flags) = args
            .split_first()
            .ok_or_else(|| TslError::MissingArgument("TSL URL or path".into()))?;

        let options = ctx.fetch_options();
        let mut max_depth = options.max_depth;
        let mut prefer_xml = ctx.prefer_xml();
        for flag in flags {
            match split_option(flag) {
                Some(("max-depth", value)) => {
                    max_depth = value.trim().parse::<i64>().map_err(|_| {
                        TslError::validation("max-depth", value, "max-depth must be an integer")
                    })?;
                }
                Some(("prefer-xml", value)) => prefer_xml = is_truthy(value),
                _ => warn!(flag = %flag, "Ignoring unknown load flag"),
            }
        }

        let fetcher: &dyn Fetcher = match &options.transport {
            Some(transport) => transport.as_ref(),
            None => pipeline.fetcher(),
        };
        let root = Resolver::new(fetcher, &options)
            .with_verifier(pipeline.verifier())
            .prefer_xml(prefer_xml)
            .resolve(url, max_depth)
            .await?;

        let filters = ctx.filters();
        if !filters.is_empty() && !filters.matches(&root) {
            info!(
                url = %url,
                territory = root.territory().unwrap_or("unknown"),
                "TSL excluded by fetch filters"
            );
            return Ok(());
        }

        let tree = TslTree::new(Some(Arc::clone(&root)));
        info!(
            url = %url,
            max_depth,
            depth = tree.depth(),
            documents = tree.count(),
            summary = %serde_json::Value::Object(root.summary()),
            "TSL tree loaded"
        );
        ctx.add_tree(tree);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::fetch::FetchOptions;
    use crate::steps::test_support::{args, MapFetcher};

    fn list(territory: &str, pointers: &[&str]) -> Vec<u8> {
        let pointers: String = pointers
            .iter()
            .map(|p| {
                format!("<OtherTSLPointer><TSLLocation>{p}</TSLLocation></OtherTSLPointer>")
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<TrustServiceStatusList xmlns="http://uri.etsi.org/02231/v2#">
  <SchemeInformation>
    <TSLSequenceNumber>1</TSLSequenceNumber>
    <SchemeTerritory>{territory}</SchemeTerritory>
    <PointersToOtherTSL>{pointers}</PointersToOtherTSL>
  </SchemeInformation>
</TrustServiceStatusList>"#
        )
        .into_bytes()
    }

    fn pipeline_with(docs: &[(&str, Vec<u8>)]) -> Pipeline {
        let map: HashMap<String, Vec<u8>> = docs
            .iter()
            .map(|(url, body)| (url.to_string(), body.clone()))
            .collect();
        Pipeline::builder(Vec::new())
            .fetcher(Arc::new(MapFetcher(map)))
            .build()
    }

    fn chain() -> Pipeline {
        pipeline_with(&[
            ("eu.xml", list("EU", &["se.xml", "dk.xml"])),
            ("se.xml", list("SE", &["se-sub.xml"])),
            ("dk.xml", list("DK", &[])),
            ("se-sub.xml", list("SX", &[])),
        ])
    }

    #[tokio::test]
    async fn missing_url_is_an_error() {
        let mut ctx = Context::new();
        let err = LoadStep.execute(&chain(), &mut ctx, &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "missing argument: TSL URL or path");
    }

    #[tokio::test]
    async fn depth_flag_bounds_the_tree() {
        let pl = chain();

        let mut ctx = Context::new();
        LoadStep
            .execute(&pl, &mut ctx, &args(&["eu.xml", "max-depth:0"]))
            .await
            .unwrap();
        assert_eq!(ctx.trees[0].depth(), 0);
        assert_eq!(ctx.tsls.len(), 1);

        let mut ctx = Context::new();
        LoadStep
            .execute(&pl, &mut ctx, &args(&["eu.xml", "max-depth:1"]))
            .await
            .unwrap();
        assert_eq!(ctx.trees[0].depth(), 1);
        assert_eq!(ctx.trees[0].count(), 3);

        let mut ctx = Context::new();
        LoadStep.execute(&pl, &mut ctx, &args(&["eu.xml"])).await.unwrap();
        assert_eq!(ctx.trees[0].depth(), 2);
        assert_eq!(ctx.tsls.len(), 4);
    }

    #[tokio::test]
    async fn depth_comes_from_fetch_options_without_flag() {
        let pl = chain();
        let mut ctx = Context::new();
        ctx.ensure_fetch_options().max_depth = 1;
        LoadStep.execute(&pl, &mut ctx, &args(&["eu.xml"])).await.unwrap();
        assert_eq!(ctx.trees[0].depth(), 1);
    }

    #[tokio::test]
    async fn transport_in_options_overrides_pipeline_fetcher() {
        let pl = pipeline_with(&[]);
        let mut ctx = Context::new();
        ctx.fetch_options = Some(FetchOptions {
            transport: Some(Arc::new(MapFetcher(HashMap::from([(
                "only.xml".to_string(),
                list("FI", &[]),
            )])))),
            ..Default::default()
        });
        LoadStep.execute(&pl, &mut ctx, &args(&["only.xml"])).await.unwrap();
        assert_eq!(ctx.documents()[0].territory(), Some("FI"));
    }

    #[tokio::test]
    async fn filtered_root_is_dropped() {
        let pl = chain();
        let mut ctx = Context::new();
        ctx.set(
            crate::fetch::FILTERS_KEY,
            serde_json::json!({ "territory": ["se"] }),
        );
        LoadStep.execute(&pl, &mut ctx, &args(&["eu.xml"])).await.unwrap();
        assert!(ctx.trees.is_empty());

        LoadStep.execute(&pl, &mut ctx, &args(&["se.xml"])).await.unwrap();
        assert_eq!(ctx.trees.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_root_fails() {
        let mut ctx = Context::new();
        let err = LoadStep
            .execute(&chain(), &mut ctx, &args(&["missing.xml"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing.xml"));
        assert!(!ctx.has_documents());
    }
}
