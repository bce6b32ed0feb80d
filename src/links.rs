//! Resolver registry and link engine
//!
//! Resolvers map a list of source filter values (plus the link's config and
//! optionally the target's known values) to `(resolved, unmapped)`. They are
//! stateless, registered under a unique name, and safe to use concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use regex::RegexBuilder;
use tracing::{debug, info, warn};

use crate::error::{DepictioError, Result};
use crate::models::{
    DcLink, LinkConfig, LinkResolutionRequest, LinkResolutionResponse, ResolverKind,
};

/// A value-mapping strategy. Implementations must not mutate their inputs.
pub trait LinkResolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Map source values to target identifiers.
    ///
    /// Returns `(resolved_values, unmapped_values)`; resolution failures are
    /// reported through `unmapped`, never as errors.
    fn resolve(
        &self,
        source_values: &[String],
        config: &LinkConfig,
        target_known_values: Option<&[String]>,
    ) -> (Vec<String>, Vec<String>);
}

/// Identity: values pass through as strings
pub struct DirectResolver;

impl LinkResolver for DirectResolver {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn resolve(
        &self,
        source_values: &[String],
        _config: &LinkConfig,
        _target_known_values: Option<&[String]>,
    ) -> (Vec<String>, Vec<String>) {
        debug!(count = source_values.len(), "Direct resolution");
        (source_values.to_vec(), Vec::new())
    }
}

/// Expand canonical ids to their variants through the configured mappings.
///
/// Unmatched canonicals are forwarded as-is and reported unmapped, so a
/// missing mapping degrades to direct behavior instead of dropping the
/// filter value.
pub struct SampleMappingResolver;

impl LinkResolver for SampleMappingResolver {
    fn name(&self) -> &'static str {
        "sample_mapping"
    }

    fn resolve(
        &self,
        source_values: &[String],
        config: &LinkConfig,
        _target_known_values: Option<&[String]>,
    ) -> (Vec<String>, Vec<String>) {
        let empty = HashMap::new();
        let mappings = config.mappings.as_ref().unwrap_or(&empty);

        let mut resolved = Vec::new();
        let mut unmapped = Vec::new();

        for value in source_values {
            let variants = if config.case_sensitive {
                mappings.get(value)
            } else {
                mappings
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(value))
                    .map(|(_, variants)| variants)
            };

            match variants {
                Some(variants) => {
                    debug!(value = %value, variants = variants.len(), "Canonical id expanded");
                    resolved.extend(variants.iter().cloned());
                }
                None => {
                    debug!(value = %value, "No mapping, forwarding as-is");
                    resolved.push(value.clone());
                    unmapped.push(value.clone());
                }
            }
        }

        info!(
            source = source_values.len(),
            resolved = resolved.len(),
            unmapped = unmapped.len(),
            "Sample mapping resolution"
        );
        (resolved, unmapped)
    }
}

/// Substitute each value into the `{sample}` slot of the template
pub struct PatternResolver;

impl LinkResolver for PatternResolver {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn resolve(
        &self,
        source_values: &[String],
        config: &LinkConfig,
        _target_known_values: Option<&[String]>,
    ) -> (Vec<String>, Vec<String>) {
        let Some(template) = &config.pattern else {
            warn!("No pattern configured, falling back to direct");
            return (source_values.to_vec(), Vec::new());
        };

        let resolved = source_values
            .iter()
            .map(|value| template.replace("{sample}", value))
            .collect();
        (resolved, Vec::new())
    }
}

/// Prefix-match target values with a regex built from each source value
pub struct RegexResolver;

impl LinkResolver for RegexResolver {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn resolve(
        &self,
        source_values: &[String],
        config: &LinkConfig,
        target_known_values: Option<&[String]>,
    ) -> (Vec<String>, Vec<String>) {
        let Some(targets) = target_known_values else {
            warn!("No target values provided, returning source as-is");
            return (source_values.to_vec(), Vec::new());
        };

        let mut resolved = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut unmapped = Vec::new();

        for value in source_values {
            let pattern = format!("^{}.*$", regex::escape(value));
            let compiled = RegexBuilder::new(&pattern)
                .case_insensitive(!config.case_sensitive)
                .build();
            let Ok(compiled) = compiled else {
                unmapped.push(value.clone());
                continue;
            };

            let matches: Vec<&String> = targets.iter().filter(|t| compiled.is_match(t)).collect();
            if matches.is_empty() {
                unmapped.push(value.clone());
            } else {
                for matched in matches {
                    if seen.insert(matched.clone()) {
                        resolved.push(matched.clone());
                    }
                }
            }
        }

        info!(
            source = source_values.len(),
            resolved = resolved.len(),
            unmapped = unmapped.len(),
            "Regex resolution"
        );
        (resolved, unmapped)
    }
}

/// Glob-match target values with `{value}*`
pub struct WildcardResolver;

impl LinkResolver for WildcardResolver {
    fn name(&self) -> &'static str {
        "wildcard"
    }

    fn resolve(
        &self,
        source_values: &[String],
        config: &LinkConfig,
        target_known_values: Option<&[String]>,
    ) -> (Vec<String>, Vec<String>) {
        let Some(targets) = target_known_values else {
            warn!("No target values provided, returning source as-is");
            return (source_values.to_vec(), Vec::new());
        };

        let options = glob::MatchOptions {
            case_sensitive: config.case_sensitive,
            ..Default::default()
        };

        let mut resolved = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut unmapped = Vec::new();

        for value in source_values {
            let Ok(pattern) = glob::Pattern::new(&format!("{value}*")) else {
                unmapped.push(value.clone());
                continue;
            };
            let matches: Vec<&String> = targets
                .iter()
                .filter(|t| pattern.matches_with(t, options))
                .collect();
            if matches.is_empty() {
                unmapped.push(value.clone());
            } else {
                for matched in matches {
                    if seen.insert(matched.clone()) {
                        resolved.push(matched.clone());
                    }
                }
            }
        }

        (resolved, unmapped)
    }
}

/// Registry of resolvers keyed by unique name
pub struct ResolverRegistry {
    resolvers: HashMap<&'static str, Arc<dyn LinkResolver>>,
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        let mut registry = Self {
            resolvers: HashMap::new(),
        };
        registry.register(Arc::new(DirectResolver));
        registry.register(Arc::new(SampleMappingResolver));
        registry.register(Arc::new(PatternResolver));
        registry.register(Arc::new(RegexResolver));
        registry.register(Arc::new(WildcardResolver));
        registry
    }
}

impl ResolverRegistry {
    pub fn register(&mut self, resolver: Arc<dyn LinkResolver>) {
        self.resolvers.insert(resolver.name(), resolver);
    }

    pub fn get(&self, kind: ResolverKind) -> Result<Arc<dyn LinkResolver>> {
        self.resolvers.get(kind.as_str()).cloned().ok_or_else(|| {
            DepictioError::ConfigInvalid(format!("unknown resolver '{}'", kind.as_str()))
        })
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.resolvers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Link engine: finds the matching enabled link and applies its resolver.
pub struct LinkEngine {
    registry: ResolverRegistry,
}

impl Default for LinkEngine {
    fn default() -> Self {
        Self {
            registry: ResolverRegistry::default(),
        }
    }
}

impl LinkEngine {
    pub fn new(registry: ResolverRegistry) -> Self {
        Self { registry }
    }

    /// Find the enabled link matching the request among the project's links.
    pub fn find_link<'a>(
        links: &'a [DcLink],
        request: &LinkResolutionRequest,
    ) -> Option<&'a DcLink> {
        links.iter().find(|link| {
            link.enabled
                && link.source_dc_id == request.source_dc_id
                && link.source_column == request.source_column
                && link.target_dc_id == request.target_dc_id
        })
    }

    /// Resolve filter values through the matching link.
    ///
    /// `None` when no enabled link matches — callers treat this as "no
    /// cross-DC effect".
    pub fn resolve(
        &self,
        links: &[DcLink],
        request: &LinkResolutionRequest,
        target_known_values: Option<&[String]>,
    ) -> Result<Option<LinkResolutionResponse>> {
        let Some(link) = Self::find_link(links, request) else {
            debug!(
                source_dc = %request.source_dc_id,
                column = %request.source_column,
                "No enabled link, filter has no cross-DC effect"
            );
            return Ok(None);
        };

        let resolver = self.registry.get(link.link_config.resolver)?;
        let (resolved, unmapped) = resolver.resolve(
            &request.filter_values,
            &link.link_config,
            target_known_values,
        );

        Ok(Some(LinkResolutionResponse {
            match_count: resolved.len(),
            resolved_values: resolved,
            link_id: link.id,
            resolver_used: resolver.name().to_string(),
            target_type: link.target_type.as_str().to_string(),
            source_count: request.filter_values.len(),
            unmapped_values: unmapped,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;
    use crate::models::LinkTargetType;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_direct_round_trip() {
        let (resolved, unmapped) =
            DirectResolver.resolve(&strings(&["v"]), &LinkConfig::default(), None);
        assert_eq!(resolved, strings(&["v"]));
        assert!(unmapped.is_empty());
    }

    #[test]
    fn test_sample_mapping_expands_variants() {
        let config = LinkConfig {
            resolver: ResolverKind::SampleMapping,
            mappings: Some(HashMap::from([(
                "S".to_string(),
                strings(&["A", "B"]),
            )])),
            ..Default::default()
        };
        let (resolved, unmapped) = SampleMappingResolver.resolve(&strings(&["S"]), &config, None);
        assert_eq!(resolved, strings(&["A", "B"]));
        assert!(unmapped.is_empty());
    }

    #[test]
    fn test_sample_mapping_forwards_unmatched() {
        let config = LinkConfig {
            resolver: ResolverKind::SampleMapping,
            mappings: Some(HashMap::from([("S1".to_string(), strings(&["S1_R1"]))])),
            ..Default::default()
        };
        let (resolved, unmapped) = SampleMappingResolver.resolve(&strings(&["S2"]), &config, None);
        assert_eq!(resolved, strings(&["S2"]));
        assert_eq!(unmapped, strings(&["S2"]));
    }

    #[test]
    fn test_sample_mapping_case_insensitive() {
        let config = LinkConfig {
            resolver: ResolverKind::SampleMapping,
            mappings: Some(HashMap::from([("S1".to_string(), strings(&["S1_R1"]))])),
            case_sensitive: false,
            ..Default::default()
        };
        let (resolved, unmapped) = SampleMappingResolver.resolve(&strings(&["s1"]), &config, None);
        assert_eq!(resolved, strings(&["S1_R1"]));
        assert!(unmapped.is_empty());
    }

    #[test]
    fn test_pattern_substitution() {
        let config = LinkConfig {
            resolver: ResolverKind::Pattern,
            pattern: Some("{sample}.bam".to_string()),
            ..Default::default()
        };
        let (resolved, unmapped) = PatternResolver.resolve(&strings(&["S"]), &config, None);
        assert_eq!(resolved, strings(&["S.bam"]));
        assert!(unmapped.is_empty());
    }

    #[test]
    fn test_regex_prefix_match() {
        let targets = strings(&["S1_R1", "S1_R2", "S2_R1"]);
        let (resolved, unmapped) =
            RegexResolver.resolve(&strings(&["S1"]), &LinkConfig::default(), Some(&targets));
        assert_eq!(resolved, strings(&["S1_R1", "S1_R2"]));
        assert!(unmapped.is_empty());
    }

    #[test]
    fn test_regex_reports_unmatched() {
        let targets = strings(&["S1_R1"]);
        let (resolved, unmapped) =
            RegexResolver.resolve(&strings(&["S9"]), &LinkConfig::default(), Some(&targets));
        assert!(resolved.is_empty());
        assert_eq!(unmapped, strings(&["S9"]));
    }

    #[test]
    fn test_regex_escapes_special_chars() {
        let targets = strings(&["a.b_1", "aXb_1"]);
        let (resolved, _) =
            RegexResolver.resolve(&strings(&["a.b"]), &LinkConfig::default(), Some(&targets));
        assert_eq!(resolved, strings(&["a.b_1"]));
    }

    #[test]
    fn test_wildcard_glob_match() {
        let targets = strings(&["S1_R1.bam", "S1_R2.bam", "S2_R1.bam"]);
        let (resolved, unmapped) = WildcardResolver.resolve(
            &strings(&["S1"]),
            &LinkConfig::default(),
            Some(&targets),
        );
        assert_eq!(resolved, strings(&["S1_R1.bam", "S1_R2.bam"]));
        assert!(unmapped.is_empty());
    }

    #[test]
    fn test_registry_has_all_builtins() {
        let registry = ResolverRegistry::default();
        assert_eq!(
            registry.names(),
            vec!["direct", "pattern", "regex", "sample_mapping", "wildcard"]
        );
    }

    fn sample_link(source_dc: ObjectId, target_dc: ObjectId, enabled: bool) -> DcLink {
        DcLink {
            id: ObjectId::new(),
            source_dc_id: source_dc,
            source_column: "sample".to_string(),
            target_dc_id: target_dc,
            target_type: LinkTargetType::Table,
            link_config: LinkConfig::default(),
            description: None,
            enabled,
        }
    }

    #[test]
    fn test_link_resolution_response_fields() {
        let source_dc = ObjectId::new();
        let target_dc = ObjectId::new();
        let links = vec![sample_link(source_dc, target_dc, true)];
        let request = LinkResolutionRequest {
            source_dc_id: source_dc,
            source_column: "sample".to_string(),
            filter_values: strings(&["S1", "S2"]),
            target_dc_id: target_dc,
        };

        let response = LinkEngine::default()
            .resolve(&links, &request, None)
            .unwrap()
            .unwrap();
        assert_eq!(response.resolved_values, strings(&["S1", "S2"]));
        assert_eq!(response.resolver_used, "direct");
        assert_eq!(response.match_count, 2);
        assert_eq!(response.source_count, 2);
        assert!(response.unmapped_values.is_empty());
    }

    #[test]
    fn test_disabled_link_yields_no_effect() {
        let source_dc = ObjectId::new();
        let target_dc = ObjectId::new();
        let links = vec![sample_link(source_dc, target_dc, false)];
        let request = LinkResolutionRequest {
            source_dc_id: source_dc,
            source_column: "sample".to_string(),
            filter_values: strings(&["S1"]),
            target_dc_id: target_dc,
        };
        assert!(LinkEngine::default()
            .resolve(&links, &request, None)
            .unwrap()
            .is_none());
    }
}
