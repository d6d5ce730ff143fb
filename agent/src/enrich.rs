use std::sync::OnceLock;

use common::{EnrichedEvent, Event, LinkRewriteRule};
use regex::Regex;

static EMAIL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn email_pattern() -> &'static Regex {
    EMAIL_PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .expect("email pattern is valid")
    })
}

/// Region rules that ship with the agent. Configured rules are appended.
pub fn builtin_link_rewrites() -> Vec<LinkRewriteRule> {
    vec![LinkRewriteRule {
        host: "cloudinfra-gw.in.portal.checkpoint.com".to_string(),
        from: "portal.checkpoint.com".to_string(),
        to: "in.portal.checkpoint.com".to_string(),
    }]
}

/// First email address found in `description`, or an empty string.
pub fn extract_recipient(description: &str) -> String {
    email_pattern()
        .find(description)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Applies the first rule for `host` whose `from` occurs in `link`.
pub fn rewrite_entity_link(link: &str, host: &str, rules: &[LinkRewriteRule]) -> String {
    let rule = rules
        .iter()
        .find(|r| r.host == host && !r.from.is_empty() && link.contains(r.from.as_str()));

    match rule {
        // Already pointing at the regional portal.
        Some(rule) if link.contains(rule.to.as_str()) => link.to_string(),
        Some(rule) => link.replace(rule.from.as_str(), &rule.to),
        None => link.to_string(),
    }
}

/// Per-event enrichment bound to the active API host.
#[derive(Debug, Clone)]
pub struct Enricher {
    host: String,
    rules: Vec<LinkRewriteRule>,
}

impl Enricher {
    pub fn new(host: impl Into<String>, extra_rules: &[LinkRewriteRule]) -> Self {
        let mut rules = builtin_link_rewrites();
        rules.extend_from_slice(extra_rules);
        Self {
            host: host.into(),
            rules,
        }
    }

    pub fn enrich(&self, mut event: Event) -> EnrichedEvent {
        let recipient = extract_recipient(&event.description);
        event.entity_link = rewrite_entity_link(&event.entity_link, &self.host, &self.rules);
        // The derived recipient replaces any the API sent.
        event.extra.remove("recipient");
        EnrichedEvent { event, recipient }
    }

    pub fn enrich_all(&self, events: Vec<Event>) -> Vec<EnrichedEvent> {
        events.into_iter().map(|e| self.enrich(e)).collect()
    }
}
