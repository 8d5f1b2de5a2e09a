//! robots.txt gating.
//!
//! Checks fetch a target's origin robots.txt, parse the user-agent groups,
//! and apply longest-prefix rule matching. Everything here fails open: an
//! unreachable or unparseable robots.txt never blocks a check.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

/// How long a fetched robots.txt stays valid per origin
const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[async_trait]
pub trait RobotsPolicy: Send + Sync {
    /// Whether `user_agent` may fetch `url`. Fail-open on any error.
    async fn is_allowed(&self, url: &str, user_agent: &str) -> bool;
}

/// Policy that never blocks; used for targets opting out of robots checks
pub struct AllowAllPolicy;

#[async_trait]
impl RobotsPolicy for AllowAllPolicy {
    async fn is_allowed(&self, _url: &str, _user_agent: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RuleKind {
    Allow,
    Disallow,
}

#[derive(Debug, Clone)]
struct Rule {
    kind: RuleKind,
    path: String,
}

#[derive(Debug, Clone)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed rule set for one origin
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    groups: Vec<Group>,
}

impl RobotsRules {
    pub fn parse(body: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current: Option<Group> = None;
        // a run of consecutive user-agent lines shares one group
        let mut agents_open = false;

        for line in body.lines() {
            let line = match line.find('#') {
                Some(idx) => &line[..idx],
                None => line,
            };
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    if !agents_open {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                        current = Some(Group {
                            agents: Vec::new(),
                            rules: Vec::new(),
                        });
                        agents_open = true;
                    }
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    agents_open = false;
                    if let Some(group) = current.as_mut() {
                        if !value.is_empty() {
                            group.rules.push(Rule {
                                kind: if field == "allow" {
                                    RuleKind::Allow
                                } else {
                                    RuleKind::Disallow
                                },
                                path: value.to_string(),
                            });
                        }
                    }
                }
                _ => {
                    agents_open = false;
                }
            }
        }
        if let Some(group) = current.take() {
            groups.push(group);
        }

        Self { groups }
    }

    /// Longest matching rule wins; allow wins a length tie. No matching
    /// rule, or no applicable group, means allowed.
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        let Some(group) = self.group_for(user_agent) else {
            return true;
        };

        let mut verdict = true;
        let mut best_len = 0usize;
        for rule in &group.rules {
            if path.starts_with(rule.path.as_str()) {
                let len = rule.path.len();
                let allow = rule.kind == RuleKind::Allow;
                if len > best_len || (len == best_len && allow) {
                    best_len = len;
                    verdict = allow;
                }
            }
        }
        verdict
    }

    fn group_for(&self, user_agent: &str) -> Option<&Group> {
        let ua = user_agent.to_ascii_lowercase();
        // named group first, wildcard group as fallback
        self.groups
            .iter()
            .find(|g| g.agents.iter().any(|a| a != "*" && ua.contains(a.as_str())))
            .or_else(|| self.groups.iter().find(|g| g.agents.iter().any(|a| a == "*")))
    }
}

struct CacheEntry {
    rules: RobotsRules,
    fetched_at: Instant,
}

/// Fetching policy with a per-origin cache
pub struct HttpRobotsPolicy {
    client: reqwest::Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl HttpRobotsPolicy {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            cache: Mutex::new(HashMap::new()),
            ttl: CACHE_TTL,
        })
    }

    async fn rules_for_origin(&self, origin: &str) -> RobotsRules {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(origin) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return entry.rules.clone();
                }
            }
        }

        let robots_url = format!("{}/robots.txt", origin);
        let rules = match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => RobotsRules::parse(&body),
                Err(e) => {
                    debug!("Failed to read {}: {}", robots_url, e);
                    RobotsRules::default()
                }
            },
            Ok(response) => {
                debug!("{} returned {}", robots_url, response.status());
                RobotsRules::default()
            }
            Err(e) => {
                debug!("Failed to fetch {}: {}", robots_url, e);
                RobotsRules::default()
            }
        };

        let mut cache = self.cache.lock().await;
        cache.insert(
            origin.to_string(),
            CacheEntry {
                rules: rules.clone(),
                fetched_at: Instant::now(),
            },
        );
        rules
    }
}

#[async_trait]
impl RobotsPolicy for HttpRobotsPolicy {
    async fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        let origin = parsed.origin().ascii_serialization();
        if origin == "null" {
            return true;
        }

        let rules = self.rules_for_origin(&origin).await;
        rules.is_allowed(parsed.path(), user_agent)
    }
}
