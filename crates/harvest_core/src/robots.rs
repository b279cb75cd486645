//! Robots directive parsing and path matching.

use std::time::Duration;

/// Longest crawl-delay honoured from a robots document; larger values clamp.
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub pattern: String,
    pub allow: bool,
}

/// The directives that apply to one crawler on one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveSet {
    pub rules: Vec<PathRule>,
    pub crawl_delay: Option<Duration>,
    pub sitemaps: Vec<String>,
}

impl DirectiveSet {
    /// No restrictions; used when the host publishes no directives.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Longest matching pattern wins; on a tie `Allow` wins.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            let len = rule.pattern.len();
            best = match best {
                Some((best_len, best_allow))
                    if best_len > len || (best_len == len && (best_allow || !rule.allow)) =>
                {
                    Some((best_len, best_allow))
                }
                _ => Some((len, rule.allow)),
            };
        }
        best.map_or(true, |(_, allow)| allow)
    }

    pub fn disallowed_patterns(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(|rule| !rule.allow)
            .map(|rule| rule.pattern.as_str())
    }
}

#[derive(Debug, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<PathRule>,
    crawl_delay: Option<Duration>,
}

/// Parses a robots document for the crawler identified by `agent_token`.
///
/// Groups naming the token (case-insensitive) take precedence over `*`
/// groups; several matching groups are merged.
pub fn parse_directives(txt: &str, agent_token: &str) -> DirectiveSet {
    let token = agent_token.trim().to_ascii_lowercase();
    let mut groups: Vec<Group> = Vec::new();
    let mut sitemaps = Vec::new();
    let mut current: Option<Group> = None;
    let mut last_was_agent = false;

    for raw_line in txt.lines() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if !last_was_agent {
                    if let Some(done) = current.take() {
                        groups.push(done);
                    }
                }
                current
                    .get_or_insert_with(Group::default)
                    .agents
                    .push(value.to_ascii_lowercase());
                last_was_agent = true;
                continue;
            }
            "allow" | "disallow" => {
                // Empty Disallow means "nothing is disallowed".
                if let (Some(group), false) = (current.as_mut(), value.is_empty()) {
                    group.rules.push(PathRule {
                        pattern: value.to_string(),
                        allow: key == "allow",
                    });
                }
            }
            "crawl-delay" => {
                if let (Some(group), Ok(secs)) = (current.as_mut(), value.parse::<f64>()) {
                    if secs >= 0.0 {
                        let delay = Duration::try_from_secs_f64(secs)
                            .map_or(MAX_CRAWL_DELAY, |delay| delay.min(MAX_CRAWL_DELAY));
                        group.crawl_delay = Some(delay);
                    }
                }
            }
            "sitemap" => {
                if !value.is_empty() {
                    sitemaps.push(value.to_string());
                }
            }
            _ => {}
        }
        last_was_agent = false;
    }
    if let Some(done) = current.take() {
        groups.push(done);
    }

    let named: Vec<&Group> = groups
        .iter()
        .filter(|group| group.agents.iter().any(|agent| *agent == token))
        .collect();
    let selected = if named.is_empty() {
        groups
            .iter()
            .filter(|group| group.agents.iter().any(|agent| agent == "*"))
            .collect()
    } else {
        named
    };

    let mut set = DirectiveSet {
        sitemaps,
        ..DirectiveSet::default()
    };
    for group in selected {
        set.rules.extend(group.rules.iter().cloned());
        if let Some(delay) = group.crawl_delay {
            set.crawl_delay = Some(set.crawl_delay.map_or(delay, |d| d.max(delay)));
        }
    }
    set
}

/// Matches a robots path pattern: `*` matches any run of characters and a
/// trailing `$` anchors the pattern at the end of the path.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };
    let mut pieces = pattern.split('*');
    let first = pieces.next().unwrap_or("");
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };
    let pieces: Vec<&str> = pieces.collect();
    if pieces.is_empty() {
        return !anchored || rest.is_empty();
    }
    for (idx, piece) in pieces.iter().enumerate() {
        if anchored && idx == pieces.len() - 1 {
            return rest.ends_with(piece);
        }
        match rest.find(piece) {
            Some(pos) => rest = &rest[pos + piece.len()..],
            None => return false,
        }
    }
    true
}
