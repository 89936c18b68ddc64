//! Route table construction and lookup.
//!
//! # Responsibilities
//! - Parse route patterns (`/users/:id`, `/static/*`) into segments
//! - Match a method and path against the table, capturing parameters
//! - Rank overlapping matches: more literal segments win, a wildcard
//!   never beats a non-wildcard, earlier registration breaks ties
//!
//! # Design Decisions
//! - The table is built once by the builder and never mutated while
//!   serving; chains are shared behind `Arc`
//! - A trailing `*` captures the path remainder under `params["*"]`
//! - Trailing slashes are not significant

use std::collections::HashMap;
use std::sync::Arc;

use hyper::Method;

use crate::pipeline::chain::Chain;

/// Which methods a route responds to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    Only(Method),
    Any,
}

impl MethodFilter {
    fn accepts(&self, method: &Method) -> bool {
        match self {
            MethodFilter::Only(m) => m == method,
            MethodFilter::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

struct RouteDef {
    filter: MethodFilter,
    pattern: String,
    segments: Vec<Segment>,
    chain: Arc<Chain>,
}

/// Builder collecting routes before the table is frozen.
#[derive(Default)]
pub struct RouteTableBuilder {
    routes: Vec<RouteDef>,
}

impl RouteTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, filter: MethodFilter, pattern: &str, chain: Chain) {
        self.routes.push(RouteDef {
            filter,
            pattern: pattern.to_string(),
            segments: parse_pattern(pattern),
            chain: Arc::new(chain),
        });
    }

    pub fn build(self) -> RouteTable {
        RouteTable {
            routes: self.routes,
        }
    }
}

/// Immutable route table, shared read-only across requests.
pub struct RouteTable {
    routes: Vec<RouteDef>,
}

/// A successful lookup.
pub struct RouteMatch<'t> {
    pub chain: &'t Arc<Chain>,
    pub params: HashMap<String, String>,
    pub pattern: &'t str,
}

impl RouteTable {
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the best-matching route for a method and path.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        let parts: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|part| !part.is_empty())
            .collect();

        let mut best: Option<(usize, bool, RouteMatch<'_>)> = None;

        for route in &self.routes {
            if !route.filter.accepts(method) {
                continue;
            }
            let Some(params) = match_segments(&route.segments, &parts) else {
                continue;
            };

            let literals = route
                .segments
                .iter()
                .filter(|segment| matches!(segment, Segment::Literal(_)))
                .count();
            let exact = !route
                .segments
                .iter()
                .any(|segment| matches!(segment, Segment::Wildcard));

            let better = match &best {
                None => true,
                Some((best_literals, best_exact, _)) => {
                    (literals, exact) > (*best_literals, *best_exact)
                }
            };

            if better {
                best = Some((
                    literals,
                    exact,
                    RouteMatch {
                        chain: &route.chain,
                        params,
                        pattern: &route.pattern,
                    },
                ));
            }
        }

        best.map(|(_, _, matched)| matched)
    }
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    pattern
        .trim_matches('/')
        .split('/')
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part == "*" {
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(part.to_string())
            }
        })
        .collect()
}

fn match_segments(segments: &[Segment], parts: &[&str]) -> Option<HashMap<String, String>> {
    let mut params = HashMap::new();

    for (index, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Wildcard => {
                params.insert("*".to_string(), parts.get(index..)?.join("/"));
                return Some(params);
            }
            Segment::Literal(expected) => {
                if parts.get(index) != Some(&expected.as_str()) {
                    return None;
                }
            }
            Segment::Param(name) => {
                let raw = parts.get(index)?;
                let decoded = urlencoding::decode(raw)
                    .map(|value| value.into_owned())
                    .unwrap_or_else(|_| (*raw).to_string());
                params.insert(name.clone(), decoded);
            }
        }
    }

    if parts.len() != segments.len() {
        return None;
    }

    Some(params)
}
