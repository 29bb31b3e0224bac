//! Route table and precedence.
//!
//! Routes are compiled once and sorted by precedence; matching is a scan
//! that stops at the first route whose conditions all hold.
//!
//! | tier | route shape                         | order within tier                     |
//! |------|-------------------------------------|---------------------------------------|
//! | 0    | exact path                          | exact host, wildcard host, no host    |
//! | 1    | path prefix                         | longer prefix, then host specificity  |
//! | 2    | path regex                          | host specificity                      |
//! | 3    | host only                           | exact host before wildcard            |
//! | 4    | catch-all                           |                                       |
//!
//! Remaining ties go to registration order (first or last, configurable).

use std::cmp::Reverse;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::{HeaderName, HeaderValue};

use crate::config::{RouteCacheConfig, RouteConfig, TieBreak};
use crate::error::GatewayError;
use crate::proxy::ProxyRequest;
use crate::routing::matcher::{HeaderMatcher, HostMatcher, Matcher, PathMatcher, RequestView};
use crate::routing::middleware::MiddlewareChain;
use crate::routing::RouteError;

/// Precedence tier of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    ExactPath,
    Prefix,
    Regex,
    HostOnly,
    CatchAll,
}

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub cluster: String,
    pub middlewares: MiddlewareChain,
    pub cache: Option<RouteCacheConfig>,
    host: Option<HostMatcher>,
    path: Option<PathMatcher>,
    headers: Vec<HeaderMatcher>,
    tier: Tier,
}

impl Route {
    pub fn compile(config: &RouteConfig) -> Result<Self, RouteError> {
        let host = config.host.as_deref().map(HostMatcher::new);

        let path = if let Some(exact) = &config.path {
            Some(PathMatcher::Exact(exact.clone()))
        } else if let Some(prefix) = &config.path_prefix {
            Some(PathMatcher::Prefix(prefix.clone()))
        } else if let Some(pattern) = &config.path_regex {
            Some(PathMatcher::regex(pattern).map_err(|e| RouteError::InvalidRegex {
                route: config.name.clone(),
                reason: e.to_string(),
            })?)
        } else {
            None
        };
        // A "/" prefix constrains nothing.
        let path = path.filter(|p| !p.is_root_prefix());

        let headers = config
            .headers
            .iter()
            .map(|h| {
                let invalid = || RouteError::InvalidHeader {
                    route: config.name.clone(),
                    header: h.name.clone(),
                };
                let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| invalid())?;
                let value = h
                    .value
                    .as_deref()
                    .map(HeaderValue::from_str)
                    .transpose()
                    .map_err(|_| invalid())?;
                Ok(HeaderMatcher::new(name, value))
            })
            .collect::<Result<Vec<_>, RouteError>>()?;

        let tier = match (&path, &host) {
            (Some(PathMatcher::Exact(_)), _) => Tier::ExactPath,
            (Some(PathMatcher::Prefix(_)), _) => Tier::Prefix,
            (Some(PathMatcher::Regex(_)), _) => Tier::Regex,
            (None, Some(_)) => Tier::HostOnly,
            (None, None) => Tier::CatchAll,
        };

        Ok(Self {
            name: config.name.clone(),
            cluster: config.cluster.clone(),
            middlewares: MiddlewareChain::compile(&config.name, &config.middlewares)?,
            cache: config.cache.clone().filter(|c| c.enabled),
            host,
            path,
            headers,
            tier,
        })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// 0 = exact host, 1 = wildcard host, 2 = any host.
    fn host_rank(&self) -> u8 {
        match &self.host {
            Some(h) if h.is_exact() => 0,
            Some(_) => 1,
            None => 2,
        }
    }

    fn matches(&self, view: &RequestView<'_>) -> bool {
        self.host.as_ref().map_or(true, |h| h.matches(view))
            && self.path.as_ref().map_or(true, |p| p.matches(view))
            && self.headers.iter().all(|h| h.matches(view))
    }
}

/// An immutable, precedence-sorted set of routes.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Arc<Route>>,
}

impl Router {
    /// Compile every route; the first invalid route fails the whole table.
    pub fn compile(configs: &[RouteConfig], tie_break: TieBreak) -> Result<Self, RouteError> {
        let mut routes = configs
            .iter()
            .enumerate()
            .map(|(idx, config)| Ok((idx, Arc::new(Route::compile(config)?))))
            .collect::<Result<Vec<_>, RouteError>>()?;

        routes.sort_by_key(|(idx, route)| {
            let registration = match tie_break {
                TieBreak::FirstRegistered => *idx as i64,
                TieBreak::LastRegistered => -(*idx as i64),
            };
            let prefix_len = route.path.as_ref().map_or(0, |p| p.prefix_len());
            (route.tier, Reverse(prefix_len), route.host_rank(), registration)
        });

        Ok(Self {
            routes: routes.into_iter().map(|(_, r)| r).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes in precedence order.
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn route(&self, request: &ProxyRequest) -> Result<Arc<Route>, GatewayError> {
        let view = RequestView {
            host: request.host(),
            path: request.path(),
            headers: &request.headers,
        };
        self.routes
            .iter()
            .find(|r| r.matches(&view))
            .cloned()
            .ok_or_else(|| GatewayError::NoRoute {
                host: view.host.clone().unwrap_or_default(),
                path: request.path().to_string(),
            })
    }
}

/// The published router, replaced atomically on reload.
#[derive(Debug, Default)]
pub struct RouteTable {
    current: ArcSwap<Router>,
}

impl RouteTable {
    pub fn new(router: Router) -> Self {
        Self {
            current: ArcSwap::from_pointee(router),
        }
    }

    /// Publish a new router. Readers see either the old or the new table.
    pub fn replace(&self, router: Router) {
        self.current.store(Arc::new(router));
    }

    pub fn load(&self) -> Arc<Router> {
        self.current.load_full()
    }

    pub fn route(&self, request: &ProxyRequest) -> Result<Arc<Route>, GatewayError> {
        self.current.load().route(request)
    }
}
