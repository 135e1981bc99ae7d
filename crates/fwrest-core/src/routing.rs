//! Request routing
//!
//! The device answers a fixed set of endpoints. They are kept in a static,
//! ordered table of `(method, matcher, handler)` entries evaluated top to
//! bottom; the first match wins. Paths are the normalized request paths
//! (no leading `/`), and a [`Matcher::Prefix`] hands the remainder of the path
//! to the handler as its parameter.
//!
//! ```
//! use fwrest_core::routing::{Matcher, Resolution, RouteTable};
//! use fwrest_core::Method;
//!
//! let table = RouteTable::new("api/")
//!     .route(Method::Get, Matcher::Exact("api/info"), 1)
//!     .route(Method::Get, Matcher::Prefix("api/lfs/"), 2);
//!
//! assert_eq!(table.resolve(Method::Get, "api/lfs/www/a.js"), Resolution::Route { handler: 2, param: "www/a.js" });
//! assert_eq!(table.resolve(Method::Get, "api/nothing"), Resolution::Echo);
//! assert_eq!(table.resolve(Method::Get, "favicon.ico"), Resolution::NotFound);
//! ```

use crate::error::{CoreError, CoreResult};
use crate::request::Method;

/// How a route compares against a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Whole path must equal the literal
    Exact(&'static str),
    /// Path must start with the literal; the rest becomes the parameter
    Prefix(&'static str),
}

impl Matcher {
    fn matches<'p>(&self, path: &'p str) -> Option<&'p str> {
        match self {
            Matcher::Exact(literal) => (path == *literal).then_some(""),
            Matcher::Prefix(literal) => path.strip_prefix(literal),
        }
    }
}

#[derive(Debug, Clone)]
struct Route<H> {
    method: Method,
    matcher: Matcher,
    handler: H,
}

/// Outcome of resolving one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'p, H> {
    /// A table entry matched; `param` is the path remainder after a prefix
    Route { handler: H, param: &'p str },
    /// Inside the API namespace but unknown: answer with the diagnostic echo
    Echo,
    /// Outside the API namespace
    NotFound,
}

/// Ordered, first-match-wins route table
#[derive(Debug, Clone)]
pub struct RouteTable<H> {
    routes: Vec<Route<H>>,
    echo_prefix: &'static str,
}

impl<H: Copy> RouteTable<H> {
    /// Create an empty table. Unmatched paths starting with `echo_prefix`
    /// resolve to [`Resolution::Echo`].
    pub fn new(echo_prefix: &'static str) -> Self {
        Self {
            routes: Vec::new(),
            echo_prefix,
        }
    }

    /// Append an entry; entries added earlier take precedence
    pub fn route(mut self, method: Method, matcher: Matcher, handler: H) -> Self {
        self.routes.push(Route {
            method,
            matcher,
            handler,
        });
        self
    }

    pub fn resolve<'p>(&self, method: Method, path: &'p str) -> Resolution<'p, H> {
        for route in &self.routes {
            if route.method != method {
                continue;
            }
            if let Some(param) = route.matcher.matches(path) {
                return Resolution::Route {
                    handler: route.handler,
                    param,
                };
            }
        }

        if path.starts_with(self.echo_prefix) {
            Resolution::Echo
        } else {
            Resolution::NotFound
        }
    }
}

// =============================================================================
// Path parameters
// =============================================================================

/// Parse a hexadecimal address, with or without a `0x` prefix.
pub fn parse_hex(text: &str) -> CoreResult<u32> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CoreError::Parse(format!("invalid hex value '{}'", text)));
    }

    u32::from_str_radix(digits, 16)
        .map_err(|_| CoreError::Parse(format!("hex value '{}' out of range", text)))
}

/// Parse a `<hex-start>-<hex-len>` range parameter.
pub fn parse_hex_range(text: &str) -> CoreResult<(u32, u32)> {
    let (start, len) = text
        .split_once('-')
        .ok_or_else(|| CoreError::Parse(format!("expected <start>-<len>, got '{}'", text)))?;
    Ok((parse_hex(start)?, parse_hex(len)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum H {
        Exact,
        Prefix,
        Shadowed,
        PostOnly,
    }

    fn table() -> RouteTable<H> {
        RouteTable::new("api/")
            .route(Method::Get, Matcher::Exact("api/flash"), H::Exact)
            .route(Method::Get, Matcher::Prefix("api/flash/"), H::Prefix)
            .route(Method::Get, Matcher::Prefix("api/flash/x"), H::Shadowed)
            .route(Method::Post, Matcher::Exact("api/ota"), H::PostOnly)
    }

    #[test]
    fn exact_match_has_empty_param() {
        assert_eq!(
            table().resolve(Method::Get, "api/flash"),
            Resolution::Route {
                handler: H::Exact,
                param: ""
            }
        );
    }

    #[test]
    fn first_match_wins() {
        assert_eq!(
            table().resolve(Method::Get, "api/flash/x1"),
            Resolution::Route {
                handler: H::Prefix,
                param: "x1"
            }
        );
    }

    #[test]
    fn method_is_part_of_the_match() {
        assert_eq!(table().resolve(Method::Get, "api/ota"), Resolution::Echo);
        assert_eq!(
            table().resolve(Method::Post, "api/ota"),
            Resolution::Route {
                handler: H::PostOnly,
                param: ""
            }
        );
    }

    #[test]
    fn outside_namespace_is_not_found() {
        assert_eq!(table().resolve(Method::Get, "index.html"), Resolution::NotFound);
    }

    #[test]
    fn hex_values() {
        assert_eq!(parse_hex("132000").unwrap(), 0x132000);
        assert_eq!(parse_hex("0x1F").unwrap(), 0x1F);
        assert_eq!(parse_hex("abcDEF").unwrap(), 0xABCDEF);
        assert!(matches!(parse_hex(""), Err(CoreError::Parse(_))));
        assert!(matches!(parse_hex("12zz"), Err(CoreError::Parse(_))));
        assert!(matches!(parse_hex("123456789"), Err(CoreError::Parse(_))));
    }

    #[test]
    fn hex_ranges() {
        assert_eq!(parse_hex_range("1000-200").unwrap(), (0x1000, 0x200));
        assert!(matches!(parse_hex_range("1000"), Err(CoreError::Parse(_))));
        assert!(matches!(parse_hex_range("1000-"), Err(CoreError::Parse(_))));
        assert!(matches!(parse_hex_range("-10"), Err(CoreError::Parse(_))));
    }
}
