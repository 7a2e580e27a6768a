//! Mapping a public `/n8n/...` request onto n8n webhook URLs.
//!
//! `/n8n/<rest>?key=K&x=1` becomes `<base>/webhook/<rest>?x=1` with `K`
//! relocated to the `X-API-Key` header. The fallback URL is identical except
//! for the `/webhook-test/` segment.
//!
//! `Url::parse` resolves dot-segments (including `%2e%2e`) and turns `\` into
//! `/`, so a remainder containing them is refused rather than forwarded to
//! some other upstream path with the caller's credentials attached.

use url::Url;

use super::error::ProxyError;

/// Public prefix that routes a request to the upstream.
pub const PUBLIC_PREFIX: &str = "/n8n/";

/// Production webhook segment on the upstream.
pub const WEBHOOK_SEGMENT: &str = "/webhook/";

/// Segment used by n8n for workflows that are only listening in test mode.
pub const WEBHOOK_TEST_SEGMENT: &str = "/webhook-test/";

/// Query parameter carrying the API key.
pub const API_KEY_PARAM: &str = "key";

/// Upstream URLs and relocated token for one incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub primary: Url,
    pub fallback: Url,
    /// Value of the first `key` query parameter, empty if absent.
    pub api_key: String,
}

impl ForwardTarget {
    /// Resolve the targets for `path` (which must start with [`PUBLIC_PREFIX`])
    /// and the raw query string of the incoming request.
    pub fn resolve(base_url: &str, path: &str, query: Option<&str>) -> Result<Self, ProxyError> {
        let rest = path.strip_prefix(PUBLIC_PREFIX).unwrap_or(path);
        if escapes_prefix(rest) {
            return Err(ProxyError::UnsafePath {
                path: path.to_string(),
            });
        }
        let (api_key, query) = split_api_key(query);

        let base = Url::parse(base_url).map_err(|source| ProxyError::InvalidUpstream {
            url: base_url.to_string(),
            source,
        })?;
        let base_path = base.path().trim_end_matches('/');

        let primary = build_url(base_url, WEBHOOK_SEGMENT, rest, query.as_deref())?;
        let fallback = build_url(base_url, WEBHOOK_TEST_SEGMENT, rest, query.as_deref())?;

        let stays_inside = |url: &Url, segment: &str| {
            url.path()
                .strip_prefix(base_path)
                .is_some_and(|p| p.starts_with(segment))
        };
        if !stays_inside(&primary, WEBHOOK_SEGMENT) || !stays_inside(&fallback, WEBHOOK_TEST_SEGMENT)
        {
            return Err(ProxyError::UnsafePath {
                path: path.to_string(),
            });
        }

        Ok(Self {
            primary,
            fallback,
            api_key,
        })
    }
}

/// Whether `rest` has a segment URL normalization would collapse: `.`, `..`
/// (plain or `%2e`-encoded in any case) or a backslash.
fn escapes_prefix(rest: &str) -> bool {
    if rest.contains('\\') || rest.to_ascii_lowercase().contains("%5c") {
        return true;
    }
    rest.split('/').any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

fn build_url(
    base_url: &str,
    segment: &str,
    rest: &str,
    query: Option<&str>,
) -> Result<Url, ProxyError> {
    let raw = format!("{}{segment}{rest}", base_url.trim_end_matches('/'));
    let mut url = Url::parse(&raw).map_err(|source| ProxyError::InvalidUpstream {
        url: base_url.to_string(),
        source,
    })?;
    url.set_query(query);
    Ok(url)
}

/// Pull the API key out of a raw query string.
///
/// Returns the first `key` value (empty if none) and the re-encoded query
/// without any `key` pairs, or `None` when nothing else remains.
pub fn split_api_key(query: Option<&str>) -> (String, Option<String>) {
    let Some(query) = query else {
        return (String::new(), None);
    };

    let mut api_key = None;
    let mut kept = url::form_urlencoded::Serializer::new(String::new());
    let mut kept_any = false;

    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if name == API_KEY_PARAM {
            if api_key.is_none() {
                api_key = Some(value.into_owned());
            }
            continue;
        }
        kept.append_pair(&name, &value);
        kept_any = true;
    }

    let rest = kept_any.then(|| kept.finish());
    (api_key.unwrap_or_default(), rest)
}
