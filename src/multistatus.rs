//! WebDAV multistatus responses
//!
//! A multistatus body carries one `<response>` per resource, each with one `<href>`, an optional
//! `<status>`, and any number of `<propstat>` blocks that have their own status.

use std::collections::HashMap;

use minidom::Element;
use url::Url;

use crate::error::DavError;
use crate::utils::{child_elems, find_elem};

/// Properties of a resource are only trusted when they come with one of these statuses
pub const TRUSTED_STATUSES: [u16; 3] = [200, 201, 207];

/// Properties of a single resource, indexed by their (local) XML tag name, e.g. `getetag`
pub type PropMap = HashMap<String, Element>;
/// Properties of several resources, indexed by the href the server reported
pub type PropertyMap = HashMap<String, PropMap>;

/// A `<propstat>` block
#[derive(Clone, Debug)]
pub struct PropStat {
    pub status: Option<u16>,
    pub props: Vec<Element>,
}

/// A `<response>` block
#[derive(Clone, Debug)]
pub struct ResponseEntry {
    pub href: String,
    pub status: Option<u16>,
    pub propstats: Vec<PropStat>,
}

impl ResponseEntry {
    /// Whether the server tells this resource does not exist (anymore)
    pub fn is_gone(&self) -> bool {
        self.status == Some(404) && self.propstats.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Multistatus {
    pub responses: Vec<ResponseEntry>,
    /// The incremental-sync cursor, when the server sent one at the top level
    pub sync_token: Option<String>,
}

impl Multistatus {
    /// Parse the body of a 207 response
    pub fn parse(text: &str) -> Result<Self, DavError> {
        let root: Element = text.parse()?;
        if root.name() != "multistatus" {
            return Err(DavError::Xml(format!("Expected a <multistatus> root element, got <{}>", root.name())));
        }

        let mut responses = Vec::new();
        for response in child_elems(&root, "response") {
            let href = match child_elems(response, "href").next() {
                None => {
                    log::warn!("Ignoring a <response> that has no <href>");
                    continue;
                },
                Some(href) => href.text().trim().to_string(),
            };

            let status = child_elems(response, "status").next()
                .and_then(|s| parse_status_line(&s.text()));

            let propstats = child_elems(response, "propstat")
                .map(|propstat| {
                    let status = child_elems(propstat, "status").next()
                        .and_then(|s| parse_status_line(&s.text()));
                    let props = child_elems(propstat, "prop")
                        .flat_map(|prop| prop.children().cloned())
                        .collect();
                    PropStat { status, props }
                })
                .collect();

            responses.push(ResponseEntry { href, status, propstats });
        }

        let sync_token = child_elems(&root, "sync-token").next()
            .map(|e| e.text().trim().to_string())
            .filter(|t| t.is_empty() == false);

        Ok(Self { responses, sync_token })
    }

    /// Build a map `href -> {property tag: value}`.
    ///
    /// * resources reported several times are merged,
    /// * properties in a 404 `<propstat>` are dropped, but the resource is kept,
    /// * properties are only kept when their propstat (or, if it has none, their response) has a trusted status.
    pub fn property_map(&self) -> PropertyMap {
        let mut map = PropertyMap::new();
        for response in &self.responses {
            if response.is_gone() {
                continue;
            }
            let entry = map.entry(response.href.clone()).or_insert_with(PropMap::new);

            for propstat in &response.propstats {
                let status = propstat.status.or(response.status);
                match status {
                    Some(code) if TRUSTED_STATUSES.contains(&code) => {
                        for prop in &propstat.props {
                            entry.insert(prop.name().to_string(), prop.clone());
                        }
                    },
                    Some(404) => {
                        log::trace!("Dropping {} unknown properties of {}", propstat.props.len(), response.href);
                    },
                    other => {
                        log::debug!("Ignoring properties of {} with status {:?}", response.href, other);
                    },
                }
            }
        }
        map
    }

    /// Hrefs the server reported as removed (used by sync-collection reports)
    pub fn removed_hrefs(&self) -> Vec<String> {
        self.responses.iter()
            .filter(|r| r.is_gone())
            .map(|r| r.href.clone())
            .collect()
    }
}

/// Parse a status line such as `HTTP/1.1 404 Not Found`
pub fn parse_status_line(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Find the properties of `url` in a property map.
///
/// Servers do not always echo the requested path verbatim. This tries the exact path,
/// the path with its trailing slash toggled, then the full URL, in that order. Each
/// candidate is also compared after percent-decoding.
pub fn resolve_href<'a>(map: &'a PropertyMap, url: &Url) -> Option<(&'a str, &'a PropMap)> {
    let path = url.path();
    let candidates = [
        path.to_string(),
        toggle_trailing_slash(path),
        url.to_string(),
    ];

    for candidate in &candidates {
        if let Some((href, props)) = map.get_key_value(candidate.as_str()) {
            return Some((href.as_str(), props));
        }
        let wanted = unquote(candidate);
        if let Some((href, props)) = map.iter().find(|(href, _)| unquote(href) == wanted) {
            return Some((href.as_str(), props));
        }
    }
    None
}

/// Same as [`resolve_href`], but a missing resource is an error
pub fn resolve_href_or_err<'a>(map: &'a PropertyMap, url: &Url) -> Result<&'a PropMap, DavError> {
    match resolve_href(map, url) {
        Some((_, props)) => Ok(props),
        None => {
            log::error!("Unable to map {} to any of the reported hrefs {:?}", url, map.keys().collect::<Vec<_>>());
            Err(DavError::Mapping{ url: url.clone() })
        }
    }
}

fn toggle_trailing_slash(path: &str) -> String {
    match path.strip_suffix('/') {
        Some(stripped) => stripped.to_string(),
        None => format!("{}/", path),
    }
}

/// Decode `%XX` sequences. An href that does not decode to UTF-8 is kept as it is
fn unquote(s: &str) -> String {
    match urlencoding::decode(s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s.to_string(),
    }
}

/// The text of a property, if it is present
pub fn prop_text(props: &PropMap, name: &str) -> Option<String> {
    props.get(name).map(|e| e.text().trim().to_string())
}

/// The text of the first `<href>` nested in a property, if any
pub fn prop_href(props: &PropMap, name: &str) -> Option<String> {
    props.get(name)
        .and_then(|e| find_elem(e, "href"))
        .map(|h| h.text().trim().to_string())
}
