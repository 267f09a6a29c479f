//! Element-map model: reserved names, the stored ↔ transmitted projection,
//! status values, ANVL rendering, and default-target construction.
//!
//! An identifier's metadata is a flat map of short names to string values,
//! stored under its ARK key. Reserved names start with `_` and come in a
//! compact stored form (`_o`, `_su`, ...) and a spelled-out transmitted form
//! (`_owner`, `_updated`, ...). For a non-ARK identifier, the stored map of
//! its shadow ARK holds both the ARK view (`_u`, `_t`) and the shadowed view
//! (`_su`, `_st`); the projection picks the right slice.

use std::collections::BTreeMap;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS, NON_ALPHANUMERIC};

use crate::error::{Error, Result};

/// An identifier's metadata: short element names to string values.
pub type ElementMap = BTreeMap<String, String>;

// ── stored reserved names ─────────────────────────────────────────────

pub const OWNER: &str = "_o";
pub const OWNER_GROUP: &str = "_g";
pub const CO_OWNERS: &str = "_co";
pub const CREATED: &str = "_c";
pub const UPDATED: &str = "_u";
pub const TARGET: &str = "_t";
pub const SHADOWS: &str = "_s";
pub const SHADOW_UPDATED: &str = "_su";
pub const SHADOW_TARGET: &str = "_st";
pub const PROFILE: &str = "_p";
pub const STATUS: &str = "_is";
pub const CROSSREF: &str = "_cr";

/// Pairs of (stored, transmitted) names common to both views.
const COMMON_PROJECTION: &[(&str, &str)] = &[
    (OWNER, "_owner"),
    (OWNER_GROUP, "_ownergroup"),
    (CO_OWNERS, "_coowners"),
    (CREATED, "_created"),
    (PROFILE, "_profile"),
    (STATUS, "_status"),
    (CROSSREF, "_crossref"),
];

/// Whether an element name (stored or transmitted) is reserved.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with('_')
}

/// Project a stored map into the transmitted ARK view: ARK timestamp and
/// target slots, shadow-only slots dropped, `_status` defaulted to `public`.
pub fn project_ark_view(stored: &ElementMap) -> ElementMap {
    let mut out = project_common(stored);
    copy(stored, UPDATED, &mut out, "_updated");
    copy(stored, TARGET, &mut out, "_target");
    copy(stored, SHADOWS, &mut out, "_shadows");
    out
}

/// Project a stored map into the transmitted shadowed view (the DOI or URN
/// the shadow ARK stands for): shadow timestamp and target slots, ARK-only
/// slots dropped, `_shadowedby` synthesized from the storage key.
pub fn project_shadowed_view(stored: &ElementMap, shadow_ark: &str) -> ElementMap {
    let mut out = project_common(stored);
    copy(stored, SHADOW_UPDATED, &mut out, "_updated");
    copy(stored, SHADOW_TARGET, &mut out, "_target");
    out.insert("_shadowedby".to_owned(), shadow_ark.to_owned());
    out
}

fn project_common(stored: &ElementMap) -> ElementMap {
    let mut out = ElementMap::new();
    for (k, v) in stored {
        if !is_reserved(k) {
            out.insert(k.clone(), v.clone());
        }
    }
    for (from, to) in COMMON_PROJECTION {
        copy(stored, from, &mut out, to);
    }
    out.entry("_status".to_owned())
        .or_insert_with(|| "public".to_owned());
    out
}

fn copy(stored: &ElementMap, from: &str, out: &mut ElementMap, to: &str) {
    if let Some(v) = stored.get(from) {
        out.insert(to.to_owned(), v.clone());
    }
}

// ── status values ─────────────────────────────────────────────────────

/// Identifier status: `reserved`, `public`, or `unavailable` with an
/// optional `| reason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Reserved,
    Public,
    Unavailable(Option<String>),
}

impl Status {
    pub fn parse(s: &str) -> Result<Status> {
        match s.trim() {
            "reserved" => Ok(Status::Reserved),
            "public" => Ok(Status::Public),
            "unavailable" => Ok(Status::Unavailable(None)),
            other => {
                let rest = other
                    .strip_prefix("unavailable")
                    .and_then(|r| r.trim_start().strip_prefix('|'))
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| Error::BadRequest(format!("invalid status value: {s}")))?;
                Ok(Status::Unavailable(Some(rest.to_owned())))
            }
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Reserved => write!(f, "reserved"),
            Status::Public => write!(f, "public"),
            Status::Unavailable(None) => write!(f, "unavailable"),
            Status::Unavailable(Some(reason)) => write!(f, "unavailable | {reason}"),
        }
    }
}

// ── encoding ──────────────────────────────────────────────────────────

/// Path-segment charset for identifiers embedded in target URLs: `:` stays
/// literal, `/` and everything else non-unreserved is escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b':')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// ANVL name charset: escape controls, `%`, and `:`.
const ANVL_NAME: &AsciiSet = &CONTROLS.add(b'%').add(b':');

/// ANVL value charset: escape controls and `%` so values stay one line.
const ANVL_VALUE: &AsciiSet = &CONTROLS.add(b'%');

/// The default resolver target for an identifier:
/// `<base>/id/<percent-encoded qualified id>`.
pub fn default_target(base_url: &str, qualified: &str) -> String {
    format!(
        "{}/id/{}",
        base_url.trim_end_matches('/'),
        utf8_percent_encode(qualified, PATH_SEGMENT)
    )
}

/// Render an element map as ANVL `name: value` lines.
pub fn to_anvl(map: &ElementMap) -> String {
    let mut out = String::new();
    for (k, v) in map {
        out.push_str(&utf8_percent_encode(k, ANVL_NAME).to_string());
        out.push_str(": ");
        out.push_str(&utf8_percent_encode(v, ANVL_VALUE).to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_doi_map() -> ElementMap {
        let mut m = ElementMap::new();
        m.insert(OWNER.into(), "ark:/99166/p9u".into());
        m.insert(OWNER_GROUP.into(), "ark:/99166/p9g".into());
        m.insert(CREATED.into(), "1700000000".into());
        m.insert(UPDATED.into(), "1700000001".into());
        m.insert(TARGET.into(), "https://id.example.org/id/ark:%2Fb5060%2Ffoo".into());
        m.insert(SHADOWS.into(), "doi:10.5060/FOO".into());
        m.insert(SHADOW_UPDATED.into(), "1700000002".into());
        m.insert(SHADOW_TARGET.into(), "http://x".into());
        m.insert(PROFILE.into(), "datacite".into());
        m.insert("dc.title".into(), "A Title".into());
        m
    }

    #[test]
    fn ark_view_keeps_ark_slots_and_drops_shadow_slots() {
        let view = project_ark_view(&stored_doi_map());
        assert_eq!(view.get("_updated").map(String::as_str), Some("1700000001"));
        assert_eq!(
            view.get("_target").map(String::as_str),
            Some("https://id.example.org/id/ark:%2Fb5060%2Ffoo")
        );
        assert_eq!(view.get("_shadows").map(String::as_str), Some("doi:10.5060/FOO"));
        assert_eq!(view.get("_status").map(String::as_str), Some("public"));
        assert_eq!(view.get("dc.title").map(String::as_str), Some("A Title"));
        assert!(!view.contains_key("_shadowedby"));
    }

    #[test]
    fn shadowed_view_keeps_shadow_slots_and_synthesizes_shadowedby() {
        let view = project_shadowed_view(&stored_doi_map(), "ark:/b5060/foo");
        assert_eq!(view.get("_updated").map(String::as_str), Some("1700000002"));
        assert_eq!(view.get("_target").map(String::as_str), Some("http://x"));
        assert_eq!(
            view.get("_shadowedby").map(String::as_str),
            Some("ark:/b5060/foo")
        );
        assert!(!view.contains_key("_shadows"));
    }

    #[test]
    fn status_parsing() {
        assert_eq!(Status::parse("public").ok(), Some(Status::Public));
        assert_eq!(
            Status::parse("unavailable | withdrawn by author").ok(),
            Some(Status::Unavailable(Some("withdrawn by author".into())))
        );
        assert!(Status::parse("retracted").is_err());
        assert!(Status::parse("unavailable |").is_err());
    }

    #[test]
    fn default_target_encodes_slashes_but_not_colons() {
        assert_eq!(
            default_target("https://id.example.org", "ark:/13030/fk4x"),
            "https://id.example.org/id/ark:%2F13030%2Ffk4x"
        );
    }

    #[test]
    fn anvl_escapes_newlines_in_values() {
        let mut m = ElementMap::new();
        m.insert("note".into(), "line one\nline two".into());
        assert_eq!(to_anvl(&m), "note: line one%0Aline two\n");
    }
}
