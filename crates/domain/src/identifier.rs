//! Identifier codec: parsing and canonicalization of scheme-qualified
//! identifiers, and the bidirectional shadow-ARK mapping for non-ARK schemes.
//!
//! Identifiers are parsed once at the boundary into a tagged [`Identifier`];
//! everything downstream dispatches on the tag instead of re-examining the
//! string. The storage key for every identifier is an ARK: the identifier
//! itself for ARKs, the mechanically derived shadow ARK otherwise.

use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::{Error, Result};

/// NAAN under which UUID URNs are shadowed.
const UUID_SHADOW_NAAN: &str = "97720";

fn ark_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^ark:/([a-z0-9]\d{4})/([!-~]+)$").expect("valid regex"))
}

fn doi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^doi:10\.([1-9]\d{3})/([!-~]+)$").expect("valid regex"))
}

fn urn_uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^urn:uuid:[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
            .expect("valid regex")
    })
}

/// The identifier schemes this service manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ark,
    Doi,
    UrnUuid,
}

impl Scheme {
    /// Human-readable scheme label used in error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Scheme::Ark => "ARK",
            Scheme::Doi => "DOI",
            Scheme::UrnUuid => "URN UUID",
        }
    }

    /// Scheme of a qualified identifier or prefix string, by its prefix.
    pub fn of(s: &str) -> Option<Scheme> {
        if s.starts_with("ark:/") {
            Some(Scheme::Ark)
        } else if s.starts_with("doi:10.") {
            Some(Scheme::Doi)
        } else if s.starts_with("urn:uuid:") {
            Some(Scheme::UrnUuid)
        } else {
            None
        }
    }
}

/// A parsed, canonicalized identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// `ark:/<naan>/<name>`, lowercase.
    Ark { naan: String, name: String },
    /// `doi:10.<naan>/<suffix>`, suffix uppercase. `naan` holds the four
    /// registrant digits only.
    Doi { naan: String, suffix: String },
    /// `urn:uuid:<uuid>`, lowercase hyphenated.
    UrnUuid(Uuid),
}

impl Identifier {
    /// Parse a scheme-qualified identifier, dispatching on its scheme prefix.
    pub fn parse(s: &str) -> Result<Identifier> {
        match Scheme::of(s) {
            Some(Scheme::Ark) => validate_ark(s),
            Some(Scheme::Doi) => validate_doi(s),
            Some(Scheme::UrnUuid) => validate_urn_uuid(s),
            None => Err(Error::UnknownScheme),
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            Identifier::Ark { .. } => Scheme::Ark,
            Identifier::Doi { .. } => Scheme::Doi,
            Identifier::UrnUuid(_) => Scheme::UrnUuid,
        }
    }

    /// Canonical scheme-qualified form.
    pub fn qualified(&self) -> String {
        match self {
            Identifier::Ark { naan, name } => format!("ark:/{naan}/{name}"),
            Identifier::Doi { naan, suffix } => format!("doi:10.{naan}/{suffix}"),
            Identifier::UrnUuid(u) => format!("urn:uuid:{}", u.hyphenated()),
        }
    }

    /// Canonical form with the scheme tag stripped (`13030/x`, `10.5060/X`,
    /// the bare UUID).
    pub fn scheme_less(&self) -> String {
        match self {
            Identifier::Ark { naan, name } => format!("{naan}/{name}"),
            Identifier::Doi { naan, suffix } => format!("10.{naan}/{suffix}"),
            Identifier::UrnUuid(u) => u.hyphenated().to_string(),
        }
    }

    /// The shadow ARK of a non-ARK identifier, qualified.
    pub fn shadow(&self) -> Option<String> {
        match self {
            Identifier::Ark { .. } => None,
            Identifier::Doi { naan, suffix } => {
                Some(format!("ark:/b{naan}/{}", suffix.to_ascii_lowercase()))
            }
            Identifier::UrnUuid(u) => Some(format!("ark:/{UUID_SHADOW_NAAN}/{}", u.simple())),
        }
    }

    /// The ARK under which this identifier's element map is stored: the
    /// identifier itself for ARKs, the shadow ARK otherwise.
    pub fn ark_key(&self) -> String {
        match self.shadow() {
            Some(s) => s,
            None => self.qualified(),
        }
    }
}

/// Validate and canonicalize an ARK. Canonical form is lowercase.
pub fn validate_ark(s: &str) -> Result<Identifier> {
    let lowered = s.to_ascii_lowercase();
    let caps = ark_re()
        .captures(&lowered)
        .ok_or(Error::InvalidIdentifier("ARK"))?;
    Ok(Identifier::Ark {
        naan: caps[1].to_owned(),
        name: caps[2].to_owned(),
    })
}

/// Validate and canonicalize a DOI. Canonical form uppercases the suffix.
pub fn validate_doi(s: &str) -> Result<Identifier> {
    let caps = doi_re().captures(s).ok_or(Error::InvalidIdentifier("DOI"))?;
    Ok(Identifier::Doi {
        naan: caps[1].to_owned(),
        suffix: caps[2].to_ascii_uppercase(),
    })
}

/// Validate and canonicalize a UUID URN. Canonical form is lowercase
/// hyphenated.
pub fn validate_urn_uuid(s: &str) -> Result<Identifier> {
    let lowered = s.to_ascii_lowercase();
    if !urn_uuid_re().is_match(&lowered) {
        return Err(Error::InvalidIdentifier("URN UUID"));
    }
    let uuid = Uuid::parse_str(&lowered["urn:uuid:".len()..])
        .map_err(|_| Error::InvalidIdentifier("URN UUID"))?;
    Ok(Identifier::UrnUuid(uuid))
}

/// Shadow ARK of a qualified DOI.
pub fn doi2shadow(doi: &str) -> Result<String> {
    match validate_doi(doi)? {
        id @ Identifier::Doi { .. } => Ok(id.ark_key()),
        _ => Err(Error::InvalidIdentifier("DOI")),
    }
}

/// Inverse of [`doi2shadow`]: recover the canonical DOI from its shadow ARK.
pub fn shadow2doi(ark: &str) -> Result<String> {
    let parsed = validate_ark(ark)?;
    let Identifier::Ark { naan, name } = parsed else {
        return Err(Error::InvalidIdentifier("ARK"));
    };
    let digits = naan
        .strip_prefix('b')
        .ok_or(Error::InvalidIdentifier("ARK"))?;
    validate_doi(&format!("doi:10.{digits}/{name}")).map(|d| d.qualified())
}

/// Shadow ARK of a qualified UUID URN.
pub fn urn_uuid2shadow(urn: &str) -> Result<String> {
    match validate_urn_uuid(urn)? {
        id @ Identifier::UrnUuid(_) => Ok(id.ark_key()),
        _ => Err(Error::InvalidIdentifier("URN UUID")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ark_canonicalizes_to_lowercase() {
        let id = Identifier::parse("ark:/13030/FK4Test").unwrap();
        assert_eq!(id.qualified(), "ark:/13030/fk4test");
        assert_eq!(id.ark_key(), "ark:/13030/fk4test");
        assert_eq!(id.shadow(), None);
    }

    #[test]
    fn doi_canonicalizes_suffix_to_uppercase() {
        let id = Identifier::parse("doi:10.5060/foo").unwrap();
        assert_eq!(id.qualified(), "doi:10.5060/FOO");
        assert_eq!(id.scheme_less(), "10.5060/FOO");
    }

    #[test]
    fn doi_shadow_mapping() {
        let id = Identifier::parse("doi:10.5060/FOO").unwrap();
        assert_eq!(id.shadow().as_deref(), Some("ark:/b5060/foo"));
        assert_eq!(id.ark_key(), "ark:/b5060/foo");
    }

    #[test]
    fn doi_shadow_round_trips() {
        for doi in ["doi:10.5060/FOO", "doi:10.9999/A.B-C_1", "doi:10.5072/FK2X7"] {
            let canonical = Identifier::parse(doi).unwrap().qualified();
            let shadow = doi2shadow(&canonical).unwrap();
            assert_eq!(shadow2doi(&shadow).unwrap(), canonical);
        }
    }

    #[test]
    fn doi_shadow_is_valid_ark() {
        let shadow = doi2shadow("doi:10.5060/FOO").unwrap();
        assert!(validate_ark(&shadow).is_ok());
    }

    #[test]
    fn urn_uuid_shadow_uses_hex_digits() {
        let id = Identifier::parse("urn:uuid:3A6D4B92-9A2E-4F4B-8F2D-0C5E6A7B8C9D").unwrap();
        assert_eq!(
            id.qualified(),
            "urn:uuid:3a6d4b92-9a2e-4f4b-8f2d-0c5e6a7b8c9d"
        );
        assert_eq!(
            id.shadow().as_deref(),
            Some("ark:/97720/3a6d4b929a2e4f4b8f2d0c5e6a7b8c9d")
        );
    }

    #[test]
    fn malformed_identifiers_rejected() {
        assert!(matches!(
            Identifier::parse("ark:13030/x"),
            Err(Error::UnknownScheme)
        ));
        assert!(matches!(
            Identifier::parse("ark:/130/x"),
            Err(Error::InvalidIdentifier("ARK"))
        ));
        assert!(matches!(
            Identifier::parse("doi:10.5060/"),
            Err(Error::InvalidIdentifier("DOI"))
        ));
        assert!(matches!(
            Identifier::parse("doi:10.506/FOO"),
            Err(Error::InvalidIdentifier("DOI"))
        ));
        assert!(matches!(
            Identifier::parse("urn:uuid:not-a-uuid"),
            Err(Error::InvalidIdentifier("URN UUID"))
        ));
        assert!(matches!(
            Identifier::parse("hdl:4263537/4000"),
            Err(Error::UnknownScheme)
        ));
    }

    #[test]
    fn shadow2doi_rejects_non_shadow_naans() {
        assert!(shadow2doi("ark:/13030/foo").is_err());
    }
}
