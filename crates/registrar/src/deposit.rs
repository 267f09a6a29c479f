//! Deposit-document validation and envelope construction.
//!
//! A client hands us one Unicode `<body>` child element (optionally wrapped
//! in `doi_batch`/`body`). Validation normalizes it: the `doi` and
//! `resource` slots are rewritten to `(:tba)` so stored bodies never carry a
//! live value, stray timestamps are dropped, and the schema location is
//! pinned. Submission re-inserts the real DOI and target each time, so
//! repeating a deposit is harmless.

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use mintage_domain::config::RegistrarConfig;
use mintage_domain::{Error, Result};

use crate::xml::{self, Element, Node};

const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const TBA: &str = "(:tba)";

/// Local names accepted as the deposit body element.
const BODY_KINDS: &[&str] = &[
    "journal",
    "book",
    "conference",
    "sa_component",
    "dissertation",
    "report-paper",
    "standard",
    "database",
    "peer_review",
    "posted_content",
];

/// Title slots, relative to the element holding `doi_data`, that get the
/// `WITHDRAWN: ` prefix on withdrawal.
const TITLE_PATHS: &[&[&str]] = &[
    &["titles", "title"],
    &["titles", "original_language_title"],
    &["proceedings_title"],
    &["full_title"],
    &["abbrev_title"],
];

fn schema_ns_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^http://www\.crossref\.org/schema/(4\.3\.4|4\.4\.\d)$").expect("valid regex")
    })
}

/// A submission ready for the wire.
#[derive(Debug, Clone)]
pub struct Deposit {
    /// Full `doi_batch` document (or the body-only form).
    pub envelope: String,
    /// Normalized body with the DOI and target inserted.
    pub body: String,
    /// UUID correlating submit and poll.
    pub batch_id: String,
}

struct ValidatedBody {
    root: Element,
    namespace: String,
    version: String,
}

/// Validate and normalize a deposit body. Idempotent on its own output.
pub fn validate_body(body: &str) -> Result<String> {
    let validated = validate_parts(body)?;
    finalize(&validated.root)
}

fn validate_parts(body: &str) -> Result<ValidatedBody> {
    let doc = xml::parse(body).map_err(Error::BadRequest)?;

    if let Some(prolog) = &doc.prolog {
        if prolog.version != "1.0" {
            return Err(Error::BadRequest("XML version must be 1.0".into()));
        }
        if let Some(enc) = &prolog.encoding {
            if !enc.eq_ignore_ascii_case("utf-8") {
                return Err(Error::BadRequest("XML encoding must be UTF-8".into()));
            }
        }
        if let Some(sd) = &prolog.standalone {
            if sd != "yes" {
                return Err(Error::BadRequest("XML document must be standalone".into()));
            }
        }
    }

    let namespace = doc
        .root
        .ns
        .clone()
        .ok_or_else(|| Error::BadRequest("missing Crossref schema namespace".into()))?;
    let caps = schema_ns_re()
        .captures(&namespace)
        .ok_or_else(|| Error::BadRequest(format!("unsupported schema namespace {namespace}")))?;
    let version = caps[1].to_owned();

    // Accept a full doi_batch document or a bare body child.
    let mut root = doc.root;
    if root.is("doi_batch", Some(namespace.as_str())) {
        root = single_child(root, Some("body"), &namespace)?;
    }
    if root.is("body", Some(namespace.as_str())) {
        root = single_child(root, None, &namespace)?;
    }
    if !BODY_KINDS.contains(&root.local.as_str()) || root.ns.as_deref() != Some(namespace.as_str()) {
        return Err(Error::BadRequest(format!(
            "unsupported deposit element <{}>",
            root.local
        )));
    }

    let ns = Some(namespace.as_str());
    if xml::count_descendants(&root, "doi_data", ns) != 1 {
        return Err(Error::BadRequest(
            "deposit must contain exactly one <doi_data> element".into(),
        ));
    }
    if has_collection_item_doi(&root, &namespace) {
        return Err(Error::BadRequest(
            "<collection>/<item>/<doi> elements are not supported".into(),
        ));
    }

    {
        let doi_data = xml::find_descendant_mut(&mut root, "doi_data", ns)
            .ok_or_else(|| Error::Internal("doi_data vanished after counting".into()))?;
        xml::remove_descendants(doi_data, "timestamp", ns);
        if xml::count_descendants(doi_data, "doi", ns) != 1 {
            return Err(Error::BadRequest(
                "<doi_data> must contain exactly one <doi> element".into(),
            ));
        }
        if xml::count_descendants(doi_data, "resource", ns) != 1 {
            return Err(Error::BadRequest(
                "<doi_data> must contain exactly one <resource> element".into(),
            ));
        }
        rewrite_text(doi_data, "doi", &namespace, TBA)?;
        rewrite_text(doi_data, "resource", &namespace, TBA)?;
    }

    // The extracted element must carry its namespace declaration, and the
    // pinned schema location.
    let decl_key = match &root.prefix {
        Some(p) => format!("xmlns:{p}"),
        None => "xmlns".to_owned(),
    };
    if root.attr(&decl_key).is_none() {
        root.set_attr(&decl_key, &namespace);
    }
    if root.attr("xmlns:xsi").is_none() {
        root.set_attr("xmlns:xsi", XSI_NS);
    }
    root.set_attr("xsi:schemaLocation", &schema_location(&namespace, &version));

    Ok(ValidatedBody {
        root,
        namespace,
        version,
    })
}

/// Build a submission from a validated body.
///
/// Inserts the scheme-less DOI and the target URL, optionally prefixes the
/// title slots with `WITHDRAWN: `, and wraps everything in a `doi_batch`
/// envelope with a fresh batch ID (unless `body_only`).
pub fn build_submission(
    cfg: &RegistrarConfig,
    body: &str,
    registrant: &str,
    doi: &str,
    target_url: &str,
    withdraw_titles: bool,
    body_only: bool,
) -> Result<Deposit> {
    let ValidatedBody {
        mut root,
        namespace,
        version,
    } = validate_parts(body)?;
    let batch_id = Uuid::new_v4().to_string();

    {
        let doi_data = xml::find_descendant_mut(&mut root, "doi_data", Some(namespace.as_str()))
            .ok_or_else(|| Error::Internal("validated body lost its doi_data".into()))?;
        rewrite_text(doi_data, "doi", &namespace, doi)?;
        rewrite_text(doi_data, "resource", &namespace, target_url)?;
    }
    if withdraw_titles {
        withdraw_titles_in(&mut root, &namespace);
    }

    let body_str = finalize(&root)?;
    if body_only {
        return Ok(Deposit {
            envelope: body_str.clone(),
            body: body_str,
            batch_id,
        });
    }

    root.remove_attr("xsi:schemaLocation");
    let batch = build_batch(cfg, &namespace, &version, &batch_id, registrant, root);
    let envelope = finalize(&batch)?;
    Ok(Deposit {
        envelope,
        body: body_str,
        batch_id,
    })
}

/// Descend one level: the single matching child element, consuming `el`.
fn single_child(el: Element, want: Option<&str>, ns: &str) -> Result<Element> {
    let mut elems: Vec<Element> = el
        .children
        .into_iter()
        .filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
        .collect();
    if let Some(local) = want {
        elems.retain(|e| e.is(local, Some(ns)));
    }
    if elems.len() != 1 {
        return Err(Error::BadRequest(match want {
            Some(local) => format!("<doi_batch> must contain exactly one <{local}> element"),
            None => "<body> must contain exactly one child element".to_owned(),
        }));
    }
    Ok(elems.remove(0))
}

// ── envelope pieces ───────────────────────────────────────────────────

fn build_batch(
    cfg: &RegistrarConfig,
    ns: &str,
    version: &str,
    batch_id: &str,
    registrant: &str,
    body_child: Element,
) -> Element {
    // Centisecond-precision timestamp, per the Crossref head schema.
    let timestamp = (Utc::now().timestamp_millis() / 10).to_string();
    let depositor_tag = if version_precedes(version, &[4, 3, 4]) {
        "name"
    } else {
        "depositor_name"
    };

    let mut depositor = Element::new("depositor", ns);
    depositor
        .children
        .push(Node::Element(text_element(depositor_tag, ns, &cfg.depositor_name)));
    depositor
        .children
        .push(Node::Element(text_element("email_address", ns, &cfg.depositor_email)));

    let mut head = Element::new("head", ns);
    head.children
        .push(Node::Element(text_element("doi_batch_id", ns, batch_id)));
    head.children
        .push(Node::Element(text_element("timestamp", ns, &timestamp)));
    head.children.push(Node::Element(depositor));
    head.children
        .push(Node::Element(text_element("registrant", ns, registrant)));

    let mut body = Element::new("body", ns);
    body.children.push(Node::Element(body_child));

    let mut batch = Element::new("doi_batch", ns);
    batch.set_attr("version", version);
    batch.set_attr("xmlns", ns);
    batch.set_attr("xmlns:xsi", XSI_NS);
    batch.set_attr("xsi:schemaLocation", &schema_location(ns, version));
    batch.children.push(Node::Element(head));
    batch.children.push(Node::Element(body));
    batch
}

fn text_element(local: &str, ns: &str, text: &str) -> Element {
    let mut el = Element::new(local, ns);
    el.set_text(text);
    el
}

fn schema_location(ns: &str, version: &str) -> String {
    format!("{ns} http://www.crossref.org/schema/deposit/crossref{version}.xsd")
}

fn version_precedes(version: &str, threshold: &[u32]) -> bool {
    let parts: Vec<u32> = version.split('.').filter_map(|p| p.parse().ok()).collect();
    parts.as_slice() < threshold
}

fn rewrite_text(scope: &mut Element, local: &str, ns: &str, value: &str) -> Result<()> {
    let el = xml::find_descendant_mut(scope, local, Some(ns))
        .ok_or_else(|| Error::BadRequest(format!("<doi_data> is missing a <{local}> element")))?;
    el.set_text(value);
    Ok(())
}

fn has_collection_item_doi(root: &Element, ns: &str) -> bool {
    let mut found = false;
    xml::walk(root, &mut |el| {
        if el.is("collection", Some(ns)) {
            xml::walk(el, &mut |item| {
                if item.is("item", Some(ns)) && item.find_child("doi", Some(ns)).is_some() {
                    found = true;
                }
            });
        }
    });
    found
}

/// Prefix every title slot adjacent to a `doi_data` with `WITHDRAWN: `,
/// preserving any face markup inside the title.
fn withdraw_titles_in(root: &mut Element, ns: &str) {
    let ns_owned = ns.to_owned();
    xml::walk_mut(root, &mut |el| {
        if el.find_child("doi_data", Some(ns_owned.as_str())).is_none() {
            return;
        }
        for path in TITLE_PATHS {
            prefix_titles_at(el, path, &ns_owned);
        }
    });
}

fn prefix_titles_at(el: &mut Element, path: &[&str], ns: &str) {
    let (head, rest) = match path.split_first() {
        Some(split) => split,
        None => return,
    };
    for node in el.children.iter_mut() {
        if let Node::Element(child) = node {
            if !child.is(head, Some(ns)) {
                continue;
            }
            if rest.is_empty() {
                match child.children.first_mut() {
                    Some(Node::Text(t)) => t.insert_str(0, "WITHDRAWN: "),
                    _ => child.children.insert(0, Node::Text("WITHDRAWN: ".to_owned())),
                }
            } else {
                prefix_titles_at(child, rest, ns);
            }
        }
    }
}

fn finalize(root: &Element) -> Result<String> {
    let serialized = xml::serialize(root).map_err(Error::Xml)?;
    Ok(sanitize_xml_charset(&format!(
        "<?xml version=\"1.0\"?>\n{serialized}"
    )))
}

/// Replace characters outside the XML 1.0 character range with `?`.
fn sanitize_xml_charset(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{9}' | '\u{A}' | '\u{D}' => c,
            '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}' => c,
            _ => '?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://www.crossref.org/schema/4.4.0";

    fn journal_body() -> String {
        format!(
            r#"<journal xmlns="{NS}"><journal_metadata><full_title>Journal of Tests</full_title></journal_metadata><journal_article><titles><title>An Article</title></titles><doi_data><doi>10.9999/OLD</doi><timestamp>123</timestamp><resource>http://old.example.org</resource></doi_data></journal_article></journal>"#
        )
    }

    fn registrar_cfg() -> RegistrarConfig {
        RegistrarConfig {
            depositor_name: "Example Library".into(),
            depositor_email: "ids@example.edu".into(),
            ..RegistrarConfig::default()
        }
    }

    #[test]
    fn validate_rewrites_doi_and_resource_to_tba() {
        let normalized = validate_body(&journal_body()).unwrap();
        assert!(normalized.starts_with("<?xml version=\"1.0\"?>\n"));
        assert!(normalized.contains("<doi>(:tba)</doi>"));
        assert!(normalized.contains("<resource>(:tba)</resource>"));
        assert!(!normalized.contains("<timestamp>"));
        assert!(normalized.contains(&format!(
            "xsi:schemaLocation=\"{NS} http://www.crossref.org/schema/deposit/crossref4.4.0.xsd\""
        )));
    }

    #[test]
    fn validate_is_idempotent_on_its_output() {
        let once = validate_body(&journal_body()).unwrap();
        let twice = validate_body(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn validate_unwraps_doi_batch_and_body() {
        let wrapped = format!(
            r#"<doi_batch xmlns="{NS}" version="4.4.0"><head><doi_batch_id>x</doi_batch_id></head><body>{}</body></doi_batch>"#,
            journal_body().replace(&format!(" xmlns=\"{NS}\""), "")
        );
        let normalized = validate_body(&wrapped).unwrap();
        assert!(normalized.contains("<journal"));
        assert!(!normalized.contains("<doi_batch"));
    }

    #[test]
    fn validate_accepts_utf8_prolog_only() {
        let ok = format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n{}", journal_body());
        assert!(validate_body(&ok).is_ok());

        let bad_version = format!("<?xml version=\"1.1\"?>\n{}", journal_body());
        assert!(validate_body(&bad_version).is_err());

        let bad_encoding = format!(
            "<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n{}",
            journal_body()
        );
        assert!(validate_body(&bad_encoding).is_err());

        let bad_standalone = format!(
            "<?xml version=\"1.0\" standalone=\"no\"?>\n{}",
            journal_body()
        );
        assert!(validate_body(&bad_standalone).is_err());
    }

    #[test]
    fn validate_rejects_unknown_body_kind() {
        let body = format!(r#"<pamphlet xmlns="{NS}"><doi_data><doi>d</doi><resource>r</resource></doi_data></pamphlet>"#);
        assert!(matches!(validate_body(&body), Err(Error::BadRequest(_))));
    }

    #[test]
    fn validate_rejects_wrong_namespace_version() {
        let body = journal_body().replace("4.4.0", "4.3.0");
        assert!(validate_body(&body).is_err());
    }

    #[test]
    fn validate_rejects_zero_or_multiple_doi_data() {
        let none = format!(r#"<journal xmlns="{NS}"><journal_metadata/></journal>"#);
        assert!(validate_body(&none).is_err());

        let two = journal_body().replace(
            "</journal_article>",
            "</journal_article><journal_article><doi_data><doi>d</doi><resource>r</resource></doi_data></journal_article>",
        );
        assert!(validate_body(&two).is_err());
    }

    #[test]
    fn validate_rejects_collection_item_doi() {
        let body = journal_body().replace(
            "<resource>http://old.example.org</resource>",
            "<resource>http://old.example.org</resource><collection property=\"crawler-based\"><item crawler=\"google\"><doi>10.9999/C</doi></item></collection>",
        );
        assert!(validate_body(&body).is_err());
    }

    #[test]
    fn submission_inserts_doi_target_and_batch_id() {
        let deposit = build_submission(
            &registrar_cfg(),
            &journal_body(),
            "exl",
            "10.9999/NEW",
            "https://example.org/thing",
            false,
            false,
        )
        .unwrap();

        assert!(deposit.envelope.contains("<doi>10.9999/NEW</doi>"));
        assert!(deposit
            .envelope
            .contains("<resource>https://example.org/thing</resource>"));
        assert!(deposit
            .envelope
            .contains(&format!("<doi_batch_id>{}</doi_batch_id>", deposit.batch_id)));
        assert!(deposit.envelope.contains("<depositor_name>Example Library</depositor_name>"));
        assert!(deposit.envelope.contains("<registrant>exl</registrant>"));
        assert!(deposit.envelope.contains(&format!(
            "xsi:schemaLocation=\"{NS} http://www.crossref.org/schema/deposit/crossref4.4.0.xsd\""
        )));

        let doc = crate::xml::parse(&deposit.envelope).unwrap();
        assert!(doc.root.is("doi_batch", Some(NS)));
        assert_eq!(doc.root.attr("version"), Some("4.4.0"));
    }

    #[test]
    fn submission_body_only_returns_bare_body() {
        let deposit = build_submission(
            &registrar_cfg(),
            &journal_body(),
            "exl",
            "10.9999/NEW",
            "https://example.org/thing",
            false,
            true,
        )
        .unwrap();
        assert!(!deposit.envelope.contains("<doi_batch"));
        assert_eq!(deposit.envelope, deposit.body);
    }

    #[test]
    fn withdrawal_prefixes_titles() {
        let deposit = build_submission(
            &registrar_cfg(),
            &journal_body(),
            "exl",
            "10.9999/NEW",
            "http://x",
            true,
            false,
        )
        .unwrap();
        assert!(deposit
            .envelope
            .contains("<title>WITHDRAWN: An Article</title>"));
        assert!(deposit
            .envelope
            .contains("<full_title>Journal of Tests</full_title>"));
    }

    #[test]
    fn sanitizer_replaces_control_characters() {
        assert_eq!(sanitize_xml_charset("a\u{0}b\tc"), "a?b\tc");
    }
}
