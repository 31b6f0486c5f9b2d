//! Reference resolution: the pluggable trait plus the bundle-local
//! implementation.
//!
//! `BundleResolver` resolves references against the entries of a `searchset`
//! or `collection` bundle, following the bundle-references algorithm of the
//! FHIR specification: URN lookups first, then absolute RESTful URLs
//! (versioned or versionless), then relative references retried against
//! every service base URL seen in the bundle.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::value::Value;

/// Pluggable reference resolution. Implementations may be bundle-backed,
/// database-backed, or test stubs.
///
/// The engine hands over the stringified references in input order and
/// expects matched resources back; unmatched references are simply absent
/// from the result.
pub trait ReferenceResolver: Send + Sync {
    fn resolve(&self, references: &[String]) -> Result<Vec<Value>>;
}

// Regex sources:
// - https://hl7.org/fhir/datatypes.html#primitive
// - https://hl7.org/fhir/r4/references.html#literal
fn oid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^urn:oid:[0-2](\.(0|[1-9][0-9]*))+$").expect("oid regex"))
}

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^urn:uuid:[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
        )
        .expect("uuid regex")
    })
}

fn restful_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let types = helix_reflect::RESOURCE_TYPES.join("|");
        let pattern = format!(
            r"^((?:http|https)://(?:[A-Za-z0-9\-\.:%$\\]*/)+)?({types})/([A-Za-z0-9\-\.]{{1,64}})(?:/_history/([A-Za-z0-9\-\.]{{1,64}}))?$"
        );
        Regex::new(&pattern).expect("restful url regex")
    })
}

fn is_urn(reference: &str) -> bool {
    oid_regex().is_match(reference) || uuid_regex().is_match(reference)
}

/// The parts of a RESTful reference URL.
#[derive(Debug, PartialEq)]
struct RestfulUrl<'a> {
    /// Service base (`http://host/fhir`), absent for relative references.
    base: Option<String>,
    resource_type: &'a str,
    id: &'a str,
    version: Option<&'a str>,
}

fn parse_restful_url(reference: &str) -> Option<RestfulUrl<'_>> {
    let caps = restful_url_regex().captures(reference)?;
    let base = caps
        .get(1)
        .map(|m| m.as_str().trim_end_matches('/').to_string());
    let resource_type = caps.get(2)?.as_str();
    let id = caps.get(3)?.as_str();
    let version = caps.get(4).map(|m| m.as_str());
    Some(RestfulUrl {
        base,
        resource_type,
        id,
        version,
    })
}

impl RestfulUrl<'_> {
    /// `Type/id` or `Type/id/_history/ver`.
    fn identity(&self) -> String {
        match self.version {
            Some(version) => format!("{}/{}/_history/{}", self.resource_type, self.id, version),
            None => format!("{}/{}", self.resource_type, self.id),
        }
    }
}

/// `meta.lastUpdated` as microseconds since the epoch.
fn last_updated_micros(resource: &JsonValue) -> Option<i64> {
    let instant = resource.get("meta")?.get("lastUpdated")?.as_str()?;
    DateTime::<FixedOffset>::parse_from_rfc3339(instant)
        .ok()
        .map(|dt| dt.timestamp_micros())
}

/// Resolves references to resources carried in a `searchset` or
/// `collection` bundle. Other bundle kinds are rejected at construction.
pub struct BundleResolver {
    urn_map: HashMap<String, Value>,
    versionless_map: HashMap<String, Vec<Value>>,
    versioned_map: HashMap<String, Vec<Value>>,
    root_urls: Vec<String>,
}

impl BundleResolver {
    pub fn new(bundle: &JsonValue) -> Result<Self> {
        if bundle.get("resourceType").and_then(|v| v.as_str()) != Some("Bundle") {
            return Err(Error::InvalidReference(
                "BundleResolver requires a Bundle resource".into(),
            ));
        }
        match bundle.get("type").and_then(|v| v.as_str()) {
            Some("searchset") | Some("collection") => {}
            _ => {
                return Err(Error::UnsupportedOperation(
                    "only bundles of type searchset or collection are supported by BundleResolver"
                        .into(),
                ))
            }
        }

        let mut resolver = Self {
            urn_map: HashMap::new(),
            versionless_map: HashMap::new(),
            versioned_map: HashMap::new(),
            root_urls: Vec::new(),
        };

        let entries = bundle
            .get("entry")
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[]);
        for entry in entries {
            resolver.index_entry(entry);
        }

        Ok(resolver)
    }

    /// Index one bundle entry. Entries without a usable full URL or resource
    /// are skipped, not errors.
    fn index_entry(&mut self, entry: &JsonValue) {
        let Some(resource_json) = entry.get("resource").filter(|r| r.is_object()) else {
            return;
        };
        let Some(full_url) = entry.get("fullUrl").and_then(|v| v.as_str()) else {
            return;
        };
        if full_url.is_empty() {
            return;
        }

        let resource = Value::resource(Arc::new(resource_json.clone()));

        if is_urn(full_url) {
            self.urn_map.insert(full_url.to_string(), resource);
            return;
        }

        if let Some(url) = parse_restful_url(full_url) {
            if let Some(base) = &url.base {
                let key = format!("{}/{}", base, url.identity());
                if url.version.is_some() {
                    self.versioned_map.entry(key).or_default().push(resource);
                } else {
                    self.versionless_map.entry(key).or_default().push(resource);
                }
                self.root_urls.push(base.clone());
            }
        }
    }

    fn resolve_urn(&self, reference: &str) -> Option<Value> {
        self.urn_map.get(reference).cloned()
    }

    fn resolve_absolute(&self, base: &str, identity: &str, versioned: bool) -> Result<Option<Value>> {
        let key = format!("{base}/{identity}");
        if versioned {
            return match self.versioned_map.get(&key) {
                None => Ok(None),
                Some(matches) if matches.len() > 1 => {
                    Err(Error::MultipleResourcesWithSameIdAndVersion)
                }
                Some(matches) => Ok(matches.first().cloned()),
            };
        }

        let Some(matches) = self.versionless_map.get(&key) else {
            return Ok(None);
        };
        if matches.len() == 1 {
            return Ok(matches.first().cloned());
        }
        // Several versionless matches: take the one with the smallest
        // meta.lastUpdated instant; a missing instant among several
        // candidates is undefined behavior and errors.
        let mut best: Option<(i64, &Value)> = None;
        for candidate in matches {
            let json = candidate
                .as_json()
                .ok_or_else(|| Error::Internal("bundle entry is not an element".into()))?;
            let micros = last_updated_micros(json).ok_or(Error::MissingMetaOrLastUpdated)?;
            match best {
                Some((best_micros, _)) if best_micros <= micros => {}
                _ => best = Some((micros, candidate)),
            }
        }
        Ok(best.map(|(_, v)| v.clone()))
    }

    fn resolve_relative(&self, reference: &str) -> Result<Option<Value>> {
        for root in &self.root_urls {
            let candidate = format!("{root}/{reference}");
            if let Some(url) = parse_restful_url(&candidate) {
                if let Some(base) = url.base.clone() {
                    let versioned = url.version.is_some();
                    if let Ok(Some(resolved)) =
                        self.resolve_absolute(&base, &url.identity(), versioned)
                    {
                        return Ok(Some(resolved));
                    }
                }
            }
        }
        Ok(None)
    }

    fn resolve_reference(&self, reference: &str) -> Result<Option<Value>> {
        if is_urn(reference) {
            return Ok(self.resolve_urn(reference));
        }
        if let Some(url) = parse_restful_url(reference) {
            if let Some(base) = url.base.clone() {
                return self.resolve_absolute(&base, &url.identity(), url.version.is_some());
            }
            // No scheme: a relative `Type/id[/_history/ver]` reference.
            return self.resolve_relative(reference);
        }
        Ok(None)
    }
}

impl ReferenceResolver for BundleResolver {
    fn resolve(&self, references: &[String]) -> Result<Vec<Value>> {
        let mut resolved = Vec::new();
        for reference in references {
            if let Some(resource) = self.resolve_reference(reference)? {
                resolved.push(resource);
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn searchset(entries: JsonValue) -> JsonValue {
        json!({"resourceType": "Bundle", "type": "searchset", "entry": entries})
    }

    #[test]
    fn rejects_non_searchset_bundles() {
        let bundle = json!({"resourceType": "Bundle", "type": "transaction"});
        assert!(BundleResolver::new(&bundle).is_err());
        let not_bundle = json!({"resourceType": "Patient"});
        assert!(BundleResolver::new(&not_bundle).is_err());
    }

    #[test]
    fn urn_lookup() {
        let bundle = searchset(json!([{
            "fullUrl": "urn:uuid:9e0a25a2-b841-4d29-8cc6-7a0e42bfd7f1",
            "resource": {"resourceType": "Patient", "id": "p1"}
        }]));
        let resolver = BundleResolver::new(&bundle).unwrap();
        let out = resolver
            .resolve(&["urn:uuid:9e0a25a2-b841-4d29-8cc6-7a0e42bfd7f1".to_string()])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].resource_type(), Some("Patient"));
        // Unknown URNs resolve to nothing, not errors.
        let out = resolver
            .resolve(&["urn:uuid:00000000-0000-0000-0000-000000000000".to_string()])
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn absolute_and_relative_lookup() {
        let bundle = searchset(json!([{
            "fullUrl": "http://example.com/fhir/Patient/123",
            "resource": {"resourceType": "Patient", "id": "123"}
        }]));
        let resolver = BundleResolver::new(&bundle).unwrap();

        let out = resolver
            .resolve(&["http://example.com/fhir/Patient/123".to_string()])
            .unwrap();
        assert_eq!(out.len(), 1);

        // Relative reference retried against the root URL.
        let out = resolver.resolve(&["Patient/123".to_string()]).unwrap();
        assert_eq!(out.len(), 1);

        let out = resolver.resolve(&["Patient/999".to_string()]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn versioned_lookup_and_duplicate_error() {
        let bundle = searchset(json!([
            {
                "fullUrl": "http://example.com/fhir/Patient/123/_history/2",
                "resource": {"resourceType": "Patient", "id": "123"}
            },
            {
                "fullUrl": "http://example.com/fhir/Patient/123/_history/2",
                "resource": {"resourceType": "Patient", "id": "123"}
            }
        ]));
        let resolver = BundleResolver::new(&bundle).unwrap();
        let err = resolver
            .resolve(&["http://example.com/fhir/Patient/123/_history/2".to_string()])
            .unwrap_err();
        assert_eq!(err, Error::MultipleResourcesWithSameIdAndVersion);
    }

    #[test]
    fn versionless_duplicates_pick_smallest_last_updated() {
        let bundle = searchset(json!([
            {
                "fullUrl": "http://example.com/fhir/Patient/123",
                "resource": {
                    "resourceType": "Patient", "id": "123",
                    "meta": {"lastUpdated": "2020-06-01T00:00:00Z"},
                    "active": false
                }
            },
            {
                "fullUrl": "http://example.com/fhir/Patient/123",
                "resource": {
                    "resourceType": "Patient", "id": "123",
                    "meta": {"lastUpdated": "2020-01-01T00:00:00Z"},
                    "active": true
                }
            }
        ]));
        let resolver = BundleResolver::new(&bundle).unwrap();
        let out = resolver
            .resolve(&["http://example.com/fhir/Patient/123".to_string()])
            .unwrap();
        assert_eq!(out.len(), 1);
        let json = out[0].as_json().unwrap();
        assert_eq!(json.get("active"), Some(&json!(true)));
    }

    #[test]
    fn versionless_duplicates_without_last_updated_error() {
        let bundle = searchset(json!([
            {
                "fullUrl": "http://example.com/fhir/Patient/123",
                "resource": {"resourceType": "Patient", "id": "123"}
            },
            {
                "fullUrl": "http://example.com/fhir/Patient/123",
                "resource": {
                    "resourceType": "Patient", "id": "123",
                    "meta": {"lastUpdated": "2020-01-01T00:00:00Z"}
                }
            }
        ]));
        let resolver = BundleResolver::new(&bundle).unwrap();
        let err = resolver
            .resolve(&["http://example.com/fhir/Patient/123".to_string()])
            .unwrap_err();
        assert_eq!(err, Error::MissingMetaOrLastUpdated);
    }

    #[test]
    fn single_candidate_without_last_updated_resolves() {
        let bundle = searchset(json!([{
            "fullUrl": "http://example.com/fhir/Patient/123",
            "resource": {"resourceType": "Patient", "id": "123"}
        }]));
        let resolver = BundleResolver::new(&bundle).unwrap();
        let out = resolver
            .resolve(&["http://example.com/fhir/Patient/123".to_string()])
            .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn entries_without_full_url_are_skipped() {
        let bundle = searchset(json!([
            {"resource": {"resourceType": "Patient", "id": "a"}},
            {"fullUrl": "", "resource": {"resourceType": "Patient", "id": "b"}}
        ]));
        let resolver = BundleResolver::new(&bundle).unwrap();
        let out = resolver.resolve(&["Patient/a".to_string()]).unwrap();
        assert!(out.is_empty());
    }
}
