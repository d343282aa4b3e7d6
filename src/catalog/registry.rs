//! Resolves a (source family, domain) pair to its ordered endpoint set.

use crate::catalog::endpoints::{Endpoint, EndpointSet};
use crate::types::source::{DomainId, SourceFamily};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CADENCE_HOURS: u32 = 1;

fn default_cadence_hours() -> u32 {
    DEFAULT_CADENCE_HOURS
}

/// One configured source. A missing `domain` serves every domain not
/// configured explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub family: SourceFamily,
    #[serde(default)]
    pub domain: Option<DomainId>,
    #[serde(default = "default_cadence_hours")]
    pub cadence_hours: u32,
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRegistry {
    sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// The endpoint set for `family` on `domain`, primary endpoints first.
    ///
    /// An exact domain match wins over a wildcard entry; among equals the
    /// first configured entry wins.
    pub fn resolve(&self, family: SourceFamily, domain: &DomainId) -> Option<EndpointSet> {
        let of_family = || self.sources.iter().filter(move |s| s.family == family);
        let source = of_family()
            .find(|s| s.domain.as_ref() == Some(domain))
            .or_else(|| of_family().find(|s| s.domain.is_none()))?;
        Some(EndpointSet::new(
            family,
            domain.clone(),
            source.cadence_hours,
            source.endpoints.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::endpoints::EndpointRole;

    fn source(domain: Option<&str>, url: &str) -> SourceConfig {
        SourceConfig {
            family: SourceFamily::GriddedAnalysis,
            domain: domain.map(DomainId::new),
            cadence_hours: 1,
            endpoints: vec![Endpoint::new(url, EndpointRole::Primary)],
        }
    }

    #[test]
    fn test_exact_domain_beats_wildcard() {
        let registry = SourceRegistry::new(vec![
            source(None, "https://any/{date}"),
            source(Some("alaska"), "https://ak/{date}"),
        ]);
        let ak = registry
            .resolve(SourceFamily::GriddedAnalysis, &DomainId::new("alaska"))
            .unwrap();
        assert_eq!(ak.endpoints()[0].url_template, "https://ak/{date}");
        assert_eq!(ak.domain().as_str(), "alaska");

        let conus = registry
            .resolve(SourceFamily::GriddedAnalysis, &DomainId::new("conus"))
            .unwrap();
        assert_eq!(conus.endpoints()[0].url_template, "https://any/{date}");
        assert_eq!(conus.domain().as_str(), "conus");

        assert!(registry
            .resolve(SourceFamily::RegionalAnalysis, &DomainId::new("conus"))
            .is_none());
    }
}
