//! Consistency-aware endpoint selection.

use crate::metadata::{Consistency, DatabaseMetadata, Endpoint};
use kvconnect_types::ProtocolError;

/// Pick the endpoint that should serve a request of the given consistency.
///
/// Strong requests go to the first strong endpoint. Anything else prefers the
/// first non-strong endpoint and falls back to the first strong one.
pub fn select_endpoint(
    metadata: &DatabaseMetadata,
    consistency: Consistency,
) -> Result<&Endpoint, ProtocolError> {
    let strong = || {
        metadata
            .endpoints
            .iter()
            .find(|e| e.consistency == Consistency::Strong)
    };

    let selected = match consistency {
        Consistency::Strong => strong(),
        Consistency::Eventual => metadata
            .endpoints
            .iter()
            .find(|e| e.consistency != Consistency::Strong)
            .or_else(strong),
    };

    selected.ok_or_else(|| ProtocolError::NoEndpoint {
        consistency: consistency.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metadata(endpoints: &[(&str, Consistency)]) -> DatabaseMetadata {
        DatabaseMetadata {
            version: 3,
            database_id: "db".to_string(),
            endpoints: endpoints
                .iter()
                .map(|(url, consistency)| Endpoint {
                    url: url.to_string(),
                    consistency: *consistency,
                })
                .collect(),
            token: "t".to_string(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn test_strong_and_eventual_split() {
        let md = metadata(&[("A", Consistency::Eventual), ("B", Consistency::Strong)]);
        assert_eq!(select_endpoint(&md, Consistency::Strong).unwrap().url, "B");
        assert_eq!(select_endpoint(&md, Consistency::Eventual).unwrap().url, "A");
    }

    #[test]
    fn test_eventual_falls_back_to_strong() {
        let md = metadata(&[("B", Consistency::Strong)]);
        assert_eq!(select_endpoint(&md, Consistency::Eventual).unwrap().url, "B");
    }

    #[test]
    fn test_first_match_wins() {
        let md = metadata(&[
            ("E1", Consistency::Eventual),
            ("S1", Consistency::Strong),
            ("E2", Consistency::Eventual),
            ("S2", Consistency::Strong),
        ]);
        assert_eq!(select_endpoint(&md, Consistency::Strong).unwrap().url, "S1");
        assert_eq!(select_endpoint(&md, Consistency::Eventual).unwrap().url, "E1");
    }

    #[test]
    fn test_strong_without_strong_endpoint_fails() {
        let md = metadata(&[("A", Consistency::Eventual)]);
        assert_eq!(
            select_endpoint(&md, Consistency::Strong).unwrap_err(),
            ProtocolError::NoEndpoint {
                consistency: "strong".to_string()
            }
        );
        assert!(select_endpoint(&metadata(&[]), Consistency::Eventual).is_err());
    }
}
