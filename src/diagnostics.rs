//! Diagnostic header names and the stable decision tokens.

use http::HeaderName;

/// Which path produced the response.
pub const X_CACHE_DIAGNOSTIC: HeaderName = HeaderName::from_static("x-cache-diagnostic");
/// Seconds since the served record was cached (hits only).
pub const X_CACHE_AGE: HeaderName = HeaderName::from_static("x-cache-age");
/// Recorded freshness lifetime in seconds (hits only).
pub const X_CACHE_MAX_AGE: HeaderName = HeaderName::from_static("x-cache-maxage");
/// `true` when the hit was served decompressed from a compressed entry.
pub const X_CACHE_COMPRESSED: HeaderName = HeaderName::from_static("x-cache-compressed");

/// Stable per-request outcome token. The string forms never change; they
/// are part of the diagnostic contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticToken {
    HitFresh,
    HitRevalidated,
    HitStaleWhileRevalidate,
    HitStaleIfError,
    HitOnlyIfCached,
    Miss,
    MissRevalidated,
    MissCacheError,
    MissOnlyIfCached,
    BypassMethod,
    BypassNoStore,
    BypassPragmaNoCache,
}

impl DiagnosticToken {
    /// The wire form emitted in `X-Cache-Diagnostic`.
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticToken::HitFresh => "HIT-FRESH",
            DiagnosticToken::HitRevalidated => "HIT-REVALIDATED",
            DiagnosticToken::HitStaleWhileRevalidate => "HIT-STALE-WHILE-REVALIDATE",
            DiagnosticToken::HitStaleIfError => "HIT-STALE-IF-ERROR",
            DiagnosticToken::HitOnlyIfCached => "HIT-ONLY-IF-CACHED",
            DiagnosticToken::Miss => "MISS",
            DiagnosticToken::MissRevalidated => "MISS-REVALIDATED",
            DiagnosticToken::MissCacheError => "MISS-CACHE-ERROR",
            DiagnosticToken::MissOnlyIfCached => "MISS-ONLY-IF-CACHED",
            DiagnosticToken::BypassMethod => "BYPASS-METHOD",
            DiagnosticToken::BypassNoStore => "BYPASS-NO-STORE",
            DiagnosticToken::BypassPragmaNoCache => "BYPASS-PRAGMA-NO-CACHE",
        }
    }

    /// Counted under `cache.hits`.
    pub fn is_hit(self) -> bool {
        matches!(
            self,
            DiagnosticToken::HitFresh
                | DiagnosticToken::HitRevalidated
                | DiagnosticToken::HitStaleWhileRevalidate
                | DiagnosticToken::HitStaleIfError
                | DiagnosticToken::HitOnlyIfCached
        )
    }

    /// Counted under `cache.misses`.
    pub fn is_miss(self) -> bool {
        matches!(
            self,
            DiagnosticToken::Miss
                | DiagnosticToken::MissRevalidated
                | DiagnosticToken::MissCacheError
                | DiagnosticToken::MissOnlyIfCached
        )
    }
}

impl std::fmt::Display for DiagnosticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_hit_token_counts_as_hit_and_nothing_else() {
        let all = [
            DiagnosticToken::HitFresh,
            DiagnosticToken::HitRevalidated,
            DiagnosticToken::HitStaleWhileRevalidate,
            DiagnosticToken::HitStaleIfError,
            DiagnosticToken::HitOnlyIfCached,
            DiagnosticToken::Miss,
            DiagnosticToken::MissRevalidated,
            DiagnosticToken::MissCacheError,
            DiagnosticToken::MissOnlyIfCached,
            DiagnosticToken::BypassMethod,
            DiagnosticToken::BypassNoStore,
            DiagnosticToken::BypassPragmaNoCache,
        ];
        for token in all {
            assert_eq!(token.is_hit(), token.as_str().starts_with("HIT-"));
            assert!(!(token.is_hit() && token.is_miss()));
            if token.as_str().starts_with("BYPASS-") {
                assert!(!token.is_hit() && !token.is_miss());
            }
        }
    }
}
