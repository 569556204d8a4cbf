// SPDX-License-Identifier: MIT
//! Pattern library — the versioned signature registry.
//!
//! Matching is first-match-wins in insertion order over enabled patterns.
//! Every mutation is persisted before it returns; the in-memory cache exists
//! only to keep `find_match` off the database and is rebuilt on startup, so
//! no registry state survives in memory alone.

use super::{CompiledMatcher, Pattern, PatternMatch, Signature};
use crate::error::{EngineError, Result};
use crate::storage::Storage;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

struct CachedPattern {
    pattern: Pattern,
    matcher: CompiledMatcher,
}

pub struct PatternLibrary {
    storage: Storage,
    /// Insertion-ordered cache; copy-on-write so readers never observe a
    /// half-applied registry change.
    cache: RwLock<Arc<Vec<CachedPattern>>>,
}

impl PatternLibrary {
    /// Load the registry from storage, recompiling every matcher.
    pub async fn load(storage: Storage) -> Result<Self> {
        let mut cache = Vec::new();
        for row in storage.list_patterns().await? {
            let pattern = row.into_pattern()?;
            let matcher = CompiledMatcher::compile(&pattern.id, pattern.matcher.clone())?;
            cache.push(CachedPattern { pattern, matcher });
        }
        debug!(patterns = cache.len(), "pattern library loaded");
        Ok(Self {
            storage,
            cache: RwLock::new(Arc::new(cache)),
        })
    }

    /// Register a new pattern. Fails with `DuplicateId` if the id exists,
    /// even for a disabled pattern (soft-disabled entries keep their id).
    pub async fn register(&self, pattern: Pattern) -> Result<()> {
        let matcher = CompiledMatcher::compile(&pattern.id, pattern.matcher.clone())?;
        let mut guard = self.cache.write().await;
        if guard.iter().any(|c| c.pattern.id == pattern.id) {
            return Err(EngineError::DuplicateId(pattern.id));
        }
        self.storage
            .insert_pattern(&pattern, &Utc::now().to_rfc3339())
            .await?;
        let mut next: Vec<CachedPattern> = guard
            .iter()
            .map(|c| CachedPattern {
                pattern: c.pattern.clone(),
                matcher: c.matcher.clone(),
            })
            .collect();
        info!(pattern_id = %pattern.id, category = %pattern.category, "pattern registered");
        next.push(CachedPattern { pattern, matcher });
        *guard = Arc::new(next);
        Ok(())
    }

    /// Replace an existing pattern's metadata, keeping its match position.
    pub async fn update(&self, pattern: Pattern) -> Result<()> {
        let matcher = CompiledMatcher::compile(&pattern.id, pattern.matcher.clone())?;
        let mut guard = self.cache.write().await;
        if !guard.iter().any(|c| c.pattern.id == pattern.id) {
            return Err(EngineError::PatternNotFound(pattern.id));
        }
        self.storage
            .update_pattern(&pattern, &Utc::now().to_rfc3339())
            .await?;
        let next: Vec<CachedPattern> = guard
            .iter()
            .map(|c| {
                if c.pattern.id == pattern.id {
                    CachedPattern {
                        pattern: pattern.clone(),
                        matcher: matcher.clone(),
                    }
                } else {
                    CachedPattern {
                        pattern: c.pattern.clone(),
                        matcher: c.matcher.clone(),
                    }
                }
            })
            .collect();
        info!(pattern_id = %pattern.id, "pattern updated");
        *guard = Arc::new(next);
        Ok(())
    }

    pub async fn enable(&self, id: &str) -> Result<()> {
        self.set_enabled(id, true).await
    }

    /// Soft-disable: the pattern stays registered (outcome history may
    /// reference it) but stops matching.
    pub async fn disable(&self, id: &str) -> Result<()> {
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut guard = self.cache.write().await;
        if !guard.iter().any(|c| c.pattern.id == id) {
            return Err(EngineError::PatternNotFound(id.to_string()));
        }
        self.storage
            .set_pattern_enabled(id, enabled, &Utc::now().to_rfc3339())
            .await?;
        let next: Vec<CachedPattern> = guard
            .iter()
            .map(|c| {
                let mut pattern = c.pattern.clone();
                if pattern.id == id {
                    pattern.enabled = enabled;
                }
                CachedPattern {
                    pattern,
                    matcher: c.matcher.clone(),
                }
            })
            .collect();
        info!(pattern_id = %id, enabled, "pattern enabled flag changed");
        *guard = Arc::new(next);
        Ok(())
    }

    /// First enabled pattern (insertion order) whose matcher accepts the
    /// signature. `None` means a first-time pattern.
    pub async fn find_match(&self, signature: &Signature) -> Option<PatternMatch> {
        let cache = self.cache.read().await.clone();
        for cached in cache.iter() {
            if !cached.pattern.enabled {
                continue;
            }
            if let Some(quality) = cached.matcher.match_quality(signature) {
                return Some(PatternMatch {
                    pattern: cached.pattern.clone(),
                    quality,
                });
            }
        }
        None
    }

    pub async fn get(&self, id: &str) -> Option<Pattern> {
        let cache = self.cache.read().await.clone();
        cache
            .iter()
            .find(|c| c.pattern.id == id)
            .map(|c| c.pattern.clone())
    }

    /// List patterns, optionally filtered by category and/or enabled flag.
    pub async fn list(&self, category: Option<&str>, enabled_only: bool) -> Vec<Pattern> {
        let cache = self.cache.read().await.clone();
        cache
            .iter()
            .filter(|c| !enabled_only || c.pattern.enabled)
            .filter(|c| category.is_none_or(|cat| c.pattern.category == cat))
            .map(|c| c.pattern.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::{Severity, SignatureMatcher, EXACT_MATCH_QUALITY, REGEX_MATCH_QUALITY};
    use tempfile::TempDir;

    fn pattern(id: &str, matcher: SignatureMatcher) -> Pattern {
        Pattern {
            id: id.to_string(),
            name: format!("pattern {id}"),
            matcher,
            category: "remediation".to_string(),
            severity: Severity::Medium,
            base_confidence: 0.7,
            suggested_approaches: vec!["restart the service".to_string()],
            enabled: true,
        }
    }

    async fn library(dir: &TempDir) -> PatternLibrary {
        let storage = Storage::new(dir.path()).await.expect("storage");
        PatternLibrary::load(storage).await.expect("library")
    }

    #[tokio::test]
    async fn register_rejects_duplicate_id() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir).await;
        let m = SignatureMatcher::Exact {
            value: "oom".to_string(),
        };
        lib.register(pattern("p1", m.clone())).await.unwrap();
        let err = lib.register(pattern("p1", m)).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateId(id) if id == "p1"));
    }

    #[tokio::test]
    async fn first_match_wins_in_insertion_order() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir).await;
        lib.register(pattern(
            "broad",
            SignatureMatcher::Regex {
                pattern: "disk".to_string(),
            },
        ))
        .await
        .unwrap();
        lib.register(pattern(
            "narrow",
            SignatureMatcher::Exact {
                value: "disk full".to_string(),
            },
        ))
        .await
        .unwrap();

        let hit = lib
            .find_match(&Signature::text("disk full"))
            .await
            .expect("match");
        assert_eq!(hit.pattern.id, "broad");
        assert!((hit.quality - REGEX_MATCH_QUALITY).abs() < 1e-9);
    }

    #[tokio::test]
    async fn disabled_patterns_are_skipped_then_rematch_after_enable() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir).await;
        lib.register(pattern(
            "p1",
            SignatureMatcher::Exact {
                value: "stale doc".to_string(),
            },
        ))
        .await
        .unwrap();

        lib.disable("p1").await.unwrap();
        assert!(lib.find_match(&Signature::text("stale doc")).await.is_none());

        lib.enable("p1").await.unwrap();
        let hit = lib.find_match(&Signature::text("STALE DOC")).await.unwrap();
        assert!((hit.quality - EXACT_MATCH_QUALITY).abs() < 1e-9);
    }

    #[tokio::test]
    async fn update_keeps_match_position_and_survives_reload() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir).await;
        lib.register(pattern(
            "first",
            SignatureMatcher::Exact {
                value: "cache miss storm".to_string(),
            },
        ))
        .await
        .unwrap();
        lib.register(pattern(
            "second",
            SignatureMatcher::Regex {
                pattern: "cache".to_string(),
            },
        ))
        .await
        .unwrap();

        // Broaden the first pattern's matcher; it must keep winning the
        // first-match traversal even though "second" also matches now.
        let mut updated = pattern(
            "first",
            SignatureMatcher::Regex {
                pattern: r"cache \w+ storm".to_string(),
            },
        );
        updated.name = "cache storm".to_string();
        lib.update(updated).await.unwrap();

        let hit = lib
            .find_match(&Signature::text("cache miss storm"))
            .await
            .expect("match");
        assert_eq!(hit.pattern.id, "first");
        assert!((hit.quality - REGEX_MATCH_QUALITY).abs() < 1e-9);

        let reloaded = library(&dir).await;
        let hit = reloaded
            .find_match(&Signature::text("cache miss storm"))
            .await
            .expect("match after reload");
        assert_eq!(hit.pattern.id, "first");
        assert_eq!(hit.pattern.name, "cache storm");
    }

    #[tokio::test]
    async fn update_of_unknown_pattern_fails() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir).await;
        let err = lib
            .update(pattern(
                "ghost",
                SignatureMatcher::Exact {
                    value: "x".to_string(),
                },
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PatternNotFound(_)));
    }

    #[tokio::test]
    async fn registry_survives_reload() {
        let dir = TempDir::new().unwrap();
        {
            let lib = library(&dir).await;
            lib.register(pattern(
                "p1",
                SignatureMatcher::Exact {
                    value: "orphan page".to_string(),
                },
            ))
            .await
            .unwrap();
            lib.disable("p1").await.unwrap();
        }
        let reloaded = library(&dir).await;
        let all = reloaded.list(None, false).await;
        assert_eq!(all.len(), 1);
        assert!(!all[0].enabled);
    }

    #[tokio::test]
    async fn list_filters_by_category() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir).await;
        let mut docs = pattern(
            "docs-1",
            SignatureMatcher::Exact {
                value: "x".to_string(),
            },
        );
        docs.category = "docs".to_string();
        lib.register(docs).await.unwrap();
        lib.register(pattern(
            "ops-1",
            SignatureMatcher::Exact {
                value: "y".to_string(),
            },
        ))
        .await
        .unwrap();

        assert_eq!(lib.list(Some("docs"), false).await.len(), 1);
        assert_eq!(lib.list(None, false).await.len(), 2);
    }
}
