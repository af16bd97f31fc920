use std::collections::{BTreeMap, BTreeSet, HashMap};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedSender, WeakUnboundedSender};
use tracing::debug;

use crate::geometry_tile_worker::WorkerMessage;

/// Metrics of one glyph at the base glyph size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlyphMetrics {
    pub advance: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IconMetrics {
    pub width: f32,
    pub height: f32,
}

/// Glyphs per font stack and icon names a symbol layout needs before it can
/// be prepared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolDependencies {
    pub glyphs: BTreeMap<String, BTreeSet<char>>,
    pub icons: BTreeSet<String>,
}

impl SymbolDependencies {
    pub fn add_text(&mut self, font_stack: &str, text: &str) {
        self.glyphs
            .entry(font_stack.to_string())
            .or_default()
            .extend(text.chars().filter(|c| !c.is_whitespace()));
    }

    pub fn add_icon(&mut self, name: &str) {
        self.icons.insert(name.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.values().all(BTreeSet::is_empty) && self.icons.is_empty()
    }
}

/// Glyph and icon metrics shared by every tile worker. Workers that could not
/// prepare their symbols register here and are sent
/// `SymbolDependenciesChanged` whenever new glyphs or icons arrive.
#[derive(Default)]
pub struct DependencyRegistry {
    glyphs: DashMap<String, HashMap<char, GlyphMetrics>>,
    icons: DashMap<String, IconMetrics>,
    waiters: DashMap<u64, WeakUnboundedSender<WorkerMessage>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn glyph(&self, font_stack: &str, c: char) -> Option<GlyphMetrics> {
        self.glyphs.get(font_stack)?.get(&c).copied()
    }

    pub fn icon(&self, name: &str) -> Option<IconMetrics> {
        self.icons.get(name).map(|entry| *entry)
    }

    pub fn can_prepare(&self, dependencies: &SymbolDependencies) -> bool {
        let glyphs_ready = dependencies.glyphs.iter().all(|(font_stack, chars)| {
            if chars.is_empty() {
                return true;
            }
            self.glyphs
                .get(font_stack.as_str())
                .is_some_and(|font| chars.iter().all(|c| font.contains_key(c)))
        });
        glyphs_ready && dependencies.icons.iter().all(|name| self.icons.contains_key(name))
    }

    pub fn add_glyphs(&self, font_stack: &str, glyphs: impl IntoIterator<Item = (char, GlyphMetrics)>) {
        self.glyphs
            .entry(font_stack.to_string())
            .or_default()
            .extend(glyphs);
        self.notify();
    }

    pub fn add_icons(&self, icons: impl IntoIterator<Item = (String, IconMetrics)>) {
        for (name, metrics) in icons {
            self.icons.insert(name, metrics);
        }
        self.notify();
    }

    pub fn register(&self, worker_id: u64, mailbox: &UnboundedSender<WorkerMessage>) {
        self.waiters.insert(worker_id, mailbox.downgrade());
    }

    pub fn unregister(&self, worker_id: u64) {
        self.waiters.remove(&worker_id);
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    fn notify(&self) {
        let before = self.waiters.len();
        self.waiters.retain(|_, mailbox| match mailbox.upgrade() {
            Some(tx) => tx.send(WorkerMessage::SymbolDependenciesChanged).is_ok(),
            None => false,
        });
        let pruned = before.saturating_sub(self.waiters.len());
        if pruned > 0 {
            debug!(pruned, "dropped waiters whose workers are gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn metrics() -> GlyphMetrics {
        GlyphMetrics {
            advance: 12.0,
            height: 20.0,
        }
    }

    #[test]
    fn dependencies_resolve_once_everything_arrives() {
        let registry = DependencyRegistry::new();
        let mut deps = SymbolDependencies::default();
        deps.add_text("Sans", "ab a");
        deps.add_icon("cafe");
        assert_eq!(deps.glyphs["Sans"].len(), 2);

        assert!(!registry.can_prepare(&deps));
        registry.add_glyphs("Sans", [('a', metrics()), ('b', metrics())]);
        assert!(!registry.can_prepare(&deps));
        registry.add_icons([(
            "cafe".to_string(),
            IconMetrics {
                width: 16.0,
                height: 16.0,
            },
        )]);
        assert!(registry.can_prepare(&deps));
        assert_eq!(registry.glyph("Sans", 'a'), Some(metrics()));
        assert_eq!(registry.glyph("Serif", 'a'), None);
        assert!(registry.can_prepare(&SymbolDependencies::default()));
    }

    #[test]
    fn registered_workers_are_notified_until_they_go_away() {
        let registry = DependencyRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(1, &tx);

        registry.add_glyphs("Sans", [('x', metrics())]);
        assert!(matches!(rx.try_recv(), Ok(WorkerMessage::SymbolDependenciesChanged)));
        assert_eq!(registry.waiter_count(), 1);

        drop(tx);
        registry.add_glyphs("Sans", [('y', metrics())]);
        assert_eq!(registry.waiter_count(), 0);
    }

    #[test]
    fn unregister_stops_notifications() {
        let registry = DependencyRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(7, &tx);
        registry.unregister(7);
        registry.add_glyphs("Sans", [('x', metrics())]);
        assert!(rx.try_recv().is_err());
    }
}
