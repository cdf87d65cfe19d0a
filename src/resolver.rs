//! Descriptor resolution seam.
//!
//! How a descriptor is located in the host page's internal object graph is
//! entirely the resolver's concern. The engine only requires the
//! [`DescriptorResolver`] contract; [`ResolverChain`] composes the observed
//! extraction variants into one ordered fallback chain that terminates at
//! the engine boundary with a single normalized descriptor type.

use async_trait::async_trait;

use crate::descriptor::{MediaDescriptor, SourceLocator};

/// Everything a resolver may inspect for one task.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub source: SourceLocator,
    /// Human title scraped near the source, if the caller found one.
    pub title_hint: Option<String>,
}

/// One strategy for locating a media descriptor.
///
/// Returns `None` on failure so the chain can fall through to the next
/// strategy. Implementations must normalize the opaque file reference to
/// raw bytes; the engine rejects rather than decodes.
#[async_trait]
pub trait DescriptorResolver: Send + Sync {
    async fn resolve(&self, ctx: &ResolveContext) -> Option<MediaDescriptor>;
}

/// Ordered composite over resolver strategies: first valid descriptor wins.
pub struct ResolverChain {
    resolvers: Vec<Box<dyn DescriptorResolver>>,
}

impl ResolverChain {
    pub fn new(resolvers: Vec<Box<dyn DescriptorResolver>>) -> Self {
        Self { resolvers }
    }

    /// A chain that never resolves. Tasks on it go straight to capture.
    pub fn empty() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    pub fn push(&mut self, resolver: Box<dyn DescriptorResolver>) {
        self.resolvers.push(resolver);
    }
}

#[async_trait]
impl DescriptorResolver for ResolverChain {
    async fn resolve(&self, ctx: &ResolveContext) -> Option<MediaDescriptor> {
        for (i, resolver) in self.resolvers.iter().enumerate() {
            let Some(descriptor) = resolver.resolve(ctx).await else {
                continue;
            };
            // A malformed descriptor is treated exactly like no descriptor;
            // it must not be partially trusted.
            if let Err(e) = descriptor.validate() {
                tracing::warn!(strategy = i, error = %e, "resolver produced invalid descriptor");
                continue;
            }
            tracing::debug!(strategy = i, size = descriptor.total_size, "descriptor resolved");
            return Some(descriptor);
        }
        None
    }
}
