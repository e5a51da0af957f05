//! Test module contract.
//!
//! Every built-in module implements [`TestModule`]. A module is a flat
//! sequence of independent checks; each check records its own outcome
//! through the [`ModuleContext`] and keeps going when it fails.
//!
//! [`DynTestModule`] is the object-safe twin used by the registry, which
//! stores modules as `Arc<dyn DynTestModule<C>>`.
//!
//! # Example
//! ```ignore
//! struct Dns;
//!
//! static DNS: ModuleInfo = ModuleInfo::new(Category::Core, "dns", "cluster DNS resolution");
//!
//! impl<C: ClusterClient> TestModule<C> for Dns {
//!     fn info(&self) -> &ModuleInfo { &DNS }
//!
//!     async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
//!         ctx.pass("kubernetes-service", "resolved kubernetes.default");
//!         Ok(())
//!     }
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use k3s_validator_cluster::ClusterClient;
use k3s_validator_core::Category;

use crate::context::ModuleContext;
use crate::error::ModuleError;

/// Boxed future returned by [`DynTestModule::run`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Static module metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub category: Category,
    /// Identifier, unique within the category (e.g. `"system-pods"`).
    pub id: &'static str,
    pub description: &'static str,
}

impl ModuleInfo {
    pub const fn new(category: Category, id: &'static str, description: &'static str) -> Self {
        Self {
            category,
            id,
            description,
        }
    }

    /// `<category>/<id>`, the key used in configuration.
    pub fn key(&self) -> String {
        format!("{}/{}", self.category, self.id)
    }
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.id)
    }
}

/// A built-in test module.
pub trait TestModule<C: ClusterClient>: Send + Sync + 'static {
    fn info(&self) -> &ModuleInfo;

    /// Run every check of the module against the fixture namespace.
    ///
    /// Check outcomes are recorded through `ctx`. Returning `Err` means the
    /// module as a whole could not continue.
    fn run(&self, ctx: &ModuleContext<C>) -> impl Future<Output = Result<(), ModuleError>> + Send;
}

/// Object-safe form of [`TestModule`].
pub trait DynTestModule<C: ClusterClient>: Send + Sync {
    fn info(&self) -> &ModuleInfo;

    fn run<'a>(&'a self, ctx: &'a ModuleContext<C>) -> BoxFuture<'a, Result<(), ModuleError>>;
}

impl<C: ClusterClient, T: TestModule<C>> DynTestModule<C> for T {
    fn info(&self) -> &ModuleInfo {
        TestModule::info(self)
    }

    fn run<'a>(&'a self, ctx: &'a ModuleContext<C>) -> BoxFuture<'a, Result<(), ModuleError>> {
        Box::pin(TestModule::run(self, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_joins_category_and_id() {
        let info = ModuleInfo::new(Category::K3sSpecific, "service-lb", "servicelb");
        assert_eq!(info.key(), "k3s-specific/service-lb");
        assert_eq!(info.to_string(), "k3s-specific/service-lb");
    }
}
