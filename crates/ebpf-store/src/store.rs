//! The [`Store`] facade.
//!
//! A `Store` binds an [`ExecutionContext`] to the resolver, codec and
//! publisher. The publish operations live in [`crate::publisher`], the
//! lookups in [`crate::reader`] and the state dump in [`crate::snapshot`].

use std::sync::Arc;

use crate::context::{
    ExecutionContext, HostContext, PrivilegedContext, ProviderRegistryKey, RegistryKey,
    StoreAnchor,
};
use crate::error::StoreError;
use crate::hive::Hive;
use crate::resolver;

/// The program-type metadata store, running in context `C`.
#[derive(Debug)]
pub struct Store<C: ExecutionContext> {
    pub(crate) ctx: C,
}

impl<C: ExecutionContext> Store<C> {
    pub fn new(ctx: C) -> Self {
        Store { ctx }
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    /// Opens the key of `provider` (a canonical GUID string), creating it
    /// on first use.
    pub fn open_or_create_provider_key(
        &self,
        provider: &str,
    ) -> Result<ProviderRegistryKey<C>, StoreError> {
        resolver::open_or_create_provider_key(&self.ctx, provider)
    }

    /// Opens the key global helpers are published under.
    pub fn open_or_create_global_helpers_key(&self) -> Result<RegistryKey<C::Hive>, StoreError> {
        resolver::open_or_create_global_helpers_key(&self.ctx)
    }
}

impl<H: Hive> Store<HostContext<H>> {
    /// A store running in an ordinary process.
    pub fn host(hive: Arc<H>, root_path: impl Into<String>) -> Self {
        Store::new(HostContext::new(hive, root_path))
    }
}

impl<'a, H: Hive> Store<PrivilegedContext<'a, H>> {
    /// A store running in the privileged context anchored at `anchor`.
    pub fn privileged(anchor: &'a StoreAnchor<H>) -> Self {
        Store::new(PrivilegedContext::new(anchor))
    }
}
