//! Key hierarchy resolution.
//!
//! ```text
//! <root>/
//!   global_helpers/<helper_id>
//!   <PROVIDER-GUID>/
//!     programs/<PROGRAM-GUID>
//!     sections/<PROGRAM-GUID>/<section_prefix>
//!     helpers/<helper_id>
//! ```
//!
//! GUID key names use the canonical uppercase form, so differently cased
//! spellings of one identifier resolve to the same key.

use ebpf_store_types::{Guid, HelperId};
use tracing::trace;

use crate::context::{ExecutionContext, ProviderRegistryKey, RegistryKey};
use crate::error::StoreError;
use crate::hive::{join_path, key_name, parent_path, KEY_SEPARATOR};

pub const PROGRAMS_KEY: &str = "programs";
pub const SECTIONS_KEY: &str = "sections";
pub const HELPERS_KEY: &str = "helpers";
pub const GLOBAL_HELPERS_KEY: &str = "global_helpers";

/// Opens the key of a provider, creating it on first use.
///
/// `provider` must be a canonical 38-character GUID string. It is validated
/// before the hive is touched, so a rejected identifier creates nothing.
pub fn open_or_create_provider_key<C: ExecutionContext>(
    ctx: &C,
    provider: &str,
) -> Result<ProviderRegistryKey<C>, StoreError> {
    let guid = Guid::parse(provider)
        .map_err(|reason| StoreError::invalid_identifier::<C>(provider, reason))?;
    provider_key(ctx, &guid)
}

/// Opens or creates the provider key for an already parsed GUID.
pub(crate) fn provider_key<C: ExecutionContext>(
    ctx: &C,
    provider: &Guid,
) -> Result<ProviderRegistryKey<C>, StoreError> {
    let root = ctx.root()?;
    let key = ctx.create_key(Some(&*root), &provider.to_string())?;
    trace!(path = key.path(), "resolved provider key");
    Ok(key)
}

/// Opens a provider key if it exists.
pub(crate) fn open_provider_key<C: ExecutionContext>(
    ctx: &C,
    provider: &Guid,
) -> Result<Option<ProviderRegistryKey<C>>, StoreError> {
    match ctx.existing_root()? {
        Some(root) => ctx.open_key(Some(&*root), &provider.to_string()),
        None => Ok(None),
    }
}

/// Opens the key holding global helper records, creating it on first use.
pub fn open_or_create_global_helpers_key<C: ExecutionContext>(
    ctx: &C,
) -> Result<RegistryKey<C::Hive>, StoreError> {
    let root = ctx.root()?;
    ctx.create_key(Some(&*root), GLOBAL_HELPERS_KEY)
}

pub(crate) fn open_global_helpers_key<C: ExecutionContext>(
    ctx: &C,
) -> Result<Option<RegistryKey<C::Hive>>, StoreError> {
    match ctx.existing_root()? {
        Some(root) => ctx.open_key(Some(&*root), GLOBAL_HELPERS_KEY),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Record paths, relative to a provider key
// ---------------------------------------------------------------------------

pub fn program_path(program_type: &Guid) -> String {
    format!("{PROGRAMS_KEY}{KEY_SEPARATOR}{program_type}")
}

pub fn section_path(program_type: &Guid, section_prefix: &str) -> String {
    format!("{SECTIONS_KEY}{KEY_SEPARATOR}{program_type}{KEY_SEPARATOR}{section_prefix}")
}

pub fn helper_path(helper_id: HelperId) -> String {
    format!("{HELPERS_KEY}{KEY_SEPARATOR}{helper_id}")
}

/// Where a helper prototype may be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperContainer {
    /// A provider key; records go under `helpers/<id>`.
    Provider(Guid),
    /// The global helpers key; records go directly under it.
    Global,
}

/// Decides whether `key` is a provider key or the global helpers key.
///
/// Any other key is rejected as an invalid identifier.
pub fn classify_helper_container<C: ExecutionContext>(
    ctx: &C,
    key: &RegistryKey<C::Hive>,
) -> Result<HelperContainer, StoreError> {
    let root = ctx.root_path();
    if key.path() == join_path(root, GLOBAL_HELPERS_KEY) {
        return Ok(HelperContainer::Global);
    }
    if parent_path(key.path()) == Some(root) {
        if let Ok(provider) = Guid::parse(key_name(key.path())) {
            return Ok(HelperContainer::Provider(provider));
        }
    }
    Err(StoreError::invalid_identifier::<C>(
        key.path(),
        "not a provider key or the global helpers key",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostContext;
    use crate::hive::Hive;
    use crate::memory::MemoryHive;
    use crate::status::win32;
    use std::sync::Arc;

    const ROOT: &str = "Software/eBPF/Providers";
    const PROVIDER: &str = "{11111111-2222-3333-4444-555555555555}";

    fn setup() -> (Arc<MemoryHive>, HostContext<MemoryHive>) {
        let hive = Arc::new(MemoryHive::new());
        let ctx = HostContext::new(Arc::clone(&hive), ROOT);
        (hive, ctx)
    }

    #[test]
    fn test_provider_key_is_idempotent() {
        let (hive, ctx) = setup();
        let first = open_or_create_provider_key(&ctx, PROVIDER).unwrap();
        let second = open_or_create_provider_key(&ctx, PROVIDER).unwrap();
        assert_eq!(first.path(), second.path());
        assert_eq!(first.path(), format!("{ROOT}/{PROVIDER}"));
        assert_ne!(first.raw(), second.raw());
        // Software, eBPF, Providers, provider
        assert_eq!(hive.key_count(), 4);
    }

    #[test]
    fn test_provider_key_is_case_insensitive() {
        let (hive, ctx) = setup();
        let lower = "{aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee}";
        let key = open_or_create_provider_key(&ctx, lower).unwrap();
        assert_eq!(key.name(), lower.to_uppercase());
        let again = open_or_create_provider_key(&ctx, &lower.to_uppercase()).unwrap();
        assert_eq!(key.path(), again.path());
        assert_eq!(hive.key_count(), 4);
    }

    #[test]
    fn test_malformed_provider_creates_nothing() {
        let (hive, ctx) = setup();
        for bad in [
            "not-a-guid",
            "",
            "11111111-2222-3333-4444-555555555555",
            "{11111111-2222-3333-4444-55555555555}",
            "{11111111-2222-3333-4444-55555555555G}",
            "(11111111-2222-3333-4444-555555555555)",
            "{11111111+2222-3333-4444-555555555555}",
        ] {
            let err = open_or_create_provider_key(&ctx, bad).unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidIdentifier { .. }),
                "{bad:?} gave {err:?}"
            );
            assert_eq!(err.status(), win32::ERROR_INVALID_PARAMETER);
        }
        assert_eq!(hive.key_count(), 0);
        assert_eq!(hive.open_handle_count(), 0);
    }

    #[test]
    fn test_open_provider_key_never_creates() {
        let (hive, ctx) = setup();
        let guid = Guid::parse(PROVIDER).unwrap();
        assert!(open_provider_key(&ctx, &guid).unwrap().is_none());
        assert_eq!(hive.key_count(), 0);

        drop(provider_key(&ctx, &guid).unwrap());
        assert!(open_provider_key(&ctx, &guid).unwrap().is_some());
    }

    #[test]
    fn test_record_paths() {
        let program = Guid::from_u128(0xf1832a85_85d5_45b0_98a0_7069d63013b0);
        assert_eq!(
            program_path(&program),
            "programs/{F1832A85-85D5-45B0-98A0-7069D63013B0}"
        );
        assert_eq!(
            section_path(&program, "xdp"),
            "sections/{F1832A85-85D5-45B0-98A0-7069D63013B0}/xdp"
        );
        assert_eq!(helper_path(HelperId(65536)), "helpers/65536");
    }

    #[test]
    fn test_classify_helper_container() {
        let (_hive, ctx) = setup();
        let provider = open_or_create_provider_key(&ctx, PROVIDER).unwrap();
        assert_eq!(
            classify_helper_container(&ctx, &provider).unwrap(),
            HelperContainer::Provider(Guid::parse(PROVIDER).unwrap())
        );

        let global = open_or_create_global_helpers_key(&ctx).unwrap();
        assert_eq!(global.path(), format!("{ROOT}/global_helpers"));
        assert_eq!(
            classify_helper_container(&ctx, &global).unwrap(),
            HelperContainer::Global
        );

        let nested = ctx.create_key(Some(&provider), PROGRAMS_KEY).unwrap();
        assert!(matches!(
            classify_helper_container(&ctx, &nested),
            Err(StoreError::InvalidIdentifier { .. })
        ));
        let elsewhere = ctx.create_key(None, PROVIDER).unwrap();
        assert!(matches!(
            classify_helper_container(&ctx, &elsewhere),
            Err(StoreError::InvalidIdentifier { .. })
        ));
    }
}
