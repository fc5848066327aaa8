//! Read operations.
//!
//! Lookups open existing keys only; a missing provider, container or record
//! yields `None` or an empty list and nothing is created. Every decoded
//! record is checked against the key it was read from, so a record copied
//! to the wrong place reads as malformed rather than as a different record.

use ebpf_store_types::{Guid, HelperFunctionPrototype, HelperId, ProgramInfo, ProgramSectionInfo};

use crate::codec::{self, CodecError, RECORD_VALUE_NAME};
use crate::context::{ExecutionContext, RegistryKey};
use crate::error::StoreError;
use crate::resolver::{self, HELPERS_KEY, PROGRAMS_KEY, SECTIONS_KEY};
use crate::store::Store;

impl<C: ExecutionContext> Store<C> {
    pub fn read_program_information(
        &self,
        provider: &Guid,
        program_type: &Guid,
    ) -> Result<Option<ProgramInfo>, StoreError> {
        let Some(provider_key) = resolver::open_provider_key(&self.ctx, provider)? else {
            return Ok(None);
        };
        let relative = resolver::program_path(program_type);
        let Some(program) = self.read_record(&provider_key, &relative, codec::decode_program_info)?
        else {
            return Ok(None);
        };
        self.check_identity(
            program.provider == *provider && program.program_type == *program_type,
            "program_type",
        )?;
        Ok(Some(program))
    }

    pub fn read_section_information(
        &self,
        provider: &Guid,
        program_type: &Guid,
        section_prefix: &str,
    ) -> Result<Option<ProgramSectionInfo>, StoreError> {
        // No publisher can have written a key under an unstorable prefix.
        if !codec::is_storable_section_prefix(section_prefix) {
            return Ok(None);
        }
        let Some(provider_key) = resolver::open_provider_key(&self.ctx, provider)? else {
            return Ok(None);
        };
        let relative = resolver::section_path(program_type, section_prefix);
        let Some(section) = self.read_record(&provider_key, &relative, codec::decode_section_info)?
        else {
            return Ok(None);
        };
        self.check_identity(
            section.provider == *provider
                && section.program_type == *program_type
                && section.section_prefix == section_prefix,
            "section_prefix",
        )?;
        Ok(Some(section))
    }

    /// Reads a program-scoped helper published under `provider`.
    pub fn read_helper_prototype(
        &self,
        provider: &Guid,
        helper_id: HelperId,
    ) -> Result<Option<HelperFunctionPrototype>, StoreError> {
        let Some(provider_key) = resolver::open_provider_key(&self.ctx, provider)? else {
            return Ok(None);
        };
        let relative = resolver::helper_path(helper_id);
        let helper = self.read_record(&provider_key, &relative, codec::decode_helper_prototype)?;
        if let Some(helper) = &helper {
            self.check_identity(helper.helper_id == helper_id, "helper_id")?;
        }
        Ok(helper)
    }

    pub fn read_global_helper(
        &self,
        helper_id: HelperId,
    ) -> Result<Option<HelperFunctionPrototype>, StoreError> {
        let Some(global) = resolver::open_global_helpers_key(&self.ctx)? else {
            return Ok(None);
        };
        let helper =
            self.read_record(&global, &helper_id.to_string(), codec::decode_global_helper)?;
        if let Some(helper) = &helper {
            self.check_identity(helper.helper_id == helper_id, "helper_id")?;
        }
        Ok(helper)
    }

    // -----------------------------------------------------------------------
    // Enumeration
    // -----------------------------------------------------------------------

    /// Providers with a key under the Store root, in GUID string order.
    pub fn list_providers(&self) -> Result<Vec<Guid>, StoreError> {
        let Some(root) = self.ctx.existing_root()? else {
            return Ok(Vec::new());
        };
        Ok(self
            .ctx
            .subkeys(&root)?
            .iter()
            .filter_map(|name| Guid::parse(name).ok())
            .collect())
    }

    pub fn list_program_information(&self, provider: &Guid) -> Result<Vec<ProgramInfo>, StoreError> {
        let Some(programs) = self.open_provider_child(provider, PROGRAMS_KEY)? else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        for name in self.ctx.subkeys(&programs)? {
            if let Some(program) = self.read_record(&programs, &name, codec::decode_program_info)? {
                self.check_identity(
                    program.provider == *provider && program.program_type.to_string() == name,
                    "program_type",
                )?;
                found.push(program);
            }
        }
        Ok(found)
    }

    /// Sections of `provider`, ordered by program type then prefix.
    pub fn list_section_information(
        &self,
        provider: &Guid,
    ) -> Result<Vec<ProgramSectionInfo>, StoreError> {
        let Some(sections) = self.open_provider_child(provider, SECTIONS_KEY)? else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        for program_type in self.ctx.subkeys(&sections)? {
            let Some(program_key) = self.ctx.open_key(Some(&sections), &program_type)? else {
                continue;
            };
            for prefix in self.ctx.subkeys(&program_key)? {
                if let Some(section) =
                    self.read_record(&program_key, &prefix, codec::decode_section_info)?
                {
                    self.check_identity(
                        section.provider == *provider
                            && section.program_type.to_string() == program_type
                            && section.section_prefix == prefix,
                        "section_prefix",
                    )?;
                    found.push(section);
                }
            }
        }
        Ok(found)
    }

    /// Program-scoped helpers of `provider`, ordered by helper ID.
    pub fn list_helper_prototypes(
        &self,
        provider: &Guid,
    ) -> Result<Vec<HelperFunctionPrototype>, StoreError> {
        let Some(helpers) = self.open_provider_child(provider, HELPERS_KEY)? else {
            return Ok(Vec::new());
        };
        self.list_helpers(&helpers, codec::decode_helper_prototype)
    }

    /// Global helpers, ordered by helper ID.
    pub fn list_global_helpers(&self) -> Result<Vec<HelperFunctionPrototype>, StoreError> {
        let Some(global) = resolver::open_global_helpers_key(&self.ctx)? else {
            return Ok(Vec::new());
        };
        self.list_helpers(&global, codec::decode_global_helper)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn open_provider_child(
        &self,
        provider: &Guid,
        child: &str,
    ) -> Result<Option<RegistryKey<C::Hive>>, StoreError> {
        match resolver::open_provider_key(&self.ctx, provider)? {
            Some(provider_key) => self.ctx.open_key(Some(&provider_key), child),
            None => Ok(None),
        }
    }

    fn list_helpers(
        &self,
        container: &RegistryKey<C::Hive>,
        decode: fn(&[u8]) -> Result<HelperFunctionPrototype, CodecError>,
    ) -> Result<Vec<HelperFunctionPrototype>, StoreError> {
        let mut found = Vec::new();
        for name in self.ctx.subkeys(container)? {
            if let Some(helper) = self.read_record(container, &name, decode)? {
                self.check_identity(helper.helper_id.to_string() == name, "helper_id")?;
                found.push(helper);
            }
        }
        found.sort_by_key(|helper| helper.helper_id);
        Ok(found)
    }

    /// Decodes the record value of `container/relative`; `None` if either
    /// the key or its record value is absent.
    fn read_record<T>(
        &self,
        container: &RegistryKey<C::Hive>,
        relative: &str,
        decode: fn(&[u8]) -> Result<T, CodecError>,
    ) -> Result<Option<T>, StoreError> {
        let Some(record) = self.ctx.open_key(Some(container), relative)? else {
            return Ok(None);
        };
        let Some(bytes) = self.ctx.query_value(&record, RECORD_VALUE_NAME)? else {
            return Ok(None);
        };
        decode(&bytes).map(Some).map_err(StoreError::malformed::<C>)
    }

    fn check_identity(&self, matches: bool, field: &'static str) -> Result<(), StoreError> {
        if matches {
            return Ok(());
        }
        Err(StoreError::malformed::<C>(CodecError::InvalidField {
            field,
            reason: "record does not match the key it is stored under",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostContext;
    use crate::hive::Hive;
    use crate::memory::MemoryHive;
    use ebpf_store_types::{ContextDescriptor, HelperScope, ProgramFlags, TypeTag};
    use std::sync::Arc;

    const ROOT: &str = "Software/eBPF/Providers";

    fn provider() -> Guid {
        Guid::from_u128(0x11111111_2222_3333_4444_555555555555)
    }

    fn program_type(n: u128) -> Guid {
        Guid::from_u128(0xf1832a85_85d5_45b0_98a0_7069d6301300 + n)
    }

    fn setup() -> (Arc<MemoryHive>, Store<HostContext<MemoryHive>>) {
        let hive = Arc::new(MemoryHive::new());
        let store = Store::host(Arc::clone(&hive), ROOT);
        (hive, store)
    }

    fn program(n: u128) -> ProgramInfo {
        ProgramInfo {
            provider: provider(),
            program_type: program_type(n),
            name: format!("prog{n}"),
            context: ContextDescriptor::new(16),
            allowed_helpers: vec![HelperId(1), HelperId(2)],
            bpf_program_type: n as u32,
            flags: ProgramFlags::empty(),
        }
    }

    fn section(n: u128, prefix: &str) -> ProgramSectionInfo {
        ProgramSectionInfo {
            provider: provider(),
            program_type: program_type(n),
            section_prefix: prefix.into(),
            attach_type: Guid::from_u128(0xabc),
            bpf_program_type: 0,
            bpf_attach_type: 0,
        }
    }

    fn global_helper(id: u32) -> HelperFunctionPrototype {
        HelperFunctionPrototype::new(
            HelperId(id),
            format!("helper_{id}"),
            TypeTag::Int64,
            &[TypeTag::Int64],
            HelperScope::Global,
        )
        .unwrap()
    }

    #[test]
    fn test_reads_never_create_keys() {
        let (hive, store) = setup();
        assert_eq!(store.read_program_information(&provider(), &program_type(1)).unwrap(), None);
        assert_eq!(
            store
                .read_section_information(&provider(), &program_type(1), "xdp")
                .unwrap(),
            None
        );
        assert_eq!(store.read_helper_prototype(&provider(), HelperId(1)).unwrap(), None);
        assert_eq!(store.read_global_helper(HelperId(1)).unwrap(), None);
        assert!(store.list_providers().unwrap().is_empty());
        assert!(store.list_program_information(&provider()).unwrap().is_empty());
        assert!(store.list_section_information(&provider()).unwrap().is_empty());
        assert!(store.list_helper_prototypes(&provider()).unwrap().is_empty());
        assert!(store.list_global_helpers().unwrap().is_empty());
        assert_eq!(hive.key_count(), 0);
        assert_eq!(hive.open_handle_count(), 0);
    }

    #[test]
    fn test_unstorable_section_prefix_reads_as_absent() {
        let (hive, store) = setup();
        store.update_section_information(&[section(1, "xdp")]).unwrap();
        let too_long = "x".repeat(300);
        for prefix in ["", "a\\b", "a/b", "tab\there", too_long.as_str()] {
            assert_eq!(
                store
                    .read_section_information(&provider(), &program_type(1), prefix)
                    .unwrap(),
                None,
                "prefix {prefix:?}"
            );
        }
        assert_eq!(
            store
                .read_section_information(&provider(), &program_type(1), "xdp")
                .unwrap(),
            Some(section(1, "xdp"))
        );
        assert_eq!(hive.open_handle_count(), 0);
    }

    #[test]
    fn test_list_programs_and_sections() {
        let (_hive, store) = setup();
        store
            .update_program_information(&[program(2), program(1)])
            .unwrap();
        store
            .update_section_information(&[section(1, "xdp_test"), section(1, "xdp"), section(2, "tc")])
            .unwrap();

        let programs = store.list_program_information(&provider()).unwrap();
        assert_eq!(programs, vec![program(1), program(2)]);

        let sections = store.list_section_information(&provider()).unwrap();
        let prefixes: Vec<_> = sections.iter().map(|s| s.section_prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["xdp", "xdp_test", "tc"]);

        assert_eq!(store.list_providers().unwrap(), vec![provider()]);
    }

    #[test]
    fn test_global_helpers_sorted_by_id() {
        let (_hive, store) = setup();
        store
            .update_global_helper_information(&[global_helper(10), global_helper(7), global_helper(100)])
            .unwrap();
        let ids: Vec<u32> = store
            .list_global_helpers()
            .unwrap()
            .iter()
            .map(|helper| helper.helper_id.0)
            .collect();
        assert_eq!(ids, vec![7, 10, 100]);
        // global_helpers is not a provider
        assert!(store.list_providers().unwrap().is_empty());
    }

    #[test]
    fn test_misplaced_record_is_malformed() {
        let (_hive, store) = setup();
        store.update_program_information(&[program(1)]).unwrap();

        // Copy program 1's blob under program 2's key.
        let ctx = store.context();
        let source = ctx
            .open_key(None, &format!("{ROOT}/{}/programs/{}", provider(), program_type(1)))
            .unwrap()
            .unwrap();
        let bytes = ctx.query_value(&source, RECORD_VALUE_NAME).unwrap().unwrap();
        let target = ctx
            .create_key(None, &format!("{ROOT}/{}/programs/{}", provider(), program_type(2)))
            .unwrap();
        ctx.set_value(&target, RECORD_VALUE_NAME, &bytes).unwrap();

        assert!(matches!(
            store.read_program_information(&provider(), &program_type(2)),
            Err(StoreError::MalformedRecord { .. })
        ));
        assert!(matches!(
            store.list_program_information(&provider()),
            Err(StoreError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_garbage_record_is_malformed() {
        let (_hive, store) = setup();
        let ctx = store.context();
        let key = ctx.create_key(None, &format!("{ROOT}/global_helpers/3")).unwrap();
        ctx.set_value(&key, RECORD_VALUE_NAME, &[4, 1, 0]).unwrap();
        let err = store.read_global_helper(HelperId(3)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::MalformedRecord {
                source: CodecError::Truncated { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_key_without_record_reads_as_absent() {
        let (_hive, store) = setup();
        let ctx = store.context();
        drop(ctx.create_key(None, &format!("{ROOT}/global_helpers/3")).unwrap());
        assert_eq!(store.read_global_helper(HelperId(3)).unwrap(), None);
        assert!(store.list_global_helpers().unwrap().is_empty());
    }
}
