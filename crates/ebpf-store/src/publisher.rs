//! Publish operations.
//!
//! Each record is encoded before any key is touched, so a malformed record
//! leaves the hive unchanged. The encoded blob is then written as the single
//! [`RECORD_VALUE_NAME`] value of its key, replacing any earlier record with
//! the same identity.
//!
//! The three batch operations are best effort: every entry is attempted in
//! order, a failing entry does not stop the ones after it, and the first
//! failure is returned once the batch is done. Nothing is rolled back.

use ebpf_store_types::{HelperFunctionPrototype, ProgramInfo, ProgramSectionInfo};
use tracing::{debug, trace};

use crate::codec::{self, RecordKind, RECORD_VALUE_NAME};
use crate::context::{ExecutionContext, RegistryKey};
use crate::error::StoreError;
use crate::resolver::{self, HelperContainer};
use crate::store::Store;

impl<C: ExecutionContext> Store<C> {
    /// Publishes one helper prototype under `key`.
    ///
    /// `key` is either a provider key (the helper must be scoped to a
    /// program type and lands at `helpers/<id>`) or the global helpers key
    /// (the helper must be global and lands at `<id>`). Any other key is an
    /// invalid identifier.
    pub fn update_helper_prototype(
        &self,
        key: &RegistryKey<C::Hive>,
        prototype: &HelperFunctionPrototype,
    ) -> Result<(), StoreError> {
        let (bytes, relative) = match resolver::classify_helper_container(&self.ctx, key)? {
            HelperContainer::Provider(_) => (
                codec::encode_helper_prototype(prototype),
                resolver::helper_path(prototype.helper_id),
            ),
            HelperContainer::Global => (
                codec::encode_global_helper(prototype),
                prototype.helper_id.to_string(),
            ),
        };
        let bytes = bytes.map_err(StoreError::malformed::<C>)?;
        self.write_record(key, &relative, &bytes)
    }

    /// Publishes section conventions, each under its own provider.
    pub fn update_section_information(
        &self,
        sections: &[ProgramSectionInfo],
    ) -> Result<(), StoreError> {
        self.publish_batch(RecordKind::SectionInfo, sections, |section| {
            let bytes = codec::encode_section_info(section).map_err(StoreError::malformed::<C>)?;
            let provider = resolver::provider_key(&self.ctx, &section.provider)?;
            let relative = resolver::section_path(&section.program_type, &section.section_prefix);
            self.write_record(&provider, &relative, &bytes)
        })
    }

    /// Publishes program type descriptions, each under its own provider.
    pub fn update_program_information(&self, programs: &[ProgramInfo]) -> Result<(), StoreError> {
        self.publish_batch(RecordKind::ProgramInfo, programs, |program| {
            let bytes = codec::encode_program_info(program).map_err(StoreError::malformed::<C>)?;
            let provider = resolver::provider_key(&self.ctx, &program.provider)?;
            self.write_record(&provider, &resolver::program_path(&program.program_type), &bytes)
        })
    }

    /// Publishes helpers visible to every program type.
    pub fn update_global_helper_information(
        &self,
        helpers: &[HelperFunctionPrototype],
    ) -> Result<(), StoreError> {
        self.publish_batch(RecordKind::GlobalHelper, helpers, |helper| {
            let bytes = codec::encode_global_helper(helper).map_err(StoreError::malformed::<C>)?;
            let global = resolver::open_or_create_global_helpers_key(&self.ctx)?;
            self.write_record(&global, &helper.helper_id.to_string(), &bytes)
        })
    }

    fn write_record(
        &self,
        container: &RegistryKey<C::Hive>,
        relative: &str,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let record = self.ctx.create_key(Some(container), relative)?;
        self.ctx.set_value(&record, RECORD_VALUE_NAME, bytes)?;
        trace!(path = record.path(), len = bytes.len(), "record written");
        Ok(())
    }

    fn publish_batch<T>(
        &self,
        kind: RecordKind,
        entries: &[T],
        mut publish: impl FnMut(&T) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut first_failure = None;
        let mut failed = 0usize;
        for (index, entry) in entries.iter().enumerate() {
            if let Err(err) = publish(entry) {
                debug!(%kind, index, status = %err.status(), error = %err, "batch entry failed");
                failed += 1;
                first_failure.get_or_insert(err);
            }
        }
        debug!(%kind, total = entries.len(), failed, "batch published");
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
