//! End-to-end publish tests through the public `Store` API.

use std::sync::Arc;

use ebpf_store::codec::{self, CodecError};
use ebpf_store::status::{ntstatus, win32};
use ebpf_store::{
    ExecutionContext, Hive, HiveFailure, MemoryHive, OperationStatus, Store, StoreAnchor,
    StoreError, RECORD_VALUE_NAME,
};
use ebpf_store_types::{
    ContextDescriptor, Guid, HelperFunctionPrototype, HelperId, HelperScope, ProgramFlags,
    ProgramInfo, ProgramSectionInfo, TypeTag,
};

const ROOT: &str = "Software/eBPF/Providers";
const PROVIDER: &str = "{11111111-2222-3333-4444-555555555555}";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn provider() -> Guid {
    Guid::parse(PROVIDER).unwrap()
}

fn program_type(n: u128) -> Guid {
    Guid::from_u128(0xf1832a85_85d5_45b0_98a0_7069d6301300 + n)
}

fn program(n: u128) -> ProgramInfo {
    ProgramInfo {
        provider: provider(),
        program_type: program_type(n),
        name: format!("program_{n}"),
        context: ContextDescriptor::new(24).with_packet(0, 8).with_meta(16),
        allowed_helpers: vec![HelperId(1), HelperId(2), HelperId(3)],
        bpf_program_type: n as u32,
        flags: ProgramFlags::IS_64_BIT,
    }
}

fn section(n: u128, prefix: &str) -> ProgramSectionInfo {
    ProgramSectionInfo {
        provider: provider(),
        program_type: program_type(n),
        section_prefix: prefix.to_string(),
        attach_type: Guid::from_u128(0x85e0d8ef_579e_4931_b072_8ee226bb2e9d),
        bpf_program_type: n as u32,
        bpf_attach_type: 1,
    }
}

fn global_helper(id: u32) -> HelperFunctionPrototype {
    HelperFunctionPrototype::new(
        HelperId(id),
        format!("global_{id}"),
        TypeTag::Int64,
        &[TypeTag::Ptr, TypeTag::Int64],
        HelperScope::Global,
    )
    .unwrap()
}

fn scoped_helper(id: u32) -> HelperFunctionPrototype {
    HelperFunctionPrototype::new(
        HelperId(id),
        format!("scoped_{id}"),
        TypeTag::Int32,
        &[TypeTag::PtrToCtx],
        HelperScope::Program(program_type(1)),
    )
    .unwrap()
    .with_reallocate_packet(true)
}

fn host_store() -> (Arc<MemoryHive>, Store<ebpf_store::HostContext<MemoryHive>>) {
    let hive = Arc::new(MemoryHive::new());
    let store = Store::host(Arc::clone(&hive), ROOT);
    (hive, store)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn scenario_a_global_helper_roundtrip() {
    let (hive, store) = host_store();
    let helper = HelperFunctionPrototype::new(
        HelperId(7),
        "map_lookup_elem",
        TypeTag::Int64,
        &[TypeTag::Ptr, TypeTag::Int64],
        HelperScope::Global,
    )
    .unwrap();

    store
        .update_global_helper_information(std::slice::from_ref(&helper))
        .unwrap();

    // Decode the raw value straight from the hive.
    let key = hive
        .open_key(None, &format!("{ROOT}/global_helpers/7"))
        .unwrap();
    let bytes = hive.query_value(key, RECORD_VALUE_NAME).unwrap().unwrap();
    hive.close_key(key);
    assert_eq!(codec::decode_global_helper(&bytes).unwrap(), helper);

    assert_eq!(store.read_global_helper(HelperId(7)).unwrap(), Some(helper));
    assert_eq!(hive.open_handle_count(), 0);
}

#[test]
fn scenario_b_program_under_provider() {
    let (hive, store) = host_store();
    let key = store.open_or_create_provider_key(PROVIDER).unwrap();
    assert_eq!(key.path(), format!("{ROOT}/{PROVIDER}"));

    let x = program(1);
    store.update_program_information(std::slice::from_ref(&x)).unwrap();

    let record = store
        .context()
        .open_key(Some(&key), &format!("programs/{}", x.program_type))
        .unwrap()
        .unwrap();
    let bytes = store
        .context()
        .query_value(&record, RECORD_VALUE_NAME)
        .unwrap()
        .unwrap();
    let decoded = codec::decode_program_info(&bytes).unwrap();
    assert_eq!(decoded, x);
    assert_eq!(decoded.allowed_helpers, vec![HelperId(1), HelperId(2), HelperId(3)]);

    drop(record);
    drop(key);
    assert_eq!(hive.open_handle_count(), 0);
}

#[test]
fn scenario_c_malformed_provider_creates_nothing() {
    let (hive, store) = host_store();
    let err = store.open_or_create_provider_key("not-a-guid").unwrap_err();
    assert!(matches!(err, StoreError::InvalidIdentifier { .. }));
    assert_eq!(err.status(), win32::ERROR_INVALID_PARAMETER);
    assert_eq!(hive.key_count(), 0);
    assert_eq!(hive.open_handle_count(), 0);
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

fn publish_everything<C: ExecutionContext>(store: &Store<C>) {
    store
        .update_program_information(&[program(1), program(2)])
        .unwrap();
    store
        .update_section_information(&[section(1, "xdp"), section(2, "tc")])
        .unwrap();
    store
        .update_global_helper_information(&[global_helper(1), global_helper(2)])
        .unwrap();
    let key = store.open_or_create_provider_key(PROVIDER).unwrap();
    store
        .update_helper_prototype(&key, &scoped_helper(65536))
        .unwrap();
}

#[test]
fn publishing_twice_equals_publishing_once() {
    let (hive, store) = host_store();
    publish_everything(&store);
    let once = store.snapshot().unwrap();
    let keys_once = hive.key_count();

    publish_everything(&store);
    let twice = store.snapshot().unwrap();

    assert_eq!(once, twice);
    assert_eq!(once.fingerprint(), twice.fingerprint());
    assert_eq!(hive.key_count(), keys_once);
    assert_eq!(hive.open_handle_count(), 0);
}

#[test]
fn republishing_overwrites_in_place() {
    let (_hive, store) = host_store();
    store.update_program_information(&[program(1)]).unwrap();

    let mut updated = program(1);
    updated.allowed_helpers = vec![HelperId(9)];
    updated.flags = ProgramFlags::IS_64_BIT | ProgramFlags::PRIVILEGED;
    store
        .update_program_information(std::slice::from_ref(&updated))
        .unwrap();

    assert_eq!(
        store
            .read_program_information(&provider(), &program_type(1))
            .unwrap(),
        Some(updated)
    );
    assert_eq!(store.list_program_information(&provider()).unwrap().len(), 1);
}

#[test]
fn provider_key_opened_twice_is_one_key() {
    let (hive, store) = host_store();
    let first = store.open_or_create_provider_key(PROVIDER).unwrap();
    let count = hive.key_count();
    let second = store
        .open_or_create_provider_key(&PROVIDER.to_lowercase())
        .unwrap();
    assert_eq!(first.path(), second.path());
    assert_eq!(hive.key_count(), count);
}

// ---------------------------------------------------------------------------
// Batch policy
// ---------------------------------------------------------------------------

#[test]
fn batch_continues_past_malformed_entry() {
    let (_hive, store) = host_store();
    let mut programs: Vec<ProgramInfo> = (0..5).map(program).collect();
    programs[2].name = "n".repeat(300);

    let err = store.update_program_information(&programs).unwrap_err();
    assert!(matches!(
        err,
        StoreError::MalformedRecord {
            source: CodecError::TooLong { field: "name", .. },
            ..
        }
    ));

    for (index, expected) in programs.iter().enumerate() {
        let stored = store
            .read_program_information(&provider(), &expected.program_type)
            .unwrap();
        if index == 2 {
            assert_eq!(stored, None);
        } else {
            assert_eq!(stored.as_ref(), Some(expected));
        }
    }
}

#[test]
fn batch_reports_first_failure() {
    let (_hive, store) = host_store();
    let sections = vec![
        section(1, "ok_a"),
        section(2, ""),
        section(3, "ok_b"),
        section(4, "bad/prefix"),
    ];

    let result = store.update_section_information(&sections);
    assert_eq!(result.status(), win32::ERROR_INVALID_PARAMETER);
    match result {
        Err(StoreError::MalformedRecord {
            source: CodecError::InvalidField { reason, .. },
            ..
        }) => assert_eq!(reason, "empty"),
        other => panic!("unexpected result {other:?}"),
    }

    let stored = store.list_section_information(&provider()).unwrap();
    let prefixes: Vec<_> = stored.iter().map(|s| s.section_prefix.as_str()).collect();
    assert_eq!(prefixes, vec!["ok_a", "ok_b"]);
}

#[test]
fn global_batch_rejects_scoped_helper_only() {
    let (_hive, store) = host_store();
    let err = store
        .update_global_helper_information(&[global_helper(1), scoped_helper(2), global_helper(3)])
        .unwrap_err();
    assert!(matches!(err, StoreError::MalformedRecord { .. }));
    let ids: Vec<u32> = store
        .list_global_helpers()
        .unwrap()
        .iter()
        .map(|h| h.helper_id.0)
        .collect();
    assert_eq!(ids, vec![1, 3]);
}

// ---------------------------------------------------------------------------
// Handles and failure paths
// ---------------------------------------------------------------------------

#[test]
fn no_handles_leak_on_failure_paths() {
    let hive = Arc::new(MemoryHive::with_key_quota(6));
    let store = Store::host(Arc::clone(&hive), ROOT);

    // Root path (3 keys), provider, programs and the first program fill the quota.
    let result = store.update_program_information(&[program(1), program(2)]);
    let err = result.unwrap_err();
    assert!(matches!(
        err,
        StoreError::KeyAccessFailure {
            source: HiveFailure::QuotaExceeded,
            ..
        }
    ));
    assert_eq!(err.status(), win32::ERROR_NO_SYSTEM_RESOURCES);
    assert_eq!(hive.open_handle_count(), 0);

    hive.set_read_only(true);
    let key = store.open_or_create_provider_key(PROVIDER).unwrap();
    let err = store
        .update_helper_prototype(&key, &scoped_helper(1))
        .unwrap_err();
    assert_eq!(err.status(), win32::ERROR_ACCESS_DENIED);
    drop(key);
    assert_eq!(hive.open_handle_count(), 0);
}

#[test]
fn read_only_hive_reports_service_failure_on_write() {
    let (hive, store) = host_store();
    store.update_program_information(&[program(1)]).unwrap();
    hive.set_read_only(true);

    // Every key exists already, so only the value write fails.
    let err = store.update_program_information(&[program(1)]).unwrap_err();
    assert!(matches!(
        err,
        StoreError::UnderlyingServiceFailure {
            source: HiveFailure::AccessDenied { .. },
            ..
        }
    ));
    assert_eq!(err.status(), win32::ERROR_ACCESS_DENIED);
    assert_eq!(hive.open_handle_count(), 0);
}

// ---------------------------------------------------------------------------
// Execution contexts
// ---------------------------------------------------------------------------

#[test]
fn privileged_and_host_contexts_agree() {
    let host_hive = Arc::new(MemoryHive::new());
    let host = Store::host(Arc::clone(&host_hive), ROOT);
    publish_everything(&host);

    let privileged_hive = Arc::new(MemoryHive::new());
    let anchor = StoreAnchor::initialize(Arc::clone(&privileged_hive), ROOT).unwrap();
    {
        let privileged = Store::privileged(&anchor);
        publish_everything(&privileged);
        assert_eq!(
            privileged.snapshot().unwrap().fingerprint(),
            host.snapshot().unwrap().fingerprint()
        );
        // Only the anchor's root handle stays open.
        assert_eq!(privileged_hive.open_handle_count(), 1);
    }
    anchor.shutdown();
    assert_eq!(privileged_hive.open_handle_count(), 0);
    assert_eq!(host_hive.open_handle_count(), 0);
}

#[test]
fn privileged_context_reports_ntstatus() {
    let hive = Arc::new(MemoryHive::new());
    let anchor = StoreAnchor::initialize(Arc::clone(&hive), ROOT).unwrap();
    let store = Store::privileged(&anchor);

    let err = store.open_or_create_provider_key("{not-a-guid}").unwrap_err();
    assert_eq!(err.status(), ntstatus::STATUS_INVALID_PARAMETER);

    hive.set_read_only(true);
    let err = store.update_program_information(&[program(1)]).unwrap_err();
    assert_eq!(err.status(), ntstatus::STATUS_ACCESS_DENIED);
}

#[test]
fn concurrent_disjoint_publishes() {
    let (hive, store) = host_store();
    std::thread::scope(|scope| {
        for worker in 0..4u128 {
            let store = &store;
            scope.spawn(move || {
                let programs: Vec<_> = (0..8).map(|i| program(worker * 100 + i)).collect();
                store.update_program_information(&programs).unwrap();
            });
        }
    });
    assert_eq!(store.list_program_information(&provider()).unwrap().len(), 32);
    assert_eq!(hive.open_handle_count(), 0);
}
