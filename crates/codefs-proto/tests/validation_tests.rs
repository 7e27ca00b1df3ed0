// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use codefs_proto::*;

#[codefs_test_utils::logged_test]
fn test_valid_mkdir_request() {
    let request = Request::mkdir("/src", 0o755);

    assert!(validate_request(&request).is_ok());
}

#[codefs_test_utils::logged_test]
fn test_relative_path_rejected() {
    let request = Request::unlink("src/main.rs");

    assert!(matches!(
        validate_request(&request),
        Err(ValidationError::Path { .. })
    ));
}

#[codefs_test_utils::logged_test]
fn test_nul_byte_rejected() {
    let request = Request::chmod("/a\0b", 0o644);

    assert!(validate_request(&request).is_err());
}

#[codefs_test_utils::logged_test]
fn test_rename_validates_both_paths() {
    assert!(validate_request(&Request::rename("/a", "/b")).is_ok());
    assert!(validate_request(&Request::rename("/a", "b")).is_err());
    assert!(validate_request(&Request::rename("a", "/b")).is_err());
}

#[codefs_test_utils::logged_test]
fn test_symlink_target_may_be_relative() {
    let request = Request::symlink("../lib/libfoo.so", "/usr/lib/libfoo.so.1");

    assert!(validate_request(&request).is_ok());
}

#[codefs_test_utils::logged_test]
fn test_oversized_read_rejected() {
    let request = Request::read("/big", 0, MAX_READ_SIZE + 1);

    assert!(matches!(
        validate_request(&request),
        Err(ValidationError::Schema(_))
    ));
}

#[codefs_test_utils::logged_test]
fn test_empty_xattr_name_rejected() {
    let request = Request::lsetxattr("/f", "", b"v".to_vec(), 0);

    assert!(validate_request(&request).is_err());
}

#[codefs_test_utils::logged_test]
fn test_zero_protocol_version_rejected() {
    assert!(validate_request(&Request::hello(0)).is_err());
    assert!(validate_request(&Request::hello(PROTOCOL_VERSION)).is_ok());
}

#[codefs_test_utils::logged_test]
fn test_payloadless_requests_are_valid() {
    assert!(validate_request(&Request::Heartbeat).is_ok());
    assert!(validate_request(&Request::Statvfs).is_ok());
    assert!(validate_request(&Request::PollInvalidations).is_ok());
}

#[codefs_test_utils::logged_test]
fn test_record_children_must_be_names() {
    let mut record = FileRecord::deleted("/dir");
    record.deleted = false;
    record.children = vec![b"a.txt".to_vec()];
    assert!(validate_record(&record).is_ok());

    record.children.push(b"nested/b.txt".to_vec());
    assert!(validate_record(&record).is_err());
}

#[codefs_test_utils::logged_test]
fn test_request_frame_round_trips_through_bytes() {
    let request = Request::utimensat(
        "/f",
        TimespecData { sec: 1, nsec: 2 },
        TimespecData { sec: 3, nsec: 4 },
    );
    let bytes = request.to_frame().encode();
    let decoded = Request::from_frame(&RequestFrame::decode(&bytes).unwrap()).unwrap();

    assert_eq!(decoded, request);
}

#[codefs_test_utils::logged_test]
fn test_record_times_must_fit_system_time() {
    let mut record = FileRecord::deleted("/f");
    record.deleted = false;
    record.stat.mtime = TimespecData {
        sec: MAX_TIME_SECS,
        nsec: 999_999_999,
    };
    assert!(validate_record(&record).is_ok());

    record.stat.mtime.sec = u64::MAX;
    assert!(matches!(
        validate_record(&record),
        Err(ValidationError::Schema(_))
    ));

    record.stat.mtime = TimespecData { sec: 1, nsec: 1_000_000_000 };
    assert!(validate_record(&record).is_err());
}
