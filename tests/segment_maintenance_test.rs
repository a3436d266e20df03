use std::sync::Arc;

use segbase::config::{DatabaseConfig, IndexSpec, SegmentSize};
use segbase::database::Database;
use segbase::posting::PostingReference;
use segbase::segment::SegmentKind;
use segbase::storage::memory::MemoryStorage;

fn colour(name: &str) -> Vec<u8> {
    format!(r#"{{"colour":"{name}"}}"#).into_bytes()
}

fn posting(db: &Database, key: &[u8]) -> Option<PostingReference> {
    db.index("colour").unwrap().table().get(key, 0)
}

fn kind(db: &Database, key: &[u8]) -> Option<SegmentKind> {
    posting(db, key).map(|reference| reference.kind())
}

fn database() -> Database {
    // width 64, upper 20, lower 19
    let size = SegmentSize::with_segment_size_bytes(8).with_upper_conversion_limit(20);
    let config = DatabaseConfig::new("paint")
        .with_segment_size(size)
        .with_index(IndexSpec::json_field("colour"));
    Database::create(Arc::new(MemoryStorage::new()), config).unwrap()
}

#[test]
fn test_posting_grows_through_each_encoding() {
    let mut db = database();
    db.put_record(colour("red")).unwrap();
    assert_eq!(kind(&db, b"red"), Some(SegmentKind::Int));

    db.put_record(colour("red")).unwrap();
    assert_eq!(kind(&db, b"red"), Some(SegmentKind::List));

    for _ in 2..20 {
        db.put_record(colour("red")).unwrap();
    }
    assert_eq!(posting(&db, b"red").unwrap().count(), 20);
    assert_eq!(kind(&db, b"red"), Some(SegmentKind::List));

    db.put_record(colour("red")).unwrap();
    assert_eq!(kind(&db, b"red"), Some(SegmentKind::Bitarray));
    assert_eq!(db.arena().freed_list_page_count(), 1);
}

#[test]
fn test_delete_demotes_only_below_lower_limit() {
    let mut db = database();
    for _ in 0..21 {
        db.put_record(colour("red")).unwrap();
    }
    assert_eq!(kind(&db, b"red"), Some(SegmentKind::Bitarray));

    db.replace_record(0, colour("blue")).unwrap();
    assert_eq!(posting(&db, b"red").unwrap().count(), 20);
    assert_eq!(kind(&db, b"red"), Some(SegmentKind::Bitarray));

    db.replace_record(1, colour("blue")).unwrap();
    assert_eq!(kind(&db, b"red"), Some(SegmentKind::List));

    // Back up to 20 stays a List; 21 promotes again.
    db.replace_record(0, colour("red")).unwrap();
    assert_eq!(kind(&db, b"red"), Some(SegmentKind::List));
    db.replace_record(1, colour("red")).unwrap();
    assert_eq!(kind(&db, b"red"), Some(SegmentKind::Bitarray));

    let red = db.recordset_for_key("colour", b"red").unwrap();
    assert!(red.record_numbers().eq(0..21));
}

#[test]
fn test_emptied_posting_frees_its_page() {
    let mut db = database();
    for _ in 0..3 {
        db.put_record(colour("green")).unwrap();
    }
    assert_eq!(kind(&db, b"green"), Some(SegmentKind::List));
    assert_eq!(db.arena().freed_list_page_count(), 0);

    assert!(db.delete_record(0).unwrap());
    assert!(db.delete_record(1).unwrap());
    assert_eq!(kind(&db, b"green"), Some(SegmentKind::Int));
    assert_eq!(db.arena().freed_list_page_count(), 1);

    assert!(db.delete_record(2).unwrap());
    assert_eq!(posting(&db, b"green"), None);
    assert!(db.recordset_all().unwrap().is_empty());

    // The next List posting reuses the freed page.
    db.put_record(colour("green")).unwrap();
    db.put_record(colour("green")).unwrap();
    assert_eq!(db.arena().freed_list_page_count(), 0);
    assert_eq!(db.arena().stats().pages_reused, 1);
}
