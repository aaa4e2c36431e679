use crate::{SegmentReader, SegmentWriter};
use anyhow::Result;
use std::io::Write;
use tempfile::tempdir;

fn sample_records() -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
    vec![
        (b"a".to_vec(), Some(b"apple".to_vec())),
        (b"b".to_vec(), Some(b"banana".to_vec())),
        (b"c".to_vec(), Some(b"".to_vec())),
        (b"d".to_vec(), None),
    ]
}

// -------------------- Open & get --------------------

#[test]
fn open_and_get_entries() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("sample.sst");

    SegmentWriter::write_to_path(&path, 4, 4096, sample_records().into_iter())?;
    let reader = SegmentReader::open(&path, 4096)?;

    assert_eq!(reader.get(b"a")?, Some(Some(b"apple".to_vec())));
    assert_eq!(reader.get(b"b")?, Some(Some(b"banana".to_vec())));
    // present but empty value
    assert_eq!(reader.get(b"c")?, Some(Some(Vec::new())));
    // tombstone
    assert_eq!(reader.get(b"d")?, Some(None));
    // absent
    assert_eq!(reader.get(b"nope")?, None);
    Ok(())
}

#[test]
fn from_meta_matches_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("meta.sst");

    let meta = SegmentWriter::write_to_path(&path, 4, 4096, sample_records().into_iter())?;
    let attached = SegmentReader::from_meta(&path, meta)?;
    let reopened = SegmentReader::open(&path, 4096)?;

    assert_eq!(attached.len(), reopened.len());
    assert_eq!(attached.size_bytes(), reopened.size_bytes());
    for key in [&b"a"[..], b"b", b"c", b"d", b"zz"] {
        assert_eq!(attached.get(key)?, reopened.get(key)?);
    }
    Ok(())
}

#[test]
fn key_before_first_record_is_absent() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("first.sst");

    let records = vec![(b"m".to_vec(), Some(b"mid".to_vec()))];
    SegmentWriter::write_to_path(&path, 1, 4096, records.into_iter())?;
    let reader = SegmentReader::open(&path, 4096)?;

    assert_eq!(reader.get(b"a")?, None);
    Ok(())
}

// -------------------- Sparse index + forward scan --------------------

#[test]
fn lookup_scans_forward_from_sparse_entry() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("many.sst");

    let records: Vec<(Vec<u8>, Option<Vec<u8>>)> = (0..500u32)
        .map(|i| (format!("key-{:04}", i).into_bytes(), Some(vec![b'v'; 16])))
        .collect();
    // tiny interval so most lookups land between index entries
    SegmentWriter::write_to_path(&path, records.len(), 128, records.into_iter())?;
    let reader = SegmentReader::open(&path, 128)?;

    for i in [0u32, 1, 137, 255, 498, 499] {
        let key = format!("key-{:04}", i).into_bytes();
        assert_eq!(reader.get(&key)?, Some(Some(vec![b'v'; 16])), "key {}", i);
    }
    assert_eq!(reader.get(b"key-0500")?, None);
    // sorts between key-0001 and key-0002
    assert_eq!(reader.get(b"key-00015")?, None);
    Ok(())
}

// -------------------- Truncated tails --------------------

#[test]
fn truncated_tail_is_ignored() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("torn.sst");

    SegmentWriter::write_to_path(&path, 4, 4096, sample_records().into_iter())?;

    // simulate a crash mid-append: half a record header at the end
    let mut f = std::fs::OpenOptions::new().append(true).open(&path)?;
    f.write_all(&[9u8, 0, 0])?;
    drop(f);

    let reader = SegmentReader::open(&path, 4096)?;
    assert_eq!(reader.len(), 4);
    assert_eq!(reader.get(b"a")?, Some(Some(b"apple".to_vec())));
    assert_eq!(reader.get(b"d")?, Some(None));
    Ok(())
}

#[test]
fn empty_file_opens_with_zero_records() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("empty.sst");
    std::fs::File::create(&path)?;

    let reader = SegmentReader::open(&path, 4096)?;
    assert!(reader.is_empty());
    assert_eq!(reader.get(b"k")?, None);
    Ok(())
}

// -------------------- read_all --------------------

#[test]
fn read_all_returns_records_in_file_order() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("all.sst");

    SegmentWriter::write_to_path(&path, 4, 4096, sample_records().into_iter())?;
    let reader = SegmentReader::open(&path, 4096)?;

    let all = reader.read_all()?;
    assert_eq!(all, sample_records());

    // reading twice works through the shared handle
    let again = reader.read_all()?;
    assert_eq!(again, sample_records());
    Ok(())
}

// -------------------- Large values --------------------

#[test]
fn large_value_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("large.sst");

    let big = vec![0xabu8; 1024 * 1024];
    let records = vec![(b"big".to_vec(), Some(big.clone()))];
    SegmentWriter::write_to_path(&path, 1, 4096, records.into_iter())?;

    let reader = SegmentReader::open(&path, 4096)?;
    assert_eq!(reader.get(b"big")?, Some(Some(big)));
    Ok(())
}
