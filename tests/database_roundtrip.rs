//! End-to-end persistence through the database handle: reopen round-trips,
//! abrupt-drop robustness, and index consistency across sessions.

use std::path::{Path, PathBuf};

use eyre::{ensure, Result};
use shaledb::{Database, Row};

#[derive(Debug, Clone, PartialEq)]
struct Sample {
    id: [u8; 16],
    region: String,
    age: i32,
    payload: Vec<u8>,
}

impl Sample {
    fn new(tag: u8, region: &str, age: i32, payload: Vec<u8>) -> Self {
        let mut id = [0u8; 16];
        id[15] = tag;
        Self {
            id,
            region: region.to_string(),
            age,
            payload,
        }
    }
}

impl Row for Sample {
    fn id(&self) -> [u8; 16] {
        self.id
    }

    fn secondary_key(&self) -> (String, i32) {
        (self.region.clone(), self.age)
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.id);
        out.extend_from_slice(&(self.region.len() as u32).to_le_bytes());
        out.extend_from_slice(self.region.as_bytes());
        out.extend_from_slice(&self.age.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        ensure!(bytes.len() >= 24, "sample row too short: {}", bytes.len());
        let mut id = [0u8; 16];
        id.copy_from_slice(&bytes[..16]);
        let region_len =
            u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
        let region = String::from_utf8(bytes[20..20 + region_len].to_vec())?;
        let age_at = 20 + region_len;
        let age = i32::from_le_bytes(bytes[age_at..age_at + 4].try_into().unwrap());
        Ok(Self {
            id,
            region,
            age,
            payload: bytes[age_at + 4..].to_vec(),
        })
    }
}

fn open(path: &Path) -> Database<Sample> {
    Database::<Sample>::builder(path)
        .data_block_size(128)
        .index_block_size(512)
        .min_entries_per_node(2)
        .open()
        .unwrap()
}

fn temp_db() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.db");
    (dir, path)
}

#[test]
fn insert_close_reopen_find() {
    let (_dir, path) = temp_db();
    let row = Sample::new(1, "US", 30, vec![0xAA, 0xBB]);

    {
        let mut db = open(&path);
        db.insert(&row).unwrap();
        db.close().unwrap();
    }

    let db = open(&path);
    let found = db.find(&row.id()).unwrap().unwrap();
    assert_eq!(found, row);
    assert_eq!(found.payload, vec![0xAA, 0xBB]);
}

#[test]
fn default_geometry_round_trips_too() {
    let (_dir, path) = temp_db();
    let row = Sample::new(9, "JP", 41, (0..200u8).collect());

    {
        let mut db: Database<Sample> = Database::open(&path).unwrap();
        db.insert(&row).unwrap();
        db.close().unwrap();
    }

    let db: Database<Sample> = Database::open(&path).unwrap();
    assert_eq!(db.find(&row.id()).unwrap(), Some(row));
}

#[test]
fn acknowledged_inserts_survive_abrupt_drop() {
    let (_dir, path) = temp_db();
    let rows: Vec<Sample> = (0..100u8)
        .map(|i| {
            Sample::new(
                i,
                if i % 2 == 0 { "US" } else { "UK" },
                20 + (i as i32 % 5),
                vec![i; 1 + (i as usize % 40)],
            )
        })
        .collect();

    {
        let mut db = open(&path);
        for row in &rows {
            db.insert(row).unwrap();
        }
        // Simulated process abort: the handle is dropped without close.
    }

    let db = open(&path);
    for row in &rows {
        assert_eq!(db.find(&row.id()).unwrap().as_ref(), Some(row), "row {:?}", row.id[15]);
    }
}

#[test]
fn secondary_index_survives_reopen() {
    let (_dir, path) = temp_db();

    {
        let mut db = open(&path);
        db.insert(&Sample::new(1, "US", 30, vec![1])).unwrap();
        db.insert(&Sample::new(2, "US", 30, vec![2])).unwrap();
        db.insert(&Sample::new(3, "US", 31, vec![3])).unwrap();
        db.close().unwrap();
    }

    let db = open(&path);
    let matches: Vec<Sample> = db
        .find_by("US", 30)
        .unwrap()
        .map(|row| row.unwrap())
        .collect();
    assert_eq!(matches.len(), 2);
    assert!(matches.iter().all(|r| r.region == "US" && r.age == 30));
}

#[test]
fn deletes_persist_across_sessions() {
    let (_dir, path) = temp_db();
    let keep = Sample::new(1, "US", 30, vec![1; 300]);
    let gone = Sample::new(2, "US", 30, vec![2; 300]);

    {
        let mut db = open(&path);
        db.insert(&keep).unwrap();
        db.insert(&gone).unwrap();
        db.delete(&gone).unwrap();
        db.close().unwrap();
    }

    let db = open(&path);
    assert!(db.find(&gone.id()).unwrap().is_none());
    assert_eq!(db.find(&keep.id()).unwrap(), Some(keep.clone()));
    let remaining: Vec<Sample> = db
        .find_by("US", 30)
        .unwrap()
        .map(|row| row.unwrap())
        .collect();
    assert_eq!(remaining, vec![keep]);
}

#[test]
fn deleted_row_space_is_reused_after_reopen() {
    let (_dir, path) = temp_db();
    let first = Sample::new(1, "US", 30, vec![5; 500]);

    {
        let mut db = open(&path);
        db.insert(&first).unwrap();
        db.delete(&first).unwrap();
        db.close().unwrap();
    }
    let size_after_delete = std::fs::metadata(&path).unwrap().len();

    {
        let mut db = open(&path);
        db.insert(&Sample::new(2, "FR", 60, vec![6; 500])).unwrap();
        db.close().unwrap();
    }

    // The replacement row reuses the freed chain; the data file must not
    // have grown.
    assert_eq!(std::fs::metadata(&path).unwrap().len(), size_after_delete);
}

#[test]
fn many_sessions_accumulate_rows() {
    let (_dir, path) = temp_db();

    for session in 0..10u8 {
        let mut db = open(&path);
        db.insert(&Sample::new(session, "NL", 25, vec![session; 10]))
            .unwrap();
        db.close().unwrap();
    }

    let db = open(&path);
    for session in 0..10u8 {
        let mut id = [0u8; 16];
        id[15] = session;
        assert!(db.find(&id).unwrap().is_some(), "session {}", session);
    }
}
