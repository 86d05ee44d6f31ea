//! Cache store trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use url::Url;

use super::entry::{CacheEntry, CacheKey};
use crate::db::{parse_datetime, Database};
use crate::http::Response;

/// Trait for cache storage backends.
///
/// Writing to a partition that does not exist yet creates it.
pub trait CacheStore: Send + Sync {
  /// Create the partition if it does not exist.
  fn open_partition(&self, name: &str) -> Result<()>;

  fn has_partition(&self, name: &str) -> Result<bool>;

  /// All partition names, in creation order.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Delete a partition and every entry in it. Returns false if it was absent.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Look up an entry in one partition.
  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CacheEntry>>;

  /// Look up an entry in every partition, oldest partition first.
  fn match_any(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

  /// Insert or overwrite an entry.
  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Insert or overwrite several entries atomically.
  fn put_all(&self, partition: &str, entries: &[(CacheKey, Response)]) -> Result<()>;

  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool>;

  /// URLs stored in a partition.
  fn keys(&self, partition: &str) -> Result<Vec<Url>>;
}

/// SQLite-based cache store.
#[derive(Clone)]
pub struct SqliteCacheStore {
  db: Database,
}

impl SqliteCacheStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

fn ensure_partition(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open partition {}: {}", name, e))?;
  Ok(())
}

fn upsert_entry(
  conn: &Connection,
  partition: &str,
  key: &CacheKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (partition_name, request_key, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        partition,
        key.hash(),
        key.url().as_str(),
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;
  Ok(())
}

type EntryRow = (String, u16, String, Vec<u8>, String);

fn entry_from_row(row: EntryRow) -> Result<CacheEntry> {
  let (url, status, headers, body, stored_at) = row;
  let url = Url::parse(&url).map_err(|e| eyre!("Corrupt cached url '{}': {}", url, e))?;
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", url, e))?;

  Ok(CacheEntry {
    url,
    response: Response::new(status, headers, body),
    stored_at: parse_datetime(&stored_at)?,
  })
}

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
  ))
}

impl CacheStore for SqliteCacheStore {
  fn open_partition(&self, name: &str) -> Result<()> {
    let conn = self.db.conn()?;
    ensure_partition(&conn, name)
  }

  fn has_partition(&self, name: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM partitions WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up partition {}: {}", name, e))?;
    Ok(found.is_some())
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;
    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE partition_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed > 0)
  }

  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
    let conn = self.db.conn()?;
    let row = conn
      .query_row(
        "SELECT url, status, headers, body, stored_at FROM cache_entries
         WHERE partition_name = ? AND request_key = ?",
        params![partition, key.hash()],
        read_entry,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    row.map(entry_from_row).transpose()
  }

  fn match_any(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
    let conn = self.db.conn()?;
    let row = conn
      .query_row(
        "SELECT ce.url, ce.status, ce.headers, ce.body, ce.stored_at FROM cache_entries ce
         INNER JOIN partitions p ON p.name = ce.partition_name
         WHERE ce.request_key = ?
         ORDER BY p.seq
         LIMIT 1",
        params![key.hash()],
        read_entry,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    row.map(entry_from_row).transpose()
  }

  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let conn = self.db.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_partition(&tx, partition)?;
    upsert_entry(&tx, partition, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn put_all(&self, partition: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let conn = self.db.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_partition(&tx, partition)?;
    for (key, response) in entries {
      upsert_entry(&tx, partition, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool> {
    let conn = self.db.conn()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE partition_name = ? AND request_key = ?",
        params![partition, key.hash()],
      )
      .map_err(|e| eyre!("Failed to delete {}: {}", key, e))?;
    Ok(removed > 0)
  }

  fn keys(&self, partition: &str) -> Result<Vec<Url>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT url FROM cache_entries WHERE partition_name = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls = stmt
      .query_map(params![partition], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", partition, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry url: {}", e))?;

    urls
      .iter()
      .map(|u| Url::parse(u).map_err(|e| eyre!("Corrupt cached url '{}': {}", u, e)))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store() -> SqliteCacheStore {
    SqliteCacheStore::new(Database::open_in_memory().unwrap())
  }

  fn key(s: &str) -> CacheKey {
    CacheKey::from_url(&Url::parse(s).unwrap())
  }

  fn ok(body: &str) -> Response {
    Response::new(
      200,
      vec![("content-type".to_string(), "text/html".to_string())],
      body,
    )
  }

  #[test]
  fn test_put_then_get_round_trips_snapshot() {
    let store = store();
    let k = key("https://app.test/index.html");
    store.put("runtime", &k, &ok("<h1>hi</h1>")).unwrap();

    let entry = store.get("runtime", &k).unwrap().unwrap();
    assert_eq!(entry.url.as_str(), "https://app.test/index.html");
    assert_eq!(entry.response, ok("<h1>hi</h1>"));
    assert!(store.has_partition("runtime").unwrap());
  }

  #[test]
  fn test_put_overwrites_in_place() {
    let store = store();
    let k = key("https://app.test/data");
    store.put("runtime", &k, &ok("old")).unwrap();
    store.put("runtime", &k, &ok("new")).unwrap();

    assert_eq!(store.keys("runtime").unwrap().len(), 1);
    assert_eq!(store.get("runtime", &k).unwrap().unwrap().response.body, b"new");
  }

  #[test]
  fn test_partitions_are_isolated() {
    let store = store();
    let k = key("https://app.test/a");
    store.put("runtime", &k, &ok("a")).unwrap();

    assert!(store.get("api", &k).unwrap().is_none());
    assert!(!store.has_partition("api").unwrap());
  }

  #[test]
  fn test_match_any_prefers_oldest_partition() {
    let store = store();
    let k = key("https://app.test/offline.html");
    store.put("static-v1", &k, &ok("first")).unwrap();
    store.put("runtime", &k, &ok("second")).unwrap();

    let entry = store.match_any(&k).unwrap().unwrap();
    assert_eq!(entry.response.body, b"first");
    assert!(store.match_any(&key("https://app.test/missing")).unwrap().is_none());
  }

  #[test]
  fn test_delete_partition_removes_entries() {
    let store = store();
    let k = key("https://app.test/a");
    store.put("static-v1", &k, &ok("a")).unwrap();
    store.open_partition("runtime").unwrap();

    assert!(store.delete_partition("static-v1").unwrap());
    assert!(!store.delete_partition("static-v1").unwrap());
    assert_eq!(store.partition_names().unwrap(), vec!["runtime".to_string()]);
    assert!(store.match_any(&k).unwrap().is_none());
  }

  #[test]
  fn test_partition_names_in_creation_order() {
    let store = store();
    store.open_partition("b").unwrap();
    store.open_partition("a").unwrap();
    store.open_partition("b").unwrap();

    assert_eq!(
      store.partition_names().unwrap(),
      vec!["b".to_string(), "a".to_string()]
    );
  }

  #[test]
  fn test_put_all_and_delete() {
    let store = store();
    let entries = vec![
      (key("https://app.test/a"), ok("a")),
      (key("https://app.test/b"), ok("b")),
    ];
    store.put_all("static", &entries).unwrap();
    assert_eq!(store.keys("static").unwrap().len(), 2);

    assert!(store.delete("static", &key("https://app.test/a")).unwrap());
    assert!(!store.delete("static", &key("https://app.test/a")).unwrap());
    assert_eq!(
      store.keys("static").unwrap(),
      vec![Url::parse("https://app.test/b").unwrap()]
    );
  }
}
