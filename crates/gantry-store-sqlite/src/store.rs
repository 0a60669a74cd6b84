//! [`SqliteStore`] — the SQLite implementation of [`EntityStore`].

use std::{collections::HashMap, path::Path, sync::Arc};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use serde_json::{Map, Value};

use gantry_core::{
  Result as CoreResult,
  capability::{
    Capability, RelationKind, SideRecord, run_create_hooks, run_update_hooks,
  },
  context::RequestContext,
  record::Record,
  schema::{EntityDef, Registry},
  store::EntityStore,
  user::{Settings, User},
};

use crate::{
  Error, Result,
  cache::CacheProvider,
  encode::{
    EncodedRecord, RECORD_COLUMNS, RawRecord, RawUser, decode_relation_kind,
    encode_record,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A gantry entity store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted. The
/// registry is consulted for side-record types; an optional
/// [`CacheProvider`] serves region-tagged reads from memory.
#[derive(Clone)]
pub struct SqliteStore {
  conn:     tokio_rusqlite::Connection,
  registry: Arc<Registry>,
  cache:    Option<Arc<CacheProvider>>,
}

/// Which rows a record load targets.
#[derive(Clone, Copy)]
enum Selector {
  All,
  Id(i64),
  Children(i64),
}

const INSERT_RECORD: &str = "INSERT INTO records
   (type_name, uid, gid, parent_id, created, updated, data, fid, fields)
   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

fn insert_record_row(
  conn: &rusqlite::Connection,
  record: &EncodedRecord,
) -> rusqlite::Result<i64> {
  conn.execute(INSERT_RECORD, rusqlite::params![
    record.type_name,
    record.uid,
    record.gid,
    record.parent_id,
    record.created,
    record.updated,
    record.data,
    record.fid,
    record.fields,
  ])?;
  Ok(conn.last_insert_rowid())
}

fn insert_link_row(
  conn: &rusqlite::Connection,
  owner_type: &str,
  owner_id: i64,
  kind: &str,
  target_id: i64,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO record_links (owner_type, owner_id, kind, target_id)
     VALUES (?1, ?2, ?3, ?4)",
    rusqlite::params![owner_type, owner_id, kind, target_id],
  )?;
  Ok(())
}

fn stamp_meta(record: &mut Record, now: &str) {
  record.set("created", Value::String(now.to_owned()));
  record.set("updated", Value::String(now.to_owned()));
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(
    path: impl AsRef<Path>,
    registry: Arc<Registry>,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, registry, cache: None };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory(registry: Arc<Registry>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, registry, cache: None };
    store.init_schema().await?;
    Ok(store)
  }

  /// Route region-tagged reads through `cache`. Without a provider every
  /// read goes to the database.
  pub fn with_cache(mut self, cache: Arc<CacheProvider>) -> Self {
    self.cache = Some(cache);
    self
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Load records of `type_name` matching the selector, in id order, with
  /// their side relations attached.
  async fn load_records(
    &self,
    type_name: &str,
    selector: Selector,
  ) -> Result<Vec<Record>> {
    let type_owned = type_name.to_owned();

    let (raws, raw_links) = self
      .conn
      .call(move |conn| {
        let (where_sql, extra) = match selector {
          Selector::All => ("", None),
          Selector::Id(id) => ("AND id = ?2", Some(id)),
          Selector::Children(parent) => ("AND parent_id = ?2", Some(parent)),
        };
        let sql = format!(
          "SELECT {RECORD_COLUMNS} FROM records
           WHERE type_name = ?1 {where_sql} ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws: Vec<RawRecord> = if let Some(extra) = extra {
          stmt
            .query_map(rusqlite::params![type_owned, extra], |row| {
              RawRecord::from_row(row, 0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
          stmt
            .query_map(rusqlite::params![type_owned], |row| {
              RawRecord::from_row(row, 0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        // One pass for every owner of the type; rows for owners outside
        // the selection are dropped while grouping.
        let links_sql = format!(
          "SELECT l.owner_id, l.kind,
                  r.id, r.type_name, r.uid, r.gid, r.parent_id,
                  r.created, r.updated, r.data, r.fid, r.fields
           FROM record_links l JOIN records r ON r.id = l.target_id
           WHERE l.owner_type = ?1 {}
           ORDER BY l.owner_id, l.kind, r.id",
          if matches!(selector, Selector::Id(_)) {
            "AND l.owner_id = ?2"
          } else {
            ""
          },
        );
        let mut stmt = conn.prepare(&links_sql)?;
        let map_link = |row: &rusqlite::Row<'_>| {
          Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            RawRecord::from_row(row, 2)?,
          ))
        };
        let raw_links: Vec<(i64, String, RawRecord)> =
          if let Selector::Id(id) = selector {
            stmt
              .query_map(rusqlite::params![type_owned, id], map_link)?
              .collect::<rusqlite::Result<Vec<_>>>()?
          } else {
            stmt
              .query_map(rusqlite::params![type_owned], map_link)?
              .collect::<rusqlite::Result<Vec<_>>>()?
          };

        Ok((raws, raw_links))
      })
      .await?;

    let mut order = Vec::with_capacity(raws.len());
    let mut by_id: HashMap<i64, Record> = HashMap::with_capacity(raws.len());
    for raw in raws {
      let record = raw.into_record()?;
      if let Some(id) = record.id {
        order.push(id);
        by_id.insert(id, record);
      }
    }
    for (owner_id, kind, raw) in raw_links {
      let Some(owner) = by_id.get_mut(&owner_id) else { continue };
      let kind = decode_relation_kind(&kind)?;
      owner.push_relation(kind, raw.into_record()?);
    }
    Ok(order.into_iter().filter_map(|id| by_id.remove(&id)).collect())
  }

  async fn record_exists(&self, type_name: String, id: i64) -> Result<bool> {
    let exists = self
      .conn
      .call(move |conn| {
        let exists: bool = conn
          .query_row(
            "SELECT 1 FROM records WHERE id = ?1 AND type_name = ?2",
            rusqlite::params![id, type_name],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        Ok(exists)
      })
      .await?;
    Ok(exists)
  }

  /// Insert the owner row and its side rows in one transaction. Returns
  /// the owner id and the side ids, in staging order.
  async fn write_insert(
    &self,
    owner: EncodedRecord,
    sides: Vec<(String, EncodedRecord)>,
  ) -> Result<(i64, Vec<i64>)> {
    let ids = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let owner_id = insert_record_row(&tx, &owner)?;
        let mut side_ids = Vec::with_capacity(sides.len());
        for (kind, side) in &sides {
          let side_id = insert_record_row(&tx, side)?;
          insert_link_row(&tx, &owner.type_name, owner_id, kind, side_id)?;
          side_ids.push(side_id);
        }
        tx.commit()?;
        Ok((owner_id, side_ids))
      })
      .await?;
    Ok(ids)
  }

  /// Overwrite the owner row and insert the new side rows in one
  /// transaction.
  async fn write_update(
    &self,
    id: i64,
    owner: EncodedRecord,
    sides: Vec<(String, EncodedRecord)>,
  ) -> Result<Vec<i64>> {
    let side_ids = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "UPDATE records SET uid = ?2, gid = ?3, parent_id = ?4,
             created = ?5, updated = ?6, data = ?7, fid = ?8, fields = ?9
           WHERE id = ?1 AND type_name = ?10",
          rusqlite::params![
            id,
            owner.uid,
            owner.gid,
            owner.parent_id,
            owner.created,
            owner.updated,
            owner.data,
            owner.fid,
            owner.fields,
            owner.type_name,
          ],
        )?;
        let mut side_ids = Vec::with_capacity(sides.len());
        for (kind, side) in &sides {
          let side_id = insert_record_row(&tx, side)?;
          insert_link_row(&tx, &owner.type_name, id, kind, side_id)?;
          side_ids.push(side_id);
        }
        tx.commit()?;
        Ok(side_ids)
      })
      .await?;
    Ok(side_ids)
  }

  async fn write_delete(&self, type_name: String, id: i64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM record_links
           WHERE (owner_type = ?1 AND owner_id = ?2) OR target_id = ?2",
          rusqlite::params![type_name, id],
        )?;
        tx.execute(
          "DELETE FROM records WHERE id = ?2 AND type_name = ?1",
          rusqlite::params![type_name, id],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn write_attach(
    &self,
    owner_type: String,
    owner_id: i64,
    kind: String,
    side: EncodedRecord,
  ) -> Result<i64> {
    let side_id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let side_id = insert_record_row(&tx, &side)?;
        insert_link_row(&tx, &owner_type, owner_id, &kind, side_id)?;
        tx.commit()?;
        Ok(side_id)
      })
      .await?;
    Ok(side_id)
  }

  /// Timestamp the record and every staged side record whose type
  /// composes `Meta`.
  fn stamp_sides(&self, sides: &mut [SideRecord], now: &str) -> CoreResult<()> {
    for side in sides.iter_mut() {
      let side_def = self.registry.get(&side.record.type_name)?;
      if side_def.composes(Capability::Meta) {
        stamp_meta(&mut side.record, now);
      }
    }
    Ok(())
  }

  fn encode_sides(
    &self,
    sides: &[SideRecord],
  ) -> Result<Vec<(String, EncodedRecord)>> {
    sides
      .iter()
      .map(|side| {
        Ok((side.kind.key().to_owned(), encode_record(&side.record)?))
      })
      .collect()
  }

  fn invalidate(&self, type_name: &str) {
    if let Some(cache) = &self.cache {
      cache.invalidate_type(type_name);
    }
  }

  // ── Users ─────────────────────────────────────────────────────────────

  async fn insert_user(&self, name: String) -> Result<i64> {
    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (name, settings) VALUES (?1, '{}')",
          rusqlite::params![name],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(id)
  }

  async fn read_user(&self, id: i64) -> Result<Option<User>> {
    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT id, name, gid, settings FROM users WHERE id = ?1",
              rusqlite::params![id],
              |row| {
                Ok(RawUser {
                  id:       row.get(0)?,
                  name:     row.get(1)?,
                  gid:      row.get(2)?,
                  settings: row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawUser::into_user).transpose()
  }

  async fn write_user_settings(
    &self,
    id: i64,
    settings_json: String,
  ) -> Result<usize> {
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE users SET settings = ?2 WHERE id = ?1",
          rusqlite::params![id, settings_json],
        )?)
      })
      .await?;
    Ok(changed)
  }
}

// ─── EntityStore impl ────────────────────────────────────────────────────────

impl EntityStore for SqliteStore {
  async fn fetch(
    &self,
    def: Arc<EntityDef>,
    id: i64,
    region: Option<&str>,
  ) -> CoreResult<Record> {
    let key = format!("{}:{id}", def.name());
    if let (Some(region), Some(cache)) = (region, &self.cache) {
      if let Some(mut hit) = cache.get(region, &key) {
        if let Some(record) = hit.pop() {
          return Ok(record);
        }
      }
    }

    let mut records = self.load_records(def.name(), Selector::Id(id)).await?;
    let record =
      records.pop().ok_or_else(|| gantry_core::Error::NotFound {
        type_name: def.name().to_owned(),
        id,
      })?;

    if let (Some(region), Some(cache)) = (region, &self.cache) {
      cache.put(region, &key, vec![record.clone()]);
    }
    Ok(record)
  }

  async fn fetch_all(
    &self,
    def: Arc<EntityDef>,
    region: Option<&str>,
  ) -> CoreResult<Vec<Record>> {
    if let (Some(region), Some(cache)) = (region, &self.cache) {
      if let Some(hit) = cache.get(region, def.name()) {
        return Ok(hit);
      }
    }

    let records = self.load_records(def.name(), Selector::All).await?;

    if let (Some(region), Some(cache)) = (region, &self.cache) {
      cache.put(region, def.name(), records.clone());
    }
    Ok(records)
  }

  async fn fetch_children(
    &self,
    def: Arc<EntityDef>,
    parent_id: i64,
  ) -> CoreResult<Vec<Record>> {
    Ok(
      self
        .load_records(def.name(), Selector::Children(parent_id))
        .await?,
    )
  }

  async fn insert(
    &self,
    ctx: &RequestContext,
    def: Arc<EntityDef>,
    record: Record,
  ) -> CoreResult<Record> {
    let mut record = record;
    let now = Utc::now().to_rfc3339();
    if def.composes(Capability::Meta) {
      stamp_meta(&mut record, &now);
    }

    // Hooks run before any write; a hook error leaves the database
    // untouched.
    let mut side = run_create_hooks(ctx, &def, &mut record)?;
    self.stamp_sides(&mut side, &now)?;

    let encoded = encode_record(&record)?;
    let encoded_sides = self.encode_sides(&side)?;
    let (id, side_ids) = self.write_insert(encoded, encoded_sides).await?;

    record.id = Some(id);
    self.invalidate(def.name());
    for s in &side {
      self.invalidate(&s.record.type_name);
    }
    for (s, side_id) in side.into_iter().zip(side_ids) {
      let mut side_record = s.record;
      side_record.id = Some(side_id);
      record.push_relation(s.kind, side_record);
    }
    Ok(record)
  }

  async fn update(
    &self,
    ctx: &RequestContext,
    def: Arc<EntityDef>,
    id: i64,
    values: Map<String, Value>,
  ) -> CoreResult<Record> {
    let mut record = {
      let mut records =
        self.load_records(def.name(), Selector::Id(id)).await?;
      records.pop().ok_or_else(|| gantry_core::Error::NotFound {
        type_name: def.name().to_owned(),
        id,
      })?
    };

    let mut changes = record.stage(&def, values);
    let mut side = run_update_hooks(ctx, &def, &mut record, &mut changes)?;
    let now = Utc::now().to_rfc3339();
    self.stamp_sides(&mut side, &now)?;

    let encoded = encode_record(&record)?;
    let encoded_sides = self.encode_sides(&side)?;
    let side_ids = self.write_update(id, encoded, encoded_sides).await?;

    self.invalidate(def.name());
    for s in &side {
      self.invalidate(&s.record.type_name);
    }
    for (s, side_id) in side.into_iter().zip(side_ids) {
      let mut side_record = s.record;
      side_record.id = Some(side_id);
      record.push_relation(s.kind, side_record);
    }
    Ok(record)
  }

  async fn delete(&self, def: Arc<EntityDef>, id: i64) -> CoreResult<()> {
    self.write_delete(def.name().to_owned(), id).await?;
    self.invalidate(def.name());
    Ok(())
  }

  async fn attach(
    &self,
    def: Arc<EntityDef>,
    id: i64,
    side: SideRecord,
  ) -> CoreResult<Record> {
    if !self.record_exists(def.name().to_owned(), id).await? {
      return Err(gantry_core::Error::NotFound {
        type_name: def.name().to_owned(),
        id,
      });
    }

    let kind = side.kind;
    let mut record = side.record;
    let side_def = self.registry.get(&record.type_name)?;
    if side_def.composes(Capability::Meta) {
      stamp_meta(&mut record, &Utc::now().to_rfc3339());
    }

    let encoded = encode_record(&record)?;
    let side_id = self
      .write_attach(def.name().to_owned(), id, kind.key().to_owned(), encoded)
      .await?;
    record.id = Some(side_id);

    self.invalidate(def.name());
    self.invalidate(&record.type_name);
    Ok(record)
  }

  async fn detach(
    &self,
    def: Arc<EntityDef>,
    id: i64,
    kind: RelationKind,
    target_id: i64,
  ) -> CoreResult<()> {
    let owner_type = def.name().to_owned();
    let kind_key = kind.key();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM record_links
           WHERE owner_type = ?1 AND owner_id = ?2
             AND kind = ?3 AND target_id = ?4",
          rusqlite::params![owner_type, id, kind_key, target_id],
        )?;
        Ok(())
      })
      .await
      .map_err(Error::Database)?;
    self.invalidate(def.name());
    Ok(())
  }

  // ── Users ─────────────────────────────────────────────────────────────

  async fn add_user(&self, name: String) -> CoreResult<User> {
    let id = self.insert_user(name.clone()).await?;
    Ok(User::new(id, name))
  }

  async fn load_user(&self, id: i64) -> CoreResult<User> {
    self.read_user(id).await?.ok_or_else(|| {
      gantry_core::Error::NotFound { type_name: "users".to_owned(), id }
    })
  }

  async fn save_user_settings(
    &self,
    id: i64,
    settings: Settings,
  ) -> CoreResult<()> {
    let settings_json = serde_json::to_string(&settings)?;
    let changed = self.write_user_settings(id, settings_json).await?;
    if changed == 0 {
      return Err(gantry_core::Error::NotFound {
        type_name: "users".to_owned(),
        id,
      });
    }
    Ok(())
  }
}
