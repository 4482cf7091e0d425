//! Scheme persistence
//!
//! Schemes live in a single sled tree under prefixed keys:
//!
//! - `scheme/<id>` holds the CBOR scheme record
//! - `deadline/<be nanos><id>` indexes ongoing schemes that have a deadline
//! - `target/<hex target>/<id>` indexes schemes by the object under approval
//!
//! Record and index changes for one scheme are applied in a single batch.
use sled::{Batch, Db};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{ApprovalError, Result};
use crate::scheme::{ApprovalScheme, SchemeStatus};
use crate::types::{EntityRef, SchemeId, TimeStamp};

const SCHEME_PREFIX: &[u8] = b"scheme/";
const DEADLINE_PREFIX: &[u8] = b"deadline/";
const TARGET_PREFIX: &[u8] = b"target/";

pub trait SchemeStore: Send + Sync {
    fn insert(&self, scheme: &ApprovalScheme) -> Result<()>;
    fn update(&self, scheme: &ApprovalScheme) -> Result<()>;
    fn get(&self, id: &SchemeId) -> Result<Option<ApprovalScheme>>;
    /// Ongoing schemes whose deadline is at or before `now`, earliest first.
    fn due(&self, now: TimeStamp) -> Result<Vec<SchemeId>>;
    /// Every scheme ever attached to `target`, oldest first.
    fn for_target(&self, target: &EntityRef) -> Result<Vec<ApprovalScheme>>;
    /// Remove a scheme and its index entries. False when it did not exist.
    fn delete(&self, id: &SchemeId) -> Result<bool>;

    /// The most recent scheme attached to `target`.
    fn find_by_target(&self, target: &EntityRef) -> Result<Option<ApprovalScheme>> {
        Ok(self.for_target(target)?.pop())
    }
}

pub struct SledSchemeStore {
    instance: Arc<Db>,
}

impl SledSchemeStore {
    pub fn new(instance: Arc<Db>) -> Self {
        Self { instance }
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(sled::open(path)?)))
    }

    /// Open the database at `store.path`.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::open(&config.store.path)
    }

    fn write(&self, scheme: &ApprovalScheme, previous: Option<&ApprovalScheme>) -> Result<()> {
        let mut batch = Batch::default();
        if previous.is_none() {
            batch.insert(target_key(scheme.target(), scheme.id())?, &[] as &[u8]);
        }
        if let Some(key) = previous.and_then(deadline_key) {
            batch.remove(key);
        }
        if let Some(key) = deadline_key(scheme) {
            batch.insert(key, &[] as &[u8]);
        }
        batch.insert(scheme_key(scheme.id()), scheme.to_bytes()?);
        self.instance.apply_batch(batch)?;
        Ok(())
    }
}

impl SchemeStore for SledSchemeStore {
    fn insert(&self, scheme: &ApprovalScheme) -> Result<()> {
        self.write(scheme, None)
    }

    fn update(&self, scheme: &ApprovalScheme) -> Result<()> {
        let previous = self.get(scheme.id())?;
        if previous.is_none() {
            return Err(ApprovalError::SchemeNotFound(scheme.id().clone()));
        }
        self.write(scheme, previous.as_ref())
    }

    fn get(&self, id: &SchemeId) -> Result<Option<ApprovalScheme>> {
        match self.instance.get(scheme_key(id))? {
            Some(bytes) => Ok(Some(ApprovalScheme::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn due(&self, now: TimeStamp) -> Result<Vec<SchemeId>> {
        let limit = nanos_be(now);
        let mut ids = Vec::new();
        for entry in self.instance.scan_prefix(DEADLINE_PREFIX) {
            let (key, _) = entry?;
            let rest = &key[DEADLINE_PREFIX.len()..];
            if rest.len() < 8 || rest[..8] > limit[..] {
                break;
            }
            ids.push(id_from_bytes(&rest[8..])?);
        }
        Ok(ids)
    }

    fn for_target(&self, target: &EntityRef) -> Result<Vec<ApprovalScheme>> {
        let mut schemes = Vec::new();
        for entry in self.instance.scan_prefix(target_prefix(target)?) {
            let (key, _) = entry?;
            let id = id_from_bytes(key.rsplit(|b| *b == b'/').next().unwrap_or_default())?;
            if let Some(scheme) = self.get(&id)? {
                schemes.push(scheme);
            }
        }
        schemes.sort_by_key(|scheme| scheme.started_at());
        Ok(schemes)
    }

    fn delete(&self, id: &SchemeId) -> Result<bool> {
        let Some(scheme) = self.get(id)? else {
            return Ok(false);
        };
        let mut batch = Batch::default();
        if let Some(key) = deadline_key(&scheme) {
            batch.remove(key);
        }
        batch.remove(target_key(scheme.target(), id)?);
        batch.remove(scheme_key(id));
        self.instance.apply_batch(batch)?;
        Ok(true)
    }
}

fn scheme_key(id: &SchemeId) -> Vec<u8> {
    [SCHEME_PREFIX, id.as_str().as_bytes()].concat()
}

// negative timestamps sort as zero; deadlines are always after the epoch
fn nanos_be(at: TimeStamp) -> [u8; 8] {
    (at.as_nanos().max(0) as u64).to_be_bytes()
}

fn deadline_key(scheme: &ApprovalScheme) -> Option<Vec<u8>> {
    if scheme.status() != SchemeStatus::Ongoing {
        return None;
    }
    let deadline = scheme.deadline()?;
    Some(
        [
            DEADLINE_PREFIX,
            &nanos_be(deadline)[..],
            scheme.id().as_str().as_bytes(),
        ]
        .concat(),
    )
}

fn target_prefix(target: &EntityRef) -> Result<Vec<u8>> {
    let encoded = hex::encode(minicbor::to_vec(target)?);
    Ok([TARGET_PREFIX, encoded.as_bytes(), &b"/"[..]].concat())
}

fn target_key(target: &EntityRef, id: &SchemeId) -> Result<Vec<u8>> {
    Ok([target_prefix(target)?, id.as_str().as_bytes().to_vec()].concat())
}

fn id_from_bytes(bytes: &[u8]) -> Result<SchemeId> {
    std::str::from_utf8(bytes)
        .map(SchemeId::from)
        .map_err(|_| minicbor::decode::Error::message("scheme index key is not utf-8").into())
}
